//! Canonical data model: `HttpRequest`, `HttpResponse`, and the
//! insertion-order-preserving multimap they're built from.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A key -> ordered list of values map that preserves the order in which
/// values were first appended for a given key, and the order in which keys
/// were first seen. Headers, query params and form params all need this:
/// a wire request can repeat a header name, and the replay path must
/// reproduce the same multi-value order it was canonicalized from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedMultiMap {
    entries: Vec<(String, Vec<String>)>,
}

impl OrderedMultiMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append a single value under `key`, creating the key's entry if this
    /// is the first value seen for it.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some((_, values)) = self.entries.iter_mut().find(|(k, _)| k == &key) {
            values.push(value.into());
        } else {
            self.entries.push((key, vec![value.into()]));
        }
    }

    /// Replace the entire value list for `key`, preserving its position if
    /// the key already existed, appending otherwise.
    pub fn set(&mut self, key: impl Into<String>, values: Vec<String>) {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == &key) {
            entry.1 = values;
        } else {
            self.entries.push((key, values));
        }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Build a witness map containing only the listed keys, in the order
    /// they appear in `self`.
    pub fn retain_keys(&self, keys: impl IntoIterator<Item = String>) -> Self {
        let wanted: Vec<String> = keys.into_iter().collect();
        let entries = self
            .entries
            .iter()
            .filter(|(k, _)| wanted.contains(k))
            .cloned()
            .collect();
        Self { entries }
    }
}

impl FromIterator<(String, Vec<String>)> for OrderedMultiMap {
    fn from_iter<T: IntoIterator<Item = (String, Vec<String>)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}

/// The canonical, stored form of a proxied HTTP request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub proto: String,
    pub scheme: String,
    pub method: String,
    pub host: String,
    pub port: String,
    pub path: String,
    pub headers: OrderedMultiMap,
    pub get_params: OrderedMultiMap,
    pub post_params: OrderedMultiMap,
    pub cookies: HashMap<String, String>,
    #[serde(with = "body_as_base64")]
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// `host:port`, used to dial the origin.
    pub fn full_host(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.full_host(), self.path)
    }
}

/// The canonical, stored form of an origin's HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub request_id: String,
    pub code: u16,
    pub status_message: String,
    pub headers: OrderedMultiMap,
    pub body: String,
}

/// Bodies are arbitrary bytes but the record is JSON; store them base64,
/// the same way the redirector crate base64-encodes captured frames for
/// its IPC channel.
mod body_as_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(&encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_multimap_preserves_insertion_order() {
        let mut map = OrderedMultiMap::new();
        map.append("x", "1");
        map.append("y", "2");
        map.append("x", "3");
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(map.get("x"), Some(&["1".to_string(), "3".to_string()][..]));
    }

    #[test]
    fn retain_keys_keeps_relative_order() {
        let mut map = OrderedMultiMap::new();
        map.append("a", "1");
        map.append("b", "2");
        map.append("c", "3");
        let witness = map.retain_keys(["c".to_string(), "a".to_string()]);
        assert_eq!(witness.keys().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn body_roundtrips_through_json() {
        let req = HttpRequest {
            body: b"hello world".to_vec(),
            ..Default::default()
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: HttpRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body, b"hello world");
    }
}
