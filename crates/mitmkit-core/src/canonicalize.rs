//! Converts an on-wire HTTP request into the canonical `HttpRequest`
//! record, applying the normalization rules every downstream component
//! relies on: hop-by-hop header stripping, scheme inference, query/body
//! parsing, and cookie-jar extraction.

use crate::error::{ProxyError, ProxyResult};
use crate::model::{HttpRequest, OrderedMultiMap};

/// A transport-agnostic view of an incoming HTTP request: whatever parsed
/// the bytes off the wire (the plain-proxy path via `axum`/`hyper`, or the
/// MITM tunnel path via `httparse` on a captured transcript) builds one of
/// these and hands it to [`canonicalize`].
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: String,
    pub proto: String,
    /// Host header value, e.g. `example.test` or `example.test:8443`.
    pub host: String,
    /// Scheme from the request target, if the target was an absolute-URI
    /// (as proxied plain requests are). Empty for origin-form targets.
    pub scheme: String,
    pub path: String,
    pub raw_query: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Whether this request arrived over a TLS connection (the MITM
    /// tunnel's client-facing side), used to infer `https` when the
    /// request target carried no explicit scheme.
    pub over_tls: bool,
}

const HOP_BY_HOP_HEADERS: &[&str] = &["proxy-connection", "cookie"];

/// Canonicalize a wire request into the stored record shape.
pub fn canonicalize(wire: WireRequest) -> ProxyResult<HttpRequest> {
    let method = wire.method.to_uppercase();

    let (host, port) = split_host_port(&wire.host);

    let mut scheme = wire.scheme.clone();
    if scheme.is_empty() {
        scheme = "http".to_string();
        if wire.over_tls || port == "443" {
            scheme = "https".to_string();
        }
    }

    let mut headers = OrderedMultiMap::new();
    for (name, value) in &wire.headers {
        if HOP_BY_HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let get_params = parse_query(&wire.raw_query);

    let content_type = wire
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.as_str())
        .unwrap_or("");
    let post_params = if content_type
        .to_ascii_lowercase()
        .starts_with("application/x-www-form-urlencoded")
    {
        parse_form_body(&wire.body)?
    } else {
        OrderedMultiMap::new()
    };

    let cookies = parse_cookies(&wire.headers);

    Ok(HttpRequest {
        id: None,
        proto: wire.proto,
        scheme,
        method,
        host,
        port,
        path: wire.path,
        headers,
        get_params,
        post_params,
        cookies,
        body: wire.body,
    })
}

/// Split `host[:port]` into `(host, port)`, defaulting the port to `"80"`.
fn split_host_port(host_header: &str) -> (String, String) {
    match host_header.find(':') {
        Some(idx) => (
            host_header[..idx].to_string(),
            host_header[idx + 1..].to_string(),
        ),
        None => (host_header.to_string(), "80".to_string()),
    }
}

fn parse_query(raw_query: &str) -> OrderedMultiMap {
    let mut map = OrderedMultiMap::new();
    for (key, value) in form_urlencoded::parse(raw_query.as_bytes()) {
        map.append(key.into_owned(), value.into_owned());
    }
    map
}

fn parse_form_body(body: &[u8]) -> ProxyResult<OrderedMultiMap> {
    let mut map = OrderedMultiMap::new();
    let text =
        std::str::from_utf8(body).map_err(|e| ProxyError::ParseFormData(e.to_string()))?;
    for (key, value) in form_urlencoded::parse(text.as_bytes()) {
        map.append(key.into_owned(), value.into_owned());
    }
    Ok(map)
}

fn parse_cookies(headers: &[(String, String)]) -> std::collections::HashMap<String, String> {
    let mut cookies = std::collections::HashMap::new();
    for (name, value) in headers {
        if !name.eq_ignore_ascii_case("cookie") {
            continue;
        }
        for part in value.split(';') {
            if let Ok(cookie) = cookie::Cookie::parse(part.trim().to_string()) {
                if !cookie.name().is_empty() {
                    cookies.insert(cookie.name().to_string(), part.trim().to_string());
                }
            }
        }
    }
    cookies
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_wire() -> WireRequest {
        WireRequest {
            method: "get".into(),
            proto: "HTTP/1.1".into(),
            host: "example.test".into(),
            scheme: String::new(),
            path: "/a".into(),
            raw_query: "x=1".into(),
            headers: vec![
                ("Host".into(), "example.test".into()),
                ("Proxy-Connection".into(), "keep-alive".into()),
                ("Cookie".into(), "sid=abc".into()),
            ],
            body: Vec::new(),
            over_tls: false,
        }
    }

    #[test]
    fn infers_http_scheme_and_default_port() {
        let req = canonicalize(base_wire()).unwrap();
        assert_eq!(req.scheme, "http");
        assert_eq!(req.host, "example.test");
        assert_eq!(req.port, "80");
        assert_eq!(req.method, "GET");
        assert_eq!(req.get_params.get("x"), Some(&["1".to_string()][..]));
    }

    #[test]
    fn strips_hop_by_hop_headers() {
        let req = canonicalize(base_wire()).unwrap();
        assert!(!req.headers.contains_key("Proxy-Connection"));
        assert!(!req.headers.contains_key("Cookie"));
        assert_eq!(req.cookies.get("sid"), Some(&"sid=abc".to_string()));
    }

    #[test]
    fn tls_or_443_upgrades_to_https() {
        let mut wire = base_wire();
        wire.over_tls = true;
        wire.host = "example.test:443".into();
        let req = canonicalize(wire).unwrap();
        assert_eq!(req.scheme, "https");
        assert_eq!(req.port, "443");
    }

    #[test]
    fn parses_form_encoded_body() {
        let mut wire = base_wire();
        wire.headers.push((
            "Content-Type".into(),
            "application/x-www-form-urlencoded".into(),
        ));
        wire.body = b"a=1&b=2".to_vec();
        let req = canonicalize(wire).unwrap();
        assert_eq!(req.post_params.get("a"), Some(&["1".to_string()][..]));
        assert_eq!(req.post_params.get("b"), Some(&["2".to_string()][..]));
    }
}
