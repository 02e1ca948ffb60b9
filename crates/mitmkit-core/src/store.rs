//! Persistence boundary. `RequestStore` is the trait the core depends on;
//! `InMemoryStore` is the default, self-contained implementation used by
//! the binary and by every test in this workspace. A document-store-backed
//! implementation is a drop-in replacement behind the same trait.

use crate::error::{ProxyError, ProxyResult};
use crate::model::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn save_request(&self, req: HttpRequest) -> ProxyResult<HttpRequest>;
    async fn get_requests_list(&self) -> ProxyResult<Vec<HttpRequest>>;
    async fn get_request_by_id(&self, id: &str) -> ProxyResult<HttpRequest>;
    async fn save_response(&self, resp: HttpResponse) -> ProxyResult<HttpResponse>;
}

/// Concurrent in-memory `RequestStore`. Ids are monotonically assigned
/// decimal strings, mirroring the way the reference Mongo repository
/// assigns an object id on insert.
#[derive(Default)]
pub struct InMemoryStore {
    requests: RwLock<HashMap<String, HttpRequest>>,
    responses: RwLock<HashMap<String, HttpResponse>>,
    next_request_id: AtomicU64,
    next_response_id: AtomicU64,
    // preserves list order across `get_requests_list`
    request_order: RwLock<Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl RequestStore for InMemoryStore {
    async fn save_request(&self, mut req: HttpRequest) -> ProxyResult<HttpRequest> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = id.to_string();
        req.id = Some(id.clone());

        let mut requests = self.requests.write().await;
        let mut order = self.request_order.write().await;
        requests.insert(id.clone(), req.clone());
        order.push(id);

        Ok(req)
    }

    async fn get_requests_list(&self) -> ProxyResult<Vec<HttpRequest>> {
        let requests = self.requests.read().await;
        let order = self.request_order.read().await;
        Ok(order
            .iter()
            .filter_map(|id| requests.get(id).cloned())
            .collect())
    }

    async fn get_request_by_id(&self, id: &str) -> ProxyResult<HttpRequest> {
        let requests = self.requests.read().await;
        requests
            .get(id)
            .cloned()
            .ok_or_else(|| ProxyError::NotFound(id.to_string()))
    }

    async fn save_response(&self, mut resp: HttpResponse) -> ProxyResult<HttpResponse> {
        let id = self.next_response_id.fetch_add(1, Ordering::Relaxed) + 1;
        resp.id = Some(id.to_string());

        let mut responses = self.responses.write().await;
        responses.insert(resp.id.clone().unwrap(), resp.clone());

        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> HttpRequest {
        HttpRequest {
            method: "GET".into(),
            host: "example.test".into(),
            port: "80".into(),
            scheme: "http".into(),
            proto: "HTTP/1.1".into(),
            path: "/".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn save_request_assigns_id_and_list_preserves_order() {
        let store = InMemoryStore::new();
        let a = store.save_request(sample_request()).await.unwrap();
        let b = store.save_request(sample_request()).await.unwrap();
        assert_ne!(a.id, b.id);

        let list = store.get_requests_list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, a.id);
        assert_eq!(list[1].id, b.id);
    }

    #[tokio::test]
    async fn get_request_by_id_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_request_by_id("missing").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn save_response_assigns_request_id() {
        let store = InMemoryStore::new();
        let req = store.save_request(sample_request()).await.unwrap();
        let resp = HttpResponse {
            request_id: req.id.clone().unwrap(),
            code: 200,
            status_message: "OK".into(),
            ..Default::default()
        };
        let saved = store.save_response(resp).await.unwrap();
        assert_eq!(saved.request_id, req.id.unwrap());
        assert!(saved.id.is_some());
    }
}
