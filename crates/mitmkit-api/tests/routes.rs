use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mitmkit_api::{router, AppState};
use mitmkit_core::{HttpRequest, InMemoryStore, RequestStore};
use mitmkit_replay::{InjectionScanner, ReplayEngine};
use std::sync::Arc;
use tower::ServiceExt;

fn build_state(store: Arc<dyn RequestStore>) -> Arc<AppState> {
    let engine = ReplayEngine::new().unwrap();
    let scanner = InjectionScanner::new(engine.clone(), 4);
    Arc::new(AppState {
        store,
        engine,
        scanner,
    })
}

#[tokio::test]
async fn list_requests_returns_empty_body_initially() {
    let store = InMemoryStore::new();
    let app = router(build_state(store));

    let response = app
        .oneshot(Request::get("/requests/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["body"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn get_request_missing_id_returns_404_envelope() {
    let store = InMemoryStore::new();
    let app = router(build_state(store));

    let response = app
        .oneshot(
            Request::get("/requests/missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(json["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn get_request_by_id_returns_stored_request() {
    let store = InMemoryStore::new();
    let saved = store
        .save_request(HttpRequest {
            method: "GET".into(),
            host: "example.test".into(),
            port: "80".into(),
            scheme: "http".into(),
            proto: "HTTP/1.1".into(),
            path: "/a".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let id = saved.id.clone().unwrap();

    let app = router(build_state(store));
    let response = app
        .oneshot(
            Request::get(format!("/requests/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["body"]["path"], "/a");
}
