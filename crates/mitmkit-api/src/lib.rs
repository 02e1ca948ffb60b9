//! mitmkit-api - the control API: a thin `axum::Router` mapping
//! `/requests/...` routes onto the store, replay engine, and scanner.

mod error;
mod handlers;

use axum::routing::{get, post};
use axum::Router;
use mitmkit_core::RequestStore;
use mitmkit_replay::{InjectionScanner, ReplayEngine};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub struct AppState {
    pub store: Arc<dyn RequestStore>,
    pub engine: ReplayEngine,
    pub scanner: InjectionScanner,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/requests/", get(handlers::list_requests))
        .route("/requests/{id}", get(handlers::get_request))
        .route("/requests/{id}/repeat", post(handlers::repeat_request))
        .route("/requests/{id}/scan", post(handlers::scan_request))
        .layer(cors)
        .with_state(state)
}
