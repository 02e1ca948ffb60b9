//! Route handlers: thin dispatch onto the store/replay/scan operations,
//! with no business logic of their own.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use mitmkit_core::{HttpRequest, HttpResponse};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Serialize)]
pub struct ListResponse {
    pub body: Vec<HttpRequest>,
}

#[derive(Serialize)]
pub struct RequestResponse {
    pub body: HttpRequest,
}

#[derive(Serialize)]
pub struct ResponseResponse {
    pub body: HttpResponse,
}

pub async fn list_requests(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListResponse>, ApiError> {
    let body = state.store.get_requests_list().await?;
    Ok(Json(ListResponse { body }))
}

pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RequestResponse>, ApiError> {
    let body = state.store.get_request_by_id(&id).await?;
    Ok(Json(RequestResponse { body }))
}

pub async fn repeat_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ResponseResponse>), ApiError> {
    let request = state.store.get_request_by_id(&id).await?;
    info!(request_id = %id, "repeating stored request");
    let cancel = CancellationToken::new();
    let response =
        mitmkit_replay::replay_and_store(&state.engine, &state.store, &request, &cancel).await?;
    Ok((StatusCode::CREATED, Json(ResponseResponse { body: response })))
}

pub async fn scan_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<RequestResponse>), ApiError> {
    let request = state.store.get_request_by_id(&id).await?;
    info!(request_id = %id, "starting command-injection scan");
    let cancel = CancellationToken::new();
    let witness = state.scanner.scan(&request, &cancel).await?;
    Ok((StatusCode::CREATED, Json(RequestResponse { body: witness })))
}
