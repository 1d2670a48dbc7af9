use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use outpost_core::protocol::{PullRequest, PullResponse, PushRequest, RevisionResponse};
use outpost_core::SyncService;
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    service: Arc<Mutex<SyncService>>,
    auth_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(service: SyncService, auth_token: Option<String>) -> Self {
        Self {
            service: Arc::new(Mutex::new(service)),
            auth_token: auth_token.map(Into::into),
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let sync_routes = Router::new()
        .route("/datasets/{dataset}/revision", get(query_revision))
        .route("/datasets/{dataset}/push", post(push))
        .route("/datasets/{dataset}/pull", post(pull))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", sync_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = &state.auth_token {
        let presented = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        if presented != Some(expected.as_ref()) {
            return Err(AppError::Unauthorized(
                "missing or invalid bearer token".to_string(),
            ));
        }
    }
    Ok(next.run(request).await)
}

async fn query_revision(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
) -> Result<Json<RevisionResponse>, AppError> {
    let service = state.service.lock().await;
    let revision = service.peer_revision(&dataset)?;
    Ok(Json(RevisionResponse { revision }))
}

async fn push(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    Json(request): Json<PushRequest>,
) -> Result<StatusCode, AppError> {
    let mut service = state.service.lock().await;
    service.apply_incoming(&dataset, &request)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pull(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    Json(request): Json<PullRequest>,
) -> Result<Json<PullResponse>, AppError> {
    let service = state.service.lock().await;
    let response = service.collect_outgoing(&dataset, request.from_version)?;
    Ok(Json(response))
}
