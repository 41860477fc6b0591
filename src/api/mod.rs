use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::AuthConfig;
use crate::connectors::ConnectorFactory;
use crate::error::EngineError;
use crate::lifecycle::{RequestContext, RequestManager};
use crate::metadata::MetadataStore;
use crate::registry::SourceRegistry;
use crate::{log_performance, query_span};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub requests: Arc<RequestManager>,
    pub metadata: Arc<MetadataStore>,
    pub registry: Arc<SourceRegistry>,
    pub connector_factory: Arc<ConnectorFactory>,
    pub auth_config: AuthConfig,
    pub start_time: SystemTime,
}

/// Standard API response wrapper, mirroring the base crate's envelope.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { success: true, data: Some(data), error: None, timestamp: chrono::Utc::now() }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse { success: false, data: None, error: Some(message), timestamp: chrono::Utc::now() }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub data_sources_registered: bool,
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub uptime_seconds: u64,
}

#[derive(Deserialize)]
pub struct SubmitQueryRequest {
    pub sql: String,
    #[serde(default = "default_username")]
    pub username: String,
}

fn default_username() -> String {
    "anonymous".to_string()
}

#[derive(Deserialize)]
pub struct SubmitEndpointRequest {
    #[serde(default = "default_username")]
    pub username: String,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub request_id: String,
}

/// `max_concurrent_requests` caps the number of in-flight HTTP requests,
/// matching the `server.workers` figure in [`crate::config::ServerConfig`]
/// (spec.md §5: distinct requests run on distinct workers).
pub fn create_router(state: AppState, max_concurrent_requests: usize) -> Router {
    let protected_routes = Router::new()
        .route("/query", post(submit_query))
        .route("/endpoint/:name", post(submit_endpoint))
        .route("/requests/:id", get(poll))
        .route("/requests/:id/result", get(get_result))
        .route("/requests/:id/plan", get(get_query_plan))
        .layer(middleware::from_fn_with_state(state.auth_config.clone(), crate::auth::auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(ConcurrencyLimitLayer::new(max_concurrent_requests))
        .with_state(state)
}

pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data_sources_registered: !state.registry.is_empty(),
    };
    Json(ApiResponse::success(response))
}

pub async fn get_metrics(State(state): State<AppState>) -> Json<ApiResponse<MetricsResponse>> {
    let uptime_seconds = state.start_time.elapsed().unwrap_or_default().as_secs();
    Json(ApiResponse::success(MetricsResponse { uptime_seconds }))
}

fn status_for(error: &EngineError) -> StatusCode {
    match error {
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::Validation { .. } | EngineError::Parse { .. } | EngineError::Function { .. } => StatusCode::BAD_REQUEST,
        EngineError::AccessDenied { .. } => StatusCode::FORBIDDEN,
        EngineError::Stage { source, .. } => status_for(source),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn submit_query(
    State(state): State<AppState>,
    Json(request): Json<SubmitQueryRequest>,
) -> Result<Json<ApiResponse<SubmitResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    let _span = query_span!(&request.sql);
    let start = std::time::Instant::now();

    // A syntactically valid parse is required up front; submit() itself
    // never fails once the id is assigned, so this is the only point a
    // caller's ValidationError is surfaced synchronously (spec.md §6.1).
    if let Err(e) = crate::parser::parse(&request.sql) {
        error!(error = %e, "query failed to parse");
        return Err((status_for(&e), Json(ApiResponse::error(e.to_string()))));
    }

    let id = state.requests.submit_query(
        request.sql,
        RequestContext { username: request.username, model: None, endpoint: None },
    );

    log_performance!("submit_query", start.elapsed());
    info!(request_id = %id, "query submitted");
    Ok(Json(ApiResponse::success(SubmitResponse { request_id: id })))
}

pub async fn submit_endpoint(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<SubmitEndpointRequest>,
) -> Result<Json<ApiResponse<SubmitResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    let id = state
        .requests
        .submit_endpoint(&name, RequestContext { username: request.username, model: None, endpoint: Some(name.clone()) })
        .map_err(|e| (status_for(&e), Json(ApiResponse::error(e.to_string()))))?;

    info!(request_id = %id, endpoint = %name, "endpoint submitted");
    Ok(Json(ApiResponse::success(SubmitResponse { request_id: id })))
}

pub async fn poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<crate::metadata::ResultSetRecord>>, (StatusCode, Json<ApiResponse<()>>)> {
    let record = state.requests.poll(&id).map_err(|e| (status_for(&e), Json(ApiResponse::error(e.to_string()))))?;
    Ok(Json(ApiResponse::success(record)))
}

pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, (StatusCode, Json<ApiResponse<()>>)> {
    let result = state.requests.get_result(&id).await.map_err(|e| (status_for(&e), Json(ApiResponse::error(e.to_string()))))?;
    Ok(Json(ApiResponse::success(result)))
}

pub async fn get_query_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, (StatusCode, Json<ApiResponse<()>>)> {
    let plan = state.requests.get_query_plan(&id).map_err(|e| (status_for(&e), Json(ApiResponse::error(e.to_string()))))?;
    Ok(Json(ApiResponse::success(plan)))
}
