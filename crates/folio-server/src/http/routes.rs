use super::{error_response, webhook, AppState, JsonResponse};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use folio_core::{CacheStats, EntrySummary, FetchStatus, QueryParams};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/query", post(run_query))
        .route("/cache", delete(invalidate))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/entries", get(cache_entries))
        .route("/webhooks/content", post(webhook::content_published))
        .with_state(state)
}

// --- Health ---

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    version: String,
    uptime_seconds: u64,
    cache_entries: usize,
}

async fn health(State(state): State<AppState>) -> Json<JsonResponse<HealthResponse>> {
    Json(JsonResponse::ok(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        cache_entries: state.cache.len(),
    }))
}

// --- Query ---

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    params: Option<QueryParams>,
}

#[derive(Serialize)]
struct QueryResponse {
    status: FetchStatus,
    result: Option<Value>,
}

/// Answer a CMS query through the cache. Source failures never become HTTP
/// errors: the caller gets `status: "stale"` or `status: "unavailable"`.
async fn run_query(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> Response {
    if req.query.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "query must not be empty");
    }

    let fetched = state.cache.fetch(&req.query, req.params.as_ref()).await;
    let status = fetched.status();
    let result = fetched.into_data().map(|data| Value::clone(&data));

    Json(JsonResponse::ok(QueryResponse { status, result })).into_response()
}

// --- Cache management ---

async fn cache_stats(State(state): State<AppState>) -> Json<JsonResponse<CacheStats>> {
    Json(JsonResponse::ok(state.cache.stats()))
}

async fn cache_entries(State(state): State<AppState>) -> Json<JsonResponse<Vec<EntrySummary>>> {
    Json(JsonResponse::ok(state.cache.entries()))
}

#[derive(Deserialize)]
struct InvalidateParams {
    pattern: Option<String>,
}

#[derive(Serialize)]
pub(super) struct InvalidateResponse {
    pub removed: usize,
}

async fn invalidate(
    State(state): State<AppState>,
    Query(params): Query<InvalidateParams>,
) -> Response {
    let removed = match params.pattern.as_deref() {
        Some("") => {
            return error_response(StatusCode::BAD_REQUEST, "pattern must not be empty");
        }
        Some(pattern) => state.cache.invalidate_matching(pattern),
        None => state.cache.invalidate_all(),
    };

    Json(JsonResponse::ok(InvalidateResponse { removed })).into_response()
}
