use super::{error_response, routes::InvalidateResponse, AppState, JsonResponse};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

pub const SECRET_HEADER: &str = "x-folio-webhook-secret";

/// Body of a CMS publish/unpublish/delete notification.
#[derive(Debug, Deserialize)]
pub struct ContentWebhook {
    #[serde(rename = "_type")]
    pub doc_type: Option<String>,
    #[serde(rename = "_id")]
    pub id: Option<String>,
}

/// Drop cached queries that mention the changed document type. Without a
/// type the whole cache goes.
pub async fn content_published(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<ContentWebhook>,
) -> Response {
    if let Some(expected) = state.webhook_secret.as_deref() {
        let provided = headers.get(SECRET_HEADER).map(|v| v.as_bytes());
        if !provided.is_some_and(|p| secret_matches(p, expected.as_bytes())) {
            warn!("Rejected content webhook with missing or wrong secret");
            return error_response(StatusCode::UNAUTHORIZED, "Invalid webhook secret");
        }
    }

    let removed = match event.doc_type.as_deref().map(str::trim) {
        Some(doc_type) if !doc_type.is_empty() => state.cache.invalidate_matching(doc_type),
        _ => state.cache.invalidate_all(),
    };

    info!(
        doc_type = event.doc_type.as_deref().unwrap_or("*"),
        id = event.id.as_deref().unwrap_or("-"),
        removed,
        "content webhook"
    );

    Json(JsonResponse::ok(InvalidateResponse { removed })).into_response()
}

/// Compare without an early exit on the first differing byte.
fn secret_matches(provided: &[u8], expected: &[u8]) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (a, b) in provided.iter().zip(expected) {
        diff |= a ^ b;
    }
    diff == 0
}
