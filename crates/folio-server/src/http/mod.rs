mod routes;
pub mod webhook;

pub use routes::create_router;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use folio_core::{ContentCache, DynSource};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Cache type shared across HTTP handlers
pub type HttpCache = ContentCache<DynSource>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cache: HttpCache,
    pub webhook_secret: Option<Arc<str>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(cache: HttpCache, webhook_secret: Option<String>) -> Self {
        Self {
            cache,
            webhook_secret: webhook_secret.map(Arc::from),
            start_time: Instant::now(),
        }
    }
}

/// JSON response wrapper
#[derive(Serialize)]
pub struct JsonResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Error response with an explicit status code.
pub fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(JsonResponse::<()>::err(msg))).into_response()
}
