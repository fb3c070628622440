//! Routes.
//!
//! Every body carries a `code` field and the HTTP status always equals it.
//! CORS origins come from `ServerConfig::cors_origins`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use fixq_core::app::{Admission, RequestLifecycle, StatusService};
use fixq_core::config::ServerConfig;
use fixq_core::domain::{RequestId, Topics};
use fixq_core::error::QueueError;
use fixq_core::ports::{ErrorLog, QueueBackend, TracingErrorLog, log_safe};

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<RequestLifecycle>,
    pub status: Arc<StatusService>,
    pub backend: Arc<dyn QueueBackend>,
    pub error_log: Arc<dyn ErrorLog>,
}

impl AppState {
    pub fn new(backend: Arc<dyn QueueBackend>, topics: Topics) -> Self {
        Self {
            lifecycle: Arc::new(RequestLifecycle::new(backend.clone(), topics.clone())),
            status: Arc::new(StatusService::new(backend.clone(), topics)),
            backend,
            error_log: Arc::new(TracingErrorLog),
        }
    }

    pub fn with_error_log(mut self, error_log: Arc<dyn ErrorLog>) -> Self {
        self.error_log = error_log;
        self
    }
}

pub fn router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health))
        .route("/enqueue/{request_id}", get(enqueue))
        .route("/retry/{request_id}", get(retry))
        .route("/status/{request_id}", get(request_status))
        .route("/pending", get(pending))
        .layer(cors_layer(&server.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `*` anywhere in `origins` allows every origin; otherwise only the listed
/// ones. Unparseable entries are skipped.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o.trim() == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

fn respond(code: u16, mut body: Value) -> Response {
    if let Value::Object(map) = &mut body {
        map.insert("code".to_string(), code.into());
    }
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

fn failure(
    state: &AppState,
    function: &str,
    request_id: Option<&RequestId>,
    err: &QueueError,
) -> Response {
    log_safe(state.error_log.as_ref(), function, err);
    let mut body = json!({ "status": "error", "message": err.to_string() });
    if let Some(request_id) = request_id {
        body["request_id"] = json!(request_id);
    }
    respond(err.http_code(), body)
}

fn admission_response(admission: Admission) -> Response {
    match admission {
        Admission::Admitted {
            request_id,
            retry_count,
        } => respond(
            202,
            json!({
                "request_id": request_id,
                "status": "queued",
                "retry_count": retry_count,
                "message": "request queued",
            }),
        ),
        Admission::AlreadyCompleted { request_id, .. } => respond(
            200,
            json!({
                "request_id": request_id,
                "status": "completed",
                "message": "already completed",
            }),
        ),
        Admission::InProgress {
            request_id, status, ..
        } => respond(
            409,
            json!({
                "request_id": request_id,
                "status": status,
                "message": "already in progress",
            }),
        ),
    }
}

async fn welcome() -> Response {
    respond(
        200,
        json!({ "message": "fixq: submit code-repair requests via /enqueue/{request_id}" }),
    )
}

async fn health(State(state): State<AppState>) -> Response {
    let backend = state.backend.kind();
    match state.status.check().await {
        Ok(()) => respond(200, json!({ "backend": backend, "status": "ok" })),
        Err(e) => {
            warn!(%backend, error = %e, "health check failed");
            respond(
                503,
                json!({
                    "backend": backend,
                    "status": "unavailable",
                    "message": e.to_string(),
                }),
            )
        }
    }
}

async fn enqueue(State(state): State<AppState>, Path(request_id): Path<String>) -> Response {
    let request_id = RequestId::from(request_id);
    match state.lifecycle.submit(&request_id).await {
        Ok(admission) => admission_response(admission),
        Err(e) => failure(&state, "enqueue", Some(&request_id), &e),
    }
}

async fn retry(State(state): State<AppState>, Path(request_id): Path<String>) -> Response {
    let request_id = RequestId::from(request_id);
    match state.lifecycle.retry(&request_id).await {
        Ok(admission) => admission_response(admission),
        Err(e) => failure(&state, "retry", Some(&request_id), &e),
    }
}

async fn request_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Response {
    let request_id = RequestId::from(request_id);
    match state.status.request_status(&request_id).await {
        Ok(Some(view)) => match serde_json::to_value(&view) {
            Ok(body) => respond(200, body),
            Err(e) => failure(&state, "request_status", Some(&request_id), &e.into()),
        },
        Ok(None) => respond(404, json!({ "request_id": request_id, "status": "not_found" })),
        Err(e) => failure(&state, "request_status", Some(&request_id), &e),
    }
}

async fn pending(State(state): State<AppState>) -> Response {
    match state.status.pending().await {
        Ok(pending) => respond(200, json!({ "pending_requests": pending })),
        Err(e) => failure(&state, "pending", None, &e),
    }
}
