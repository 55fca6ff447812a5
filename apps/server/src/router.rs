use crate::listeners::TaskEvent;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use notice_bus::{EventBus, EventBusError};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tower_http::trace::TraceLayer;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AppState {
    pub bus: EventBus,
}

#[notice_derive::notice_error]
pub enum ApiError {
    #[error("Bad request{}: {message}", format_context(.context))]
    BadRequest { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("{source}{}", format_context(.context))]
    Bus { source: EventBusError, context: Option<Cow<'static, str>> },
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } | Self::Bus { source: EventBusError::InvalidEnvelope { .. }, .. } => {
                StatusCode::BAD_REQUEST
            },
            Self::Bus { source: EventBusError::NoSubscribers { .. }, .. } => StatusCode::NOT_FOUND,
            Self::Bus { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DoParams {
    task_id: Option<String>,
}

/// Posts a [`TaskEvent`] routed by its own task id.
async fn do_event(
    State(state): State<AppState>,
    Query(params): Query<DoParams>,
) -> Result<&'static str, ApiError> {
    let task_id = params.task_id.filter(|id| !id.trim().is_empty()).ok_or(ApiError::BadRequest {
        message: "taskId is required".into(),
        context: None,
    })?;

    debug!(task_id = %task_id, "posting task");
    state.bus.post_event(task_id.clone(), TaskEvent { task_id })?;
    Ok("SUCCESS")
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"), (header::PRAGMA, "no-cache")],
        Json(HealthResponse { status: "up", version: env!("CARGO_PKG_VERSION") }),
    )
}

pub fn init(state: AppState) -> Router {
    Router::new()
        .route("/event/do", post(do_event))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
