// HTTP request handlers
use crate::application::live_channel::{ConnectionState, LiveChannelError};
use crate::application::session::SessionPhase;
use crate::domain::controller::Command;
use crate::infrastructure::chunked_json::stream_from_watch;
use crate::infrastructure::http_response::{accepts_brotli, json_response};
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown controller {0}")]
    UnknownController(String),
    #[error(transparent)]
    Channel(#[from] LiveChannelError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownController(_) => StatusCode::NOT_FOUND,
            ApiError::Channel(LiveChannelError::EmptyCommand) => StatusCode::BAD_REQUEST,
            ApiError::Channel(LiveChannelError::NotOpen(_) | LiveChannelError::QueueFull) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Channel(LiveChannelError::Encode(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ControllerSummary {
    pub id: String,
    pub href: String,
    pub name: Option<String>,
    pub phase: SessionPhase,
    pub connection: ConnectionState,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// List all known controllers with their session status
pub async fn list_controllers(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let summaries: Vec<ControllerSummary> = state
        .registry
        .read()
        .await
        .iter()
        .map(|(id, entry)| ControllerSummary {
            id: id.clone(),
            href: entry.href.clone(),
            name: entry.session.state().name,
            phase: entry.session.phase(),
            connection: entry.session.connection(),
        })
        .collect();

    json_response(&summaries, accepts_brotli(&headers)).await.into_response()
}

/// Current state of one controller
pub async fn controller_state(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let snapshot = {
        let registry = state.registry.read().await;
        let entry = registry.get(&id).ok_or(ApiError::UnknownController(id))?;
        entry.session.state()
    };
    Ok(json_response(&snapshot, accepts_brotli(&headers)).await.into_response())
}

/// Published chart datasets of one controller
pub async fn controller_chart(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let plot = {
        let registry = state.registry.read().await;
        let entry = registry.get(&id).ok_or(ApiError::UnknownController(id))?;
        entry.chart.borrow().clone()
    };
    Ok(json_response(&plot, accepts_brotli(&headers)).await.into_response())
}

/// Forward an operator command to the controller's live channel
pub async fn send_command(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(command): Json<Command>,
) -> Result<StatusCode, ApiError> {
    let registry = state.registry.read().await;
    let entry = registry.get(&id).ok_or_else(|| ApiError::UnknownController(id.clone()))?;
    entry.session.send_command(&command.clamped())?;
    tracing::info!(controller = %id, "command accepted");
    Ok(StatusCode::ACCEPTED)
}

/// Stream state updates of one controller as newline-delimited JSON
pub async fn stream_state(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let updates = {
        let registry = state.registry.read().await;
        let entry = registry.get(&id).ok_or(ApiError::UnknownController(id))?;
        entry.session.subscribe_state()
    };
    Ok(stream_from_watch(updates).into_response())
}
