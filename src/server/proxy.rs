//! Command proxy handler that routes HTTP requests to backend commands
//!
//! A single /api/invoke endpoint routes to the command functions in
//! `crate::commands`. Routing lives in the `routes/` directory.

use super::routes;
use super::ServerAppState;
use crate::commands;
use crate::events::{
    ConsultationCompletedPayload, ConsultationFailedPayload, ConsultationStartedPayload,
    EVENT_CONSULTATION_COMPLETED, EVENT_CONSULTATION_FAILED, EVENT_CONSULTATION_STARTED,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Request body for /api/invoke endpoint
#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    /// Command name (e.g., "create_session", "run_consultation")
    pub cmd: String,
    /// Command arguments as JSON object
    #[serde(default)]
    pub args: Value,
}

/// Response body for /api/invoke endpoint
#[derive(Debug, Serialize)]
pub struct InvokeResponse {
    /// Whether the command succeeded
    pub success: bool,
    /// Result data (on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message (on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error type for invoke handler
pub struct InvokeError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for InvokeError {
    fn into_response(self) -> Response {
        let body = InvokeResponse {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

// =============================================================================
// Main Handler
// =============================================================================

/// Main invoke handler - routes commands to their implementations
pub async fn invoke_handler(
    State(state): State<ServerAppState>,
    Json(req): Json<InvokeRequest>,
) -> Result<Json<InvokeResponse>, InvokeError> {
    log::debug!("Invoke command: {} with args: {:?}", req.cmd, req.args);

    match routes::route_command(&req.cmd, req.args, &state).await {
        Ok(data) => Ok(Json(InvokeResponse {
            success: true,
            data: Some(data),
            error: None,
        })),
        Err(e) => {
            log::warn!("Command {} failed: {}", req.cmd, e);
            Err(InvokeError {
                status: StatusCode::BAD_REQUEST,
                message: e,
            })
        }
    }
}

// =============================================================================
// Server-specific consultation start
// =============================================================================

/// Acknowledgement returned once a consultation has been accepted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationAccepted {
    pub accepted: bool,
    pub session_id: String,
}

/// Validate and claim the session in the request, then run the workflow in a
/// background task. Progress reaches clients through the session stream and
/// the lifecycle events on the broadcaster.
pub async fn start_consultation_server(
    session_id: String,
    text: String,
    state: &ServerAppState,
) -> Result<ConsultationAccepted, String> {
    if state.shutdown_state.is_shutdown_requested() {
        return Err("Server is shutting down".to_string());
    }

    let subject = text.trim().to_string();
    let prepared = commands::prepare_consultation(&state.orchestrator, session_id, text).await?;
    let session_id = prepared.session_id().to_string();

    state.broadcaster.broadcast(
        EVENT_CONSULTATION_STARTED,
        ConsultationStartedPayload {
            session_id: session_id.clone(),
            subject,
        },
    );

    let broadcaster = Arc::clone(&state.broadcaster);
    let run_id = session_id.clone();
    tokio::spawn(async move {
        match prepared.run().await {
            Ok(outcome) => {
                broadcaster.broadcast(
                    EVENT_CONSULTATION_COMPLETED,
                    ConsultationCompletedPayload::from_session(
                        &outcome.session,
                        outcome.persist_failures,
                    ),
                );
            }
            Err(e) => {
                log::error!("Consultation for session {} failed: {}", run_id, e);
                broadcaster.broadcast(
                    EVENT_CONSULTATION_FAILED,
                    ConsultationFailedPayload {
                        session_id: run_id,
                        error: e.to_string(),
                    },
                );
            }
        }
    });

    Ok(ConsultationAccepted {
        accepted: true,
        session_id,
    })
}
