// Event types pushed to realtime clients

use crate::models::{Session, WorkflowState};
use serde::{Deserialize, Serialize};

// Event name constants
pub const EVENT_SESSION_UPDATED: &str = "session:updated";
pub const EVENT_CONSULTATION_STARTED: &str = "consultation:started";
pub const EVENT_CONSULTATION_COMPLETED: &str = "consultation:completed";
pub const EVENT_CONSULTATION_FAILED: &str = "consultation:failed";

/// Payload for consultation started events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationStartedPayload {
    pub session_id: String,
    pub subject: String,
}

/// Payload for consultation completed events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationCompletedPayload {
    pub session_id: String,
    pub final_state: WorkflowState,
    pub research_count: usize,
    /// Updates that could not be persisted (only under the `continue` policy)
    pub persist_failures: u32,
}

impl ConsultationCompletedPayload {
    pub fn from_session(session: &Session, persist_failures: u32) -> Self {
        Self {
            session_id: session.id.clone(),
            final_state: session.current_state,
            research_count: session.research_results.len(),
            persist_failures,
        }
    }
}

/// Payload for consultation failed events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationFailedPayload {
    pub session_id: String,
    pub error: String,
}

/// Session id an event payload refers to, if any
pub fn payload_session_id(payload: &serde_json::Value) -> Option<&str> {
    payload.get("sessionId").and_then(|v| v.as_str())
}
