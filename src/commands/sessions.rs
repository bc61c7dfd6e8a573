// Session-related commands
// Errors are flattened to strings for the command proxy

use crate::datastore::Datastore;
use crate::models::{Session, WorkflowState};
use crate::orchestrator::{ConsultationOrchestrator, PreparedRun};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Workflow position of a session, for status displays
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,
    pub state: WorkflowState,
    pub display_name: String,
    pub research_counter: u32,
    /// A run for this session is in flight in this process
    pub running: bool,
}

/// Create a new session, generating an anonymous user id when none is given
pub async fn create_session(
    orchestrator: &ConsultationOrchestrator,
    user_id: Option<String>,
) -> Result<Session, String> {
    orchestrator
        .create_session(user_id.as_deref())
        .await
        .map_err(|e| format!("Failed to create session: {}", e))
}

/// Get a specific session by ID
pub async fn get_session(datastore: &dyn Datastore, id: String) -> Result<Session, String> {
    datastore.read_session(&id).await.map_err(|e| e.to_string())
}

/// Get the workflow status of a session
pub async fn get_session_status(
    orchestrator: &ConsultationOrchestrator,
    id: String,
) -> Result<SessionStatus, String> {
    let session = get_session(orchestrator.datastore().as_ref(), id).await?;
    Ok(SessionStatus {
        running: orchestrator.is_running(&session.id),
        display_name: session.current_state.display_name().to_string(),
        state: session.current_state,
        research_counter: session.research_counter,
        session_id: session.id,
    })
}

/// Validate and claim a session for a consultation run.
/// Rejections (missing session, empty text, busy session) surface here.
pub async fn prepare_consultation(
    orchestrator: &Arc<ConsultationOrchestrator>,
    session_id: String,
    text: String,
) -> Result<PreparedRun, String> {
    orchestrator
        .prepare(&session_id, &text)
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::InMemoryDatastore;
    use crate::generation::{
        GenerateOptions, Generation, GenerationClient, GenerationError,
    };
    use crate::orchestrator::WorkflowPolicy;
    use async_trait::async_trait;

    struct Silent;

    #[async_trait]
    impl GenerationClient for Silent {
        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> Result<Generation, GenerationError> {
            Ok(Generation::default())
        }
    }

    fn orchestrator() -> Arc<ConsultationOrchestrator> {
        Arc::new(
            ConsultationOrchestrator::new(
                Arc::new(InMemoryDatastore::new()),
                Arc::new(Silent),
                WorkflowPolicy::default(),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_get_missing_session_is_error_string() {
        let orch = orchestrator();
        let err = get_session(orch.datastore().as_ref(), "nope".to_string())
            .await
            .unwrap_err();
        assert!(err.contains("not found"));
    }

    #[tokio::test]
    async fn test_status_of_new_session() {
        let orch = orchestrator();
        let session = create_session(&orch, Some("u-1".to_string())).await.unwrap();

        let status = get_session_status(&orch, session.id.clone()).await.unwrap();
        assert_eq!(status.state, WorkflowState::WaitingForInfo);
        assert_eq!(status.display_name, "Waiting for instructions");
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_prepare_rejects_empty_text() {
        let orch = orchestrator();
        let session = create_session(&orch, None).await.unwrap();

        let err = prepare_consultation(&orch, session.id, "   ".to_string())
            .await
            .err()
            .unwrap();
        assert!(err.starts_with("Invalid input"));
    }
}
