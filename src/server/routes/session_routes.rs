//! Session-related command routing
//!
//! Handles: create_session, get_session, get_session_status, run_consultation

use crate::commands;
use serde_json::Value;

use super::{get_arg, get_opt_arg, route_async, start_consultation_server, ServerAppState};

/// Check if a command is a session command
pub fn is_session_command(cmd: &str) -> bool {
    matches!(
        cmd,
        "create_session" | "get_session" | "get_session_status" | "run_consultation"
    )
}

/// Route session-related commands
pub async fn route_session_command(
    cmd: &str,
    args: Value,
    state: &ServerAppState,
) -> Result<Value, String> {
    match cmd {
        "create_session" => {
            let user_id: Option<String> = get_opt_arg(&args, "userId")?;
            route_async!(
                cmd,
                commands::create_session(&state.orchestrator, user_id)
            )
        }

        "get_session" => {
            let id: String = get_arg(&args, "id")?;
            route_async!(cmd, commands::get_session(state.datastore.as_ref(), id))
        }

        "get_session_status" => {
            let id: String = get_arg(&args, "id")?;
            route_async!(cmd, commands::get_session_status(&state.orchestrator, id))
        }

        "run_consultation" => {
            let session_id: String = get_arg(&args, "sessionId")?;
            let text: String = get_arg(&args, "text")?;
            route_async!(cmd, start_consultation_server(session_id, text, state))
        }

        _ => Err(format!("Unknown session command: {}", cmd)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::InMemoryDatastore;
    use crate::events::EVENT_CONSULTATION_COMPLETED;
    use crate::generation::{GenerateOptions, Generation, GenerationClient, GenerationError};
    use crate::models::WorkflowState;
    use crate::orchestrator::{ConsultationOrchestrator, WorkflowPolicy};
    use crate::server::routes::route_command;
    use crate::shutdown::ShutdownState;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    struct Canned;

    #[async_trait]
    impl GenerationClient for Canned {
        async fn generate(
            &self,
            _prompt: &str,
            options: &GenerateOptions,
        ) -> Result<Generation, GenerationError> {
            let text = if options.web_search { "finding" } else { "report" };
            Ok(Generation::text(text))
        }
    }

    fn state() -> ServerAppState {
        let orchestrator = ConsultationOrchestrator::new(
            Arc::new(InMemoryDatastore::new()),
            Arc::new(Canned),
            WorkflowPolicy::default(),
        )
        .unwrap();
        ServerAppState::new(
            "token".to_string(),
            Arc::new(orchestrator),
            ShutdownState::new(),
        )
    }

    #[test]
    fn test_is_session_command() {
        assert!(is_session_command("run_consultation"));
        assert!(!is_session_command("delete_session"));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let state = state();
        let err = route_command("delete_session", json!({}), &state)
            .await
            .unwrap_err();
        assert_eq!(err, "Unknown command: delete_session");
    }

    #[tokio::test]
    async fn test_create_then_get_session() {
        let state = state();
        let created = route_command("create_session", json!({"userId": "u-1"}), &state)
            .await
            .unwrap();
        assert_eq!(created["user_id"], "u-1");
        assert_eq!(created["current_state"], "WAITING_FOR_INFO");

        let id = created["id"].as_str().unwrap().to_string();
        let fetched = route_command("get_session", json!({"id": id}), &state)
            .await
            .unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_run_consultation_runs_in_background() {
        let state = state();
        let mut events = state.broadcaster.subscribe();
        let created = route_command("create_session", json!({}), &state)
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let ack = route_command(
            "run_consultation",
            json!({"sessionId": id, "text": "Acme Corp"}),
            &state,
        )
        .await
        .unwrap();
        assert_eq!(ack["accepted"], true);
        assert_eq!(ack["sessionId"], id.as_str());

        let completed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                if event.event == EVENT_CONSULTATION_COMPLETED {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(completed.payload["finalState"], "FINISHED");

        let session = state.datastore.read_session(&id).await.unwrap();
        assert_eq!(session.current_state, WorkflowState::Finished);
        assert_eq!(session.report_final, "report");
    }

    #[tokio::test]
    async fn test_run_consultation_rejects_missing_session() {
        let state = state();
        let err = route_command(
            "run_consultation",
            json!({"sessionId": "missing", "text": "Acme"}),
            &state,
        )
        .await
        .unwrap_err();
        assert!(err.contains("missing"));
    }

    #[tokio::test]
    async fn test_run_consultation_refused_during_shutdown() {
        let state = state();
        state.shutdown_state.request_shutdown();
        let err = route_command(
            "run_consultation",
            json!({"sessionId": "any", "text": "Acme"}),
            &state,
        )
        .await
        .unwrap_err();
        assert_eq!(err, "Server is shutting down");
    }
}
