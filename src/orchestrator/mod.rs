//! Consultation orchestrator
//!
//! Drives one session through the linear workflow
//! `WAITING_FOR_INFO -> START_RESEARCH -> START_REPORT -> FINISHED`:
//! - records the user's subject
//! - lets Pedro run a fixed number of web-grounded research iterations
//! - lets Juan turn the findings into an executive report
//!
//! Every intermediate step is written to the datastore so a subscribed UI
//! can follow the run live. Generation failures never stop a run; they are
//! persisted as findings that start with [`ERROR_MARKER`].

pub mod agents;
pub mod findings;
pub mod policy;

pub use findings::{is_error_content, ERROR_MARKER};
pub use policy::{PersistFailureAction, PolicyError, WorkflowPolicy};

use crate::datastore::{Datastore, DatastoreError};
use crate::generation::{
    GenerateOptions, Generation, GenerationClient, GenerationError, GenerationErrorKind,
};
use crate::models::{
    transition_state, Message, NewSession, Session, SessionPatch, StateTransitionError,
    WorkflowState,
};
use crate::templates::{PromptTemplates, ResearchContext, SynthesisContext};
use crate::utils::{lock_mutex_recover, truncate_for_log};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Why a consultation run was rejected or stopped
#[derive(Debug, Error)]
pub enum ConsultationError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session {session_id} is busy: {reason}")]
    SessionBusy { session_id: String, reason: String },

    #[error("Failed to persist session {session_id} while trying to {step}: {source}")]
    Persistence {
        session_id: String,
        step: &'static str,
        #[source]
        source: DatastoreError,
    },

    #[error(transparent)]
    Transition(#[from] StateTransitionError),

    #[error("Invalid workflow policy: {0}")]
    InvalidPolicy(#[from] PolicyError),

    #[error("Failed to load prompt templates: {0}")]
    Templates(String),
}

impl ConsultationError {
    /// Errors raised before anything was written
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ConsultationError::SessionNotFound(_)
                | ConsultationError::InvalidInput(_)
                | ConsultationError::SessionBusy { .. }
        )
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct ConsultationOutcome {
    /// Final state as held by the orchestrator
    pub session: Session,
    /// Updates dropped under [`PersistFailureAction::Continue`]
    pub persist_failures: u32,
}

/// Sessions with a run in flight in this process
type ActiveRuns = Arc<Mutex<HashSet<String>>>;

/// Releases the active-run claim on drop
struct ActiveRunGuard {
    runs: ActiveRuns,
    session_id: String,
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        lock_mutex_recover(&self.runs).remove(&self.session_id);
    }
}

/// A validated run that has claimed its session and not yet started writing
pub struct PreparedRun {
    orchestrator: Arc<ConsultationOrchestrator>,
    session: Session,
    user_text: String,
    _guard: ActiveRunGuard,
}

impl PreparedRun {
    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    /// Run the workflow to completion
    pub async fn run(self) -> Result<ConsultationOutcome, ConsultationError> {
        let PreparedRun {
            orchestrator,
            session,
            user_text,
            _guard,
        } = self;
        orchestrator.execute(session, user_text).await
    }
}

/// Sequences the two agents over one session at a time
pub struct ConsultationOrchestrator {
    datastore: Arc<dyn Datastore>,
    generator: Arc<dyn GenerationClient>,
    templates: PromptTemplates,
    policy: WorkflowPolicy,
    active_runs: ActiveRuns,
}

impl ConsultationOrchestrator {
    /// Build an orchestrator with the builtin prompt templates
    pub fn new(
        datastore: Arc<dyn Datastore>,
        generator: Arc<dyn GenerationClient>,
        policy: WorkflowPolicy,
    ) -> Result<Self, ConsultationError> {
        let templates = PromptTemplates::builtin()
            .map_err(|e| ConsultationError::Templates(e.to_string()))?;
        Ok(Self::with_templates(datastore, generator, policy, templates))
    }

    pub fn with_templates(
        datastore: Arc<dyn Datastore>,
        generator: Arc<dyn GenerationClient>,
        policy: WorkflowPolicy,
        templates: PromptTemplates,
    ) -> Self {
        Self {
            datastore,
            generator,
            templates,
            policy,
            active_runs: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    /// Whether a run for `session_id` is in flight in this process
    pub fn is_running(&self, session_id: &str) -> bool {
        lock_mutex_recover(&self.active_runs).contains(session_id)
    }

    /// Number of runs in flight in this process
    pub fn active_run_count(&self) -> usize {
        lock_mutex_recover(&self.active_runs).len()
    }

    /// Insert a fresh session. Without a user id an anonymous one is generated.
    pub async fn create_session(&self, user_id: Option<&str>) -> Result<Session, DatastoreError> {
        let new_session = match user_id {
            Some(id) if !id.trim().is_empty() => NewSession::new(id.trim()),
            _ => NewSession::anonymous(),
        };
        let session = self.datastore.insert_session(&new_session).await?;
        log::info!(
            "Created session {} for user {}",
            session.id,
            session.user_id
        );
        Ok(session)
    }

    /// Run a full consultation for `session_id` with the user's subject.
    ///
    /// Rejections (`SessionNotFound`, `InvalidInput`, `SessionBusy`) happen
    /// before any write.
    pub async fn run_consultation(
        &self,
        session_id: &str,
        user_text: &str,
    ) -> Result<(), ConsultationError> {
        let user_text = validate_input(user_text)?;
        let _guard = self.claim(session_id)?;
        let session = self.load_waiting(session_id).await?;
        self.execute(session, user_text).await.map(|_| ())
    }

    /// Validate and claim a session, so the caller can reject synchronously
    /// and run the workflow elsewhere (e.g. a spawned task)
    pub async fn prepare(
        self: &Arc<Self>,
        session_id: &str,
        user_text: &str,
    ) -> Result<PreparedRun, ConsultationError> {
        let user_text = validate_input(user_text)?;
        let guard = self.claim(session_id)?;
        let session = self.load_waiting(session_id).await?;

        Ok(PreparedRun {
            orchestrator: Arc::clone(self),
            session,
            user_text,
            _guard: guard,
        })
    }

    fn claim(&self, session_id: &str) -> Result<ActiveRunGuard, ConsultationError> {
        let mut runs = lock_mutex_recover(&self.active_runs);
        if !runs.insert(session_id.to_string()) {
            log::warn!("Rejected second run for session {}", session_id);
            return Err(ConsultationError::SessionBusy {
                session_id: session_id.to_string(),
                reason: "a consultation is already running".to_string(),
            });
        }

        Ok(ActiveRunGuard {
            runs: Arc::clone(&self.active_runs),
            session_id: session_id.to_string(),
        })
    }

    async fn load_waiting(&self, session_id: &str) -> Result<Session, ConsultationError> {
        let session = self.datastore.read_session(session_id).await.map_err(|e| {
            log::error!("Could not load session {}: {}", session_id, e);
            ConsultationError::SessionNotFound(session_id.to_string())
        })?;

        if !session.accepts_input() {
            return Err(ConsultationError::SessionBusy {
                session_id: session_id.to_string(),
                reason: format!("state is {}", session.current_state),
            });
        }

        Ok(session)
    }

    async fn execute(
        &self,
        mut session: Session,
        user_text: String,
    ) -> Result<ConsultationOutcome, ConsultationError> {
        let id = session.id.clone();
        let mut writer = SessionWriter {
            datastore: self.datastore.as_ref(),
            policy: &self.policy,
            session_id: &id,
            failures: 0,
        };
        let iterations = self.policy.research_iterations();

        log::info!(
            "Starting consultation for session {} on \"{}\" ({} research iterations)",
            id,
            truncate_for_log(&user_text, 60),
            iterations
        );

        // User turn
        session.chat_history.push(Message::user(&user_text));
        writer
            .persist(
                "record the user message",
                SessionPatch::new().chat_history(session.chat_history.clone()),
            )
            .await?;

        // Research
        session.current_state =
            transition_state(session.current_state, WorkflowState::StartResearch)?;
        session.company_info = user_text.clone();
        writer
            .persist(
                "enter research",
                SessionPatch::new()
                    .company_info(&session.company_info)
                    .current_state(session.current_state),
            )
            .await?;
        log::info!("Session {} -> {}", id, session.current_state);

        session.chat_history.push(agents::acknowledgement(&user_text));
        writer
            .persist(
                "record the acknowledgement",
                SessionPatch::new().chat_history(session.chat_history.clone()),
            )
            .await?;

        for i in 0..iterations {
            session.research_counter = i;
            writer
                .persist(
                    "record research progress",
                    SessionPatch::new().research_counter(i),
                )
                .await?;

            let prompt = self.templates.render_research(&ResearchContext {
                subject: &user_text,
                iteration: i + 1,
                total_iterations: iterations,
            });
            let result = self.generate(prompt, GenerateOptions::research()).await;
            if let Err(err) = &result {
                log::warn!(
                    "Research iteration {} for session {} failed: {}",
                    i + 1,
                    id,
                    err
                );
            }
            let finding = findings::research_text(result);

            session.research_results.push(finding.clone());
            session.research_counter = i + 1;
            writer
                .persist(
                    "store a research result",
                    SessionPatch::new()
                        .research_results(session.research_results.clone())
                        .research_counter(session.research_counter),
                )
                .await?;

            session.chat_history.push(agents::finding(i + 1, &finding));
            writer
                .persist(
                    "record a finding",
                    SessionPatch::new().chat_history(session.chat_history.clone()),
                )
                .await?;
        }

        // Report
        session.current_state =
            transition_state(session.current_state, WorkflowState::StartReport)?;
        writer
            .persist(
                "enter reporting",
                SessionPatch::new().current_state(session.current_state),
            )
            .await?;
        log::info!("Session {} -> {}", id, session.current_state);

        session.chat_history.push(agents::hand_off());
        writer
            .persist(
                "record the hand-off",
                SessionPatch::new().chat_history(session.chat_history.clone()),
            )
            .await?;

        let prompt = self.templates.render_synthesis(&SynthesisContext {
            subject: &user_text,
            findings: &session.research_results,
        });
        let result = self.generate(prompt, GenerateOptions::synthesis()).await;
        if let Err(err) = &result {
            log::warn!("Report synthesis for session {} failed: {}", id, err);
        }
        let report = findings::report_text(result);

        // Finalize
        session.chat_history.push(agents::delivery());
        session.report_final = report;
        session.current_state = transition_state(session.current_state, WorkflowState::Finished)?;
        writer
            .persist(
                "store the final report",
                SessionPatch::new()
                    .report_final(&session.report_final)
                    .current_state(session.current_state)
                    .chat_history(session.chat_history.clone()),
            )
            .await?;
        log::info!("Session {} -> {}", id, session.current_state);

        let persist_failures = writer.failures;
        if persist_failures > 0 {
            log::warn!(
                "Session {} finished with {} unpersisted updates",
                id,
                persist_failures
            );
        }

        Ok(ConsultationOutcome {
            session,
            persist_failures,
        })
    }

    /// One generation call bounded by the policy timeout
    async fn generate(
        &self,
        prompt: Result<String, tera::Error>,
        options: GenerateOptions,
    ) -> Result<Generation, GenerationError> {
        let prompt = prompt.map_err(|e| {
            GenerationError::new(
                GenerationErrorKind::Unknown,
                format!("Failed to render prompt: {}", e),
            )
        })?;

        let timeout = self.policy.generation_timeout();
        match tokio::time::timeout(timeout, self.generator.generate(&prompt, &options)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::timeout(timeout)),
        }
    }
}

/// Applies the persistence policy to each update of one run
struct SessionWriter<'a> {
    datastore: &'a dyn Datastore,
    policy: &'a WorkflowPolicy,
    session_id: &'a str,
    failures: u32,
}

impl SessionWriter<'_> {
    async fn persist(
        &mut self,
        step: &'static str,
        patch: SessionPatch,
    ) -> Result<(), ConsultationError> {
        let max_attempts = self.policy.persist_max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.datastore.update_session(self.session_id, &patch).await {
                Ok(_) => return Ok(()),
                Err(err) => err,
            };

            // A vanished record will not come back by retrying
            if attempt < max_attempts && !err.is_not_found() {
                let delay = self.policy.backoff_for(attempt);
                log::warn!(
                    "Failed to {} for session {} (attempt {}/{}), retrying in {}ms: {}",
                    step,
                    self.session_id,
                    attempt,
                    max_attempts,
                    delay.as_millis(),
                    err
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return match self.policy.on_persist_failure() {
                PersistFailureAction::Abort => {
                    log::error!(
                        "Failed to {} for session {}, aborting run: {}",
                        step,
                        self.session_id,
                        err
                    );
                    Err(ConsultationError::Persistence {
                        session_id: self.session_id.to_string(),
                        step,
                        source: err,
                    })
                }
                PersistFailureAction::Continue => {
                    self.failures += 1;
                    log::warn!(
                        "Failed to {} for session {}, continuing: {}",
                        step,
                        self.session_id,
                        err
                    );
                    Ok(())
                }
            };
        }
    }
}

fn validate_input(user_text: &str) -> Result<String, ConsultationError> {
    let trimmed = user_text.trim();
    if trimmed.is_empty() {
        return Err(ConsultationError::InvalidInput(
            "a company or topic is required".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::InMemoryDatastore;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl GenerationClient for Echo {
        async fn generate(
            &self,
            _prompt: &str,
            options: &GenerateOptions,
        ) -> Result<Generation, GenerationError> {
            if options.web_search {
                Ok(Generation::text("finding"))
            } else {
                Ok(Generation::text("report"))
            }
        }
    }

    fn orchestrator(store: Arc<InMemoryDatastore>) -> Arc<ConsultationOrchestrator> {
        Arc::new(
            ConsultationOrchestrator::new(store, Arc::new(Echo), WorkflowPolicy::default())
                .unwrap(),
        )
    }

    #[test]
    fn test_validate_input_trims() {
        assert_eq!(validate_input("  Acme ").unwrap(), "Acme");
        assert!(matches!(
            validate_input(" \n "),
            Err(ConsultationError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_create_session_generates_anonymous_user() {
        let store = Arc::new(InMemoryDatastore::new());
        let orch = orchestrator(store.clone());

        let named = orch.create_session(Some("u-1")).await.unwrap();
        assert_eq!(named.user_id, "u-1");

        let anonymous = orch.create_session(None).await.unwrap();
        assert!(uuid::Uuid::parse_str(&anonymous.user_id).is_ok());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_prepared_run_holds_claim_until_dropped() {
        let store = Arc::new(InMemoryDatastore::new());
        let orch = orchestrator(store.clone());
        let session = orch.create_session(Some("u-1")).await.unwrap();

        let prepared = orch.prepare(&session.id, "Acme").await.unwrap();
        assert!(orch.is_running(&session.id));
        assert!(matches!(
            orch.prepare(&session.id, "Acme").await,
            Err(ConsultationError::SessionBusy { .. })
        ));

        drop(prepared);
        assert!(!orch.is_running(&session.id));
    }

    #[tokio::test]
    async fn test_prepared_run_completes() {
        let store = Arc::new(InMemoryDatastore::new());
        let orch = orchestrator(store.clone());
        let session = orch.create_session(Some("u-1")).await.unwrap();

        let outcome = orch
            .prepare(&session.id, "Acme")
            .await
            .unwrap()
            .run()
            .await
            .unwrap();

        assert!(outcome.session.is_finished());
        assert_eq!(outcome.persist_failures, 0);
        assert_eq!(store.read_session(&session.id).await.unwrap(), outcome.session);
        assert!(!orch.is_running(&session.id));
    }

    #[test]
    fn test_rejections_are_classified() {
        assert!(ConsultationError::SessionNotFound("x".into()).is_rejection());
        assert!(!ConsultationError::Templates("x".into()).is_rejection());
    }
}
