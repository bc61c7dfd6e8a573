// Shared doubles for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use consult_agents_lib::datastore::{
    Datastore, DatastoreError, InMemoryDatastore, SessionSubscription,
};
use consult_agents_lib::generation::{
    GenerateOptions, Generation, GenerationClient, GenerationError,
};
use consult_agents_lib::models::{NewSession, Session, SessionPatch};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted generation outcome
pub enum Step {
    Text(String),
    Fail(GenerationError),
    /// Never answers; exercises the policy timeout
    Hang,
}

/// Generation stub that plays a script, then falls back to
/// `finding-<n>` for research calls and `report-text` for the report.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(String, GenerateOptions)>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn fallback() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, GenerateOptions)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, GenerationError> {
        let research_calls = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((prompt.to_string(), *options));
            calls.iter().filter(|(_, o)| o.web_search).count()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Text(text)) => Ok(Generation::text(text)),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Generation::default())
            }
            None if options.web_search => Ok(Generation::text(format!(
                "finding-{}",
                research_calls
            ))),
            None => Ok(Generation::text("report-text")),
        }
    }
}

/// In-memory store whose updates fail on demand.
/// Attempts are counted from 0 across every `update_session` call.
pub struct FlakyDatastore {
    inner: InMemoryDatastore,
    failing_attempts: HashSet<usize>,
    fail_from: Option<usize>,
    attempts: Mutex<usize>,
}

impl FlakyDatastore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryDatastore::new(),
            failing_attempts: HashSet::new(),
            fail_from: None,
            attempts: Mutex::new(0),
        }
    }

    pub fn failing_attempts(mut self, attempts: impl IntoIterator<Item = usize>) -> Self {
        self.failing_attempts = attempts.into_iter().collect();
        self
    }

    pub fn failing_from(mut self, attempt: usize) -> Self {
        self.fail_from = Some(attempt);
        self
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Datastore for FlakyDatastore {
    async fn read_session(&self, id: &str) -> Result<Session, DatastoreError> {
        self.inner.read_session(id).await
    }

    async fn update_session(
        &self,
        id: &str,
        patch: &SessionPatch,
    ) -> Result<Session, DatastoreError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let current = *attempts;
            *attempts += 1;
            current
        };

        let fails = self.failing_attempts.contains(&attempt)
            || self.fail_from.is_some_and(|from| attempt >= from);
        if fails {
            return Err(DatastoreError::Backend(format!(
                "injected failure on attempt {}",
                attempt
            )));
        }
        self.inner.update_session(id, patch).await
    }

    async fn insert_session(&self, new_session: &NewSession) -> Result<Session, DatastoreError> {
        self.inner.insert_session(new_session).await
    }

    fn subscribe(&self, id: &str) -> SessionSubscription {
        self.inner.subscribe(id)
    }
}
