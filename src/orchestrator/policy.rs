// Workflow tuning knobs with validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Allowed number of research iterations per run
pub const RESEARCH_ITERATIONS_RANGE: RangeInclusive<u32> = 1..=10;

pub const DEFAULT_RESEARCH_ITERATIONS: u32 = 2;
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_PERSIST_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_PERSIST_BACKOFF_MS: u64 = 250;

/// What to do when a session update still fails after every retry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistFailureAction {
    /// Stop the run; the last persisted prefix stays visible
    #[default]
    Abort,
    /// Log, count the failure and carry on with the locally held state
    Continue,
}

impl fmt::Display for PersistFailureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistFailureAction::Abort => write!(f, "abort"),
            PersistFailureAction::Continue => write!(f, "continue"),
        }
    }
}

impl std::str::FromStr for PersistFailureAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(PersistFailureAction::Abort),
            "continue" => Ok(PersistFailureAction::Continue),
            other => Err(format!(
                "Unknown persist failure action '{}'. Expected abort or continue",
                other
            )),
        }
    }
}

/// Rejected policy values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("research_iterations must be between {min} and {max}, got {got}")]
    ResearchIterations { min: u32, max: u32, got: u32 },

    #[error("persist_max_attempts must be at least 1")]
    PersistAttempts,

    #[error("generation timeout must be greater than zero")]
    GenerationTimeout,
}

/// How one consultation run is driven
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPolicy {
    research_iterations: u32,
    generation_timeout: Duration,
    persist_max_attempts: u32,
    persist_backoff: Duration,
    on_persist_failure: PersistFailureAction,
}

impl WorkflowPolicy {
    pub fn new(
        research_iterations: u32,
        generation_timeout: Duration,
        persist_max_attempts: u32,
        persist_backoff: Duration,
        on_persist_failure: PersistFailureAction,
    ) -> Result<Self, PolicyError> {
        if !RESEARCH_ITERATIONS_RANGE.contains(&research_iterations) {
            return Err(PolicyError::ResearchIterations {
                min: *RESEARCH_ITERATIONS_RANGE.start(),
                max: *RESEARCH_ITERATIONS_RANGE.end(),
                got: research_iterations,
            });
        }
        if persist_max_attempts == 0 {
            return Err(PolicyError::PersistAttempts);
        }
        if generation_timeout.is_zero() {
            return Err(PolicyError::GenerationTimeout);
        }

        Ok(Self {
            research_iterations,
            generation_timeout,
            persist_max_attempts,
            persist_backoff,
            on_persist_failure,
        })
    }

    pub fn with_research_iterations(self, research_iterations: u32) -> Result<Self, PolicyError> {
        Self::new(
            research_iterations,
            self.generation_timeout,
            self.persist_max_attempts,
            self.persist_backoff,
            self.on_persist_failure,
        )
    }

    pub fn with_generation_timeout(self, timeout: Duration) -> Result<Self, PolicyError> {
        Self::new(
            self.research_iterations,
            timeout,
            self.persist_max_attempts,
            self.persist_backoff,
            self.on_persist_failure,
        )
    }

    pub fn with_persistence(
        self,
        max_attempts: u32,
        backoff: Duration,
        on_failure: PersistFailureAction,
    ) -> Result<Self, PolicyError> {
        Self::new(
            self.research_iterations,
            self.generation_timeout,
            max_attempts,
            backoff,
            on_failure,
        )
    }

    pub fn research_iterations(&self) -> u32 {
        self.research_iterations
    }

    pub fn generation_timeout(&self) -> Duration {
        self.generation_timeout
    }

    pub fn persist_max_attempts(&self) -> u32 {
        self.persist_max_attempts
    }

    pub fn on_persist_failure(&self) -> PersistFailureAction {
        self.on_persist_failure
    }

    /// Delay before retry number `retry` (1-based); doubles each time
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.persist_backoff.saturating_mul(factor)
    }
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            research_iterations: DEFAULT_RESEARCH_ITERATIONS,
            generation_timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
            persist_max_attempts: DEFAULT_PERSIST_MAX_ATTEMPTS,
            persist_backoff: Duration::from_millis(DEFAULT_PERSIST_BACKOFF_MS),
            on_persist_failure: PersistFailureAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = WorkflowPolicy::default();
        assert_eq!(policy.research_iterations(), 2);
        assert_eq!(policy.generation_timeout(), Duration::from_secs(120));
        assert_eq!(policy.persist_max_attempts(), 3);
        assert_eq!(policy.on_persist_failure(), PersistFailureAction::Abort);
    }

    #[test]
    fn test_persist_failure_action_from_str() {
        assert_eq!("Continue".parse(), Ok(PersistFailureAction::Continue));
        assert_eq!("abort".parse(), Ok(PersistFailureAction::Abort));
        assert!("retry".parse::<PersistFailureAction>().is_err());
    }

    #[test]
    fn test_research_iterations_bounds() {
        let base = WorkflowPolicy::default();
        assert!(base.clone().with_research_iterations(1).is_ok());
        assert!(base.clone().with_research_iterations(10).is_ok());
        assert_eq!(
            base.clone().with_research_iterations(0),
            Err(PolicyError::ResearchIterations {
                min: 1,
                max: 10,
                got: 0
            })
        );
        assert!(base.with_research_iterations(11).is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = WorkflowPolicy::default().with_persistence(
            0,
            Duration::from_millis(10),
            PersistFailureAction::Continue,
        );
        assert_eq!(result, Err(PolicyError::PersistAttempts));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = WorkflowPolicy::default().with_generation_timeout(Duration::ZERO);
        assert_eq!(result, Err(PolicyError::GenerationTimeout));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = WorkflowPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(250));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(1000));
    }

    #[test]
    fn test_failure_action_wire_format() {
        let parsed: PersistFailureAction = serde_json::from_str("\"continue\"").unwrap();
        assert_eq!(parsed, PersistFailureAction::Continue);
    }
}
