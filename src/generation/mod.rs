//! Text generation
//!
//! The orchestrator only sees [`GenerationClient`]: a prompt goes in, text and
//! optional web citations come out. Failures are tagged with a
//! [`GenerationErrorKind`] so callers never match on message strings.

pub mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Per-call options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Let the model ground its answer with a web search
    pub web_search: bool,
}

impl GenerateOptions {
    pub fn research() -> Self {
        Self { web_search: true }
    }

    pub fn synthesis() -> Self {
        Self { web_search: false }
    }
}

/// A web page the model cited while answering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub title: String,
    pub url: String,
}

/// Successful generation result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub sources: Vec<SourceCitation>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sources: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<SourceCitation>) -> Self {
        self.sources = sources;
        self
    }
}

/// Failure category of a generation call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationErrorKind {
    /// Missing, invalid or unauthorized API key
    Auth,
    /// Rate limit or quota exhausted
    Quota,
    /// The API is not enabled for the project behind the key
    ServiceDisabled,
    /// Connection failure or upstream 5xx
    Network,
    /// The call did not finish within the configured timeout
    Timeout,
    /// The service answered with something we could not use
    InvalidResponse,
    Unknown,
}

impl fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GenerationErrorKind::Auth => "authentication error",
            GenerationErrorKind::Quota => "quota exceeded",
            GenerationErrorKind::ServiceDisabled => "service disabled",
            GenerationErrorKind::Network => "network error",
            GenerationErrorKind::Timeout => "timeout",
            GenerationErrorKind::InvalidResponse => "invalid response",
            GenerationErrorKind::Unknown => "unknown error",
        };
        f.write_str(label)
    }
}

/// Tagged generation failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
    /// Extra context, e.g. the console link to enable a disabled API
    pub details: Option<String>,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(
            GenerationErrorKind::Timeout,
            format!("no response after {}s", after.as_secs()),
        )
    }
}

/// External text-generation service
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display_includes_kind() {
        let err = GenerationError::new(GenerationErrorKind::Quota, "RESOURCE_EXHAUSTED: slow down");
        assert_eq!(err.to_string(), "quota exceeded: RESOURCE_EXHAUSTED: slow down");
    }

    #[test]
    fn test_timeout_error() {
        let err = GenerationError::timeout(Duration::from_secs(120));
        assert_eq!(err.kind, GenerationErrorKind::Timeout);
        assert!(err.message.contains("120s"));
        assert!(err.details.is_none());
    }

    #[test]
    fn test_option_presets() {
        assert!(GenerateOptions::research().web_search);
        assert!(!GenerateOptions::synthesis().web_search);
    }
}
