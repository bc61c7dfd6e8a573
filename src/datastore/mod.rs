//! Datastore gateway for persisted consultation sessions
//!
//! The orchestrator only sees the [`Datastore`] trait: read by id, partial
//! update, insert, and a per-session change subscription. Three backends are
//! provided:
//!
//! - [`InMemoryDatastore`] - process-local, used by tests and the demo mode
//! - [`FileDatastore`] - one JSON file per session, written atomically
//! - [`PostgrestDatastore`] - a hosted `sessions` table behind a PostgREST API
//!
//! Every backend publishes the full updated record to a [`ChangeFeed`] after
//! each successful write, so subscribers see updates in write order.

mod change_feed;
pub mod file;
pub mod memory;
pub mod postgrest;

pub use change_feed::{ChangeFeed, SessionSubscription};
pub use file::FileDatastore;
pub use memory::InMemoryDatastore;
pub use postgrest::PostgrestDatastore;

use crate::models::{NewSession, Session, SessionPatch};
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by datastore backends
#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Datastore request failed: {0}")]
    Backend(String),

    #[error("Failed to encode or decode session record: {0}")]
    Serialization(String),

    #[error("Datastore I/O error: {0}")]
    Io(String),
}

impl DatastoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatastoreError::NotFound(_))
    }
}

impl From<serde_json::Error> for DatastoreError {
    fn from(e: serde_json::Error) -> Self {
        DatastoreError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for DatastoreError {
    fn from(e: std::io::Error) -> Self {
        DatastoreError::Io(e.to_string())
    }
}

/// Persistence handle for session records
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Read the full record for `id`
    async fn read_session(&self, id: &str) -> Result<Session, DatastoreError>;

    /// Apply a partial update and return the full updated record.
    ///
    /// Fields left as `None` in the patch are untouched. Updates from one
    /// caller are applied, and published to subscribers, in call order.
    async fn update_session(&self, id: &str, patch: &SessionPatch)
        -> Result<Session, DatastoreError>;

    /// Insert a new session in `WAITING_FOR_INFO` with empty history
    async fn insert_session(&self, new_session: &NewSession) -> Result<Session, DatastoreError>;

    /// Subscribe to full-record updates for one session
    fn subscribe(&self, id: &str) -> SessionSubscription;
}
