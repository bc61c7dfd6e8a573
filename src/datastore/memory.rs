// Process-local session store

use super::{ChangeFeed, Datastore, DatastoreError, SessionSubscription};
use crate::models::{NewSession, Session, SessionPatch};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Session store held in memory. Records are lost when the process exits.
pub struct InMemoryDatastore {
    sessions: Mutex<HashMap<String, Session>>,
    feed: ChangeFeed,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            feed: ChangeFeed::new(),
        }
    }

    /// Seed a record as-is, bypassing insert defaults
    pub async fn put(&self, session: Session) {
        self.sessions
            .lock()
            .await
            .insert(session.id.clone(), session);
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

impl Default for InMemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn read_session(&self, id: &str) -> Result<Session, DatastoreError> {
        self.sessions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DatastoreError::NotFound(id.to_string()))
    }

    async fn update_session(
        &self,
        id: &str,
        patch: &SessionPatch,
    ) -> Result<Session, DatastoreError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| DatastoreError::NotFound(id.to_string()))?;

        patch.apply_to(session);
        let updated = session.clone();

        // Publish under the lock so concurrent writers cannot reorder deliveries
        self.feed.publish(&updated);
        Ok(updated)
    }

    async fn insert_session(&self, new_session: &NewSession) -> Result<Session, DatastoreError> {
        let session = Session::initial(uuid::Uuid::new_v4().to_string(), &new_session.user_id);
        self.sessions
            .lock()
            .await
            .insert(session.id.clone(), session.clone());
        log::debug!("Inserted session {} in memory", session.id);
        Ok(session)
    }

    fn subscribe(&self, id: &str) -> SessionSubscription {
        self.feed.subscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkflowState;

    #[tokio::test]
    async fn test_insert_creates_initial_record() {
        let store = InMemoryDatastore::new();
        let session = store.insert_session(&NewSession::new("u-1")).await.unwrap();

        assert!(!session.id.is_empty());
        assert_eq!(session.user_id, "u-1");
        assert_eq!(session.current_state, WorkflowState::WaitingForInfo);
        assert_eq!(store.read_session(&session.id).await.unwrap(), session);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let store = InMemoryDatastore::new();
        let err = store.read_session("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_is_partial_and_notifies() {
        let store = InMemoryDatastore::new();
        let session = store.insert_session(&NewSession::new("u-1")).await.unwrap();
        let mut sub = store.subscribe(&session.id);

        store
            .update_session(&session.id, &SessionPatch::new().company_info("Acme"))
            .await
            .unwrap();
        let updated = store
            .update_session(&session.id, &SessionPatch::new().research_counter(1))
            .await
            .unwrap();

        assert_eq!(updated.company_info, "Acme");
        assert_eq!(updated.research_counter, 1);

        assert_eq!(sub.next().await.unwrap().research_counter, 0);
        assert_eq!(sub.next().await.unwrap().company_info, "Acme");
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = InMemoryDatastore::new();
        let err = store
            .update_session("missing", &SessionPatch::new().research_counter(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
