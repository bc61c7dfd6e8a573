//! Realtime session view
//!
//! Keeps the latest snapshot of one session for a consuming UI. Each change
//! notification from the datastore replaces the snapshot wholesale; readers
//! only ever see complete records.

use crate::datastore::{Datastore, DatastoreError};
use crate::models::{Session, WorkflowState};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Latest known state of one session, kept current by a background task
pub struct SessionView {
    session_id: String,
    rx: watch::Receiver<Session>,
    task: JoinHandle<()>,
}

impl SessionView {
    /// Subscribe to `session_id` and load its current record.
    ///
    /// The subscription is opened before the initial read, so no update
    /// made after this call is missed. An update racing with the read may be
    /// applied twice, which is harmless since records are replaced whole.
    pub async fn attach(datastore: &dyn Datastore, session_id: &str) -> Result<Self, DatastoreError> {
        let mut subscription = datastore.subscribe(session_id);
        let initial = datastore.read_session(session_id).await?;
        let (tx, rx) = watch::channel(initial);

        let id = session_id.to_string();
        let task = tokio::spawn(async move {
            while let Some(session) = subscription.next().await {
                if tx.send(session).is_err() {
                    break;
                }
            }
            log::debug!("Realtime view for session {} closed", id);
        });

        Ok(Self {
            session_id: session_id.to_string(),
            rx,
            task,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Session {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot. `None` once the feed has closed.
    pub async fn changed(&mut self) -> Option<Session> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the session reaches `state`. Returns immediately when the
    /// current snapshot is already there; `None` if the feed closes first.
    pub async fn wait_for_state(&mut self, state: WorkflowState) -> Option<Session> {
        self.rx
            .wait_for(|session| session.current_state == state)
            .await
            .ok()
            .map(|session| session.clone())
    }

    /// Independent receiver for other consumers (e.g. a UI task)
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.rx.clone()
    }
}

impl Drop for SessionView {
    fn drop(&mut self) {
        self.task.abort();
    }
}
