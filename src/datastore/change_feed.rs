//! Per-session change notifications
//!
//! One broadcast channel per session id. Backends call [`ChangeFeed::publish`]
//! while still holding their write lock so delivery order matches write order.
//! A channel lives only as long as it has subscribers: the last
//! [`SessionSubscription`] for an id removes its entry on drop.

use crate::models::Session;
use crate::utils::lock_mutex_recover;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;

/// Buffered updates per subscriber before it starts lagging
const CHANNEL_CAPACITY: usize = 256;

type Channels = Mutex<HashMap<String, broadcast::Sender<Session>>>;

/// Fan-out of full session records to subscribers, keyed by session id
pub struct ChangeFeed {
    channels: Arc<Channels>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to updates for one session id
    pub fn subscribe(&self, session_id: &str) -> SessionSubscription {
        let mut channels = lock_mutex_recover(&self.channels);
        let sender = channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);

        SessionSubscription {
            session_id: session_id.to_string(),
            rx: sender.subscribe(),
            channels: Arc::downgrade(&self.channels),
        }
    }

    /// Deliver an updated record to every subscriber of its id
    pub fn publish(&self, session: &Session) {
        let channels = lock_mutex_recover(&self.channels);
        if let Some(sender) = channels.get(&session.id) {
            // Entries always have a live receiver, see `SessionSubscription::drop`
            let _ = sender.send(session.clone());
        }
    }

    /// Number of live subscribers for a session id
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        lock_mutex_recover(&self.channels)
            .get(session_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Number of session ids with at least one subscriber
    pub fn channel_count(&self) -> usize {
        lock_mutex_recover(&self.channels).len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream of full-record updates for one session
pub struct SessionSubscription {
    session_id: String,
    rx: broadcast::Receiver<Session>,
    channels: Weak<Channels>,
}

impl SessionSubscription {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the next update.
    ///
    /// Returns `None` once the feed is dropped. A subscriber that falls more
    /// than the channel capacity behind skips the missed records and resumes
    /// with the oldest one still buffered.
    pub async fn next(&mut self) -> Option<Session> {
        loop {
            match self.rx.recv().await {
                Ok(session) => return Some(session),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!(
                        "Subscriber for session {} lagged, skipped {} updates",
                        self.session_id,
                        missed
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take an already delivered update without waiting
    pub fn try_next(&mut self) -> Option<Session> {
        loop {
            match self.rx.try_recv() {
                Ok(session) => return Some(session),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let mut channels = lock_mutex_recover(&channels);
        // `self.rx` is still counted here, so 1 means this was the last one
        let is_last = channels
            .get(&self.session_id)
            .is_some_and(|sender| sender.receiver_count() <= 1);
        if is_last {
            channels.remove(&self.session_id);
        }
    }
}
