//! Server application state shared across handlers

use super::events::EventBroadcaster;
use crate::datastore::Datastore;
use crate::orchestrator::ConsultationOrchestrator;
use crate::shutdown::ShutdownState;
use std::sync::Arc;

/// Shared state for the server
#[derive(Clone)]
pub struct ServerAppState {
    /// Authentication token for this server instance
    pub auth_token: String,

    /// Sequences consultations
    pub orchestrator: Arc<ConsultationOrchestrator>,

    /// Same store the orchestrator writes to, used for reads and subscriptions
    pub datastore: Arc<dyn Datastore>,

    /// Event broadcaster for WebSocket clients
    pub broadcaster: Arc<EventBroadcaster>,

    /// Shutdown state
    pub shutdown_state: ShutdownState,
}

impl ServerAppState {
    pub fn new(
        auth_token: String,
        orchestrator: Arc<ConsultationOrchestrator>,
        shutdown_state: ShutdownState,
    ) -> Self {
        let datastore = Arc::clone(orchestrator.datastore());
        Self {
            auth_token,
            orchestrator,
            datastore,
            broadcaster: Arc::new(EventBroadcaster::new()),
            shutdown_state,
        }
    }
}
