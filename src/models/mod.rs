// Data models shared across the crate

pub mod session;
pub mod state_machine;

pub use session::{AgentName, Message, MessageRole, NewSession, Session, SessionPatch, WorkflowState};
pub use state_machine::{can_transition, next_state, transition_state, StateTransitionError};
