// Workflow state machine with validation

use super::WorkflowState;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateTransitionError {
    #[error("Invalid workflow transition from {from} to {to}")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },

    #[error("Workflow already in terminal state: {0}")]
    AlreadyTerminal(WorkflowState),
}

/// Validates if a session can move from one workflow state to another.
///
/// The workflow is strictly linear. `DecideFlow` is reserved and never admitted.
pub fn can_transition(from: WorkflowState, to: WorkflowState) -> bool {
    next_state(from) == Some(to)
}

/// Validates and performs a state transition
pub fn transition_state(
    current: WorkflowState,
    target: WorkflowState,
) -> Result<WorkflowState, StateTransitionError> {
    if is_terminal_state(current) {
        return Err(StateTransitionError::AlreadyTerminal(current));
    }

    if !can_transition(current, target) {
        return Err(StateTransitionError::InvalidTransition {
            from: current,
            to: target,
        });
    }

    Ok(target)
}

/// Check if a state is terminal
pub fn is_terminal_state(state: WorkflowState) -> bool {
    matches!(state, WorkflowState::Finished)
}

/// Check if a state means a run is in flight
pub fn is_active_state(state: WorkflowState) -> bool {
    matches!(
        state,
        WorkflowState::StartResearch | WorkflowState::DecideFlow | WorkflowState::StartReport
    )
}

/// Get the next state of the linear workflow
pub fn next_state(current: WorkflowState) -> Option<WorkflowState> {
    match current {
        WorkflowState::WaitingForInfo => Some(WorkflowState::StartResearch),
        WorkflowState::StartResearch => Some(WorkflowState::StartReport),
        WorkflowState::StartReport => Some(WorkflowState::Finished),
        WorkflowState::DecideFlow => None,
        WorkflowState::Finished => None,
    }
}
