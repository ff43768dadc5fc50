use thiserror::Error;

/// Error types for release state machine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Invariant violated: {reason}")]
    InvariantViolated { reason: String },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;

pub fn invalid_transition(from: impl Into<String>, event: impl Into<String>) -> StateMachineError {
    StateMachineError::InvalidTransition {
        from: from.into(),
        event: event.into(),
    }
}

pub fn invariant_violated(reason: impl Into<String>) -> StateMachineError {
    StateMachineError::InvariantViolated {
        reason: reason.into(),
    }
}
