//! Error types for the release orchestration engine.
//!
//! The taxonomy follows how a failure is handled rather than where it came from:
//! lock contention and gate waits are not errors at all, transient integration
//! failures are retried inside the executor, task failures pause the release,
//! and validation failures are rejected before anything is persisted.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;
use crate::rollout::RolloutError;
use crate::state_machine::errors::StateMachineError;
use crate::version::VersionError;

/// Errors surfaced by the orchestration engine.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Another instance holds a valid lock on the release.
    #[error("Release {release_id} is locked by another owner")]
    LockContention { release_id: Uuid },

    /// A collaborator call failed for a recoverable reason (timeout, 5xx).
    #[error("Transient integration error from {collaborator}: {reason}")]
    TransientIntegration { collaborator: String, reason: String },

    /// A task's business logic determined the work cannot succeed as configured.
    #[error("Task {task_id} failed: {reason}")]
    TaskFailure { task_id: Uuid, reason: String },

    /// Malformed scheduling, version or rollout input.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition for release {release_id}: {reason}")]
    InvalidTransition { release_id: Uuid, reason: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// An optimistic write lost a race (lock fence, task CAS, upload already used).
    #[error("Concurrent modification of {entity} {id}: {reason}")]
    ConcurrentModification {
        entity: &'static str,
        id: Uuid,
        reason: String,
    },

    #[error("Timeout after {timeout:?} during {operation}")]
    Timeout { operation: String, timeout: Duration },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    #[error("Rollout error: {0}")]
    Rollout(#[from] RolloutError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),
}

impl OrchestrationError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn concurrent_modification(
        entity: &'static str,
        id: Uuid,
        reason: impl Into<String>,
    ) -> Self {
        Self::ConcurrentModification {
            entity,
            id,
            reason: reason.into(),
        }
    }

    pub fn invalid_transition(release_id: Uuid, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            release_id,
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation later could succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientIntegration { .. }
                | Self::Timeout { .. }
                | Self::LockContention { .. }
                | Self::ConcurrentModification { .. }
                | Self::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;
