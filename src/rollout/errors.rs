use thiserror::Error;
use uuid::Uuid;

use crate::models::{Platform, SubmissionStatus};

/// Rejections raised before a submission is persisted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RolloutError {
    /// Malformed input: percentage outside [0, 100], blank halt reason
    #[error("Invalid rollout input: {0}")]
    Validation(String),

    #[error("{action} is not available for {platform} submission {submission_id}: {reason}")]
    IllegalForPlatform {
        submission_id: Uuid,
        platform: Platform,
        action: &'static str,
        reason: String,
    },

    #[error("{action} is not allowed while submission {submission_id} is {status}")]
    InvalidState {
        submission_id: Uuid,
        action: &'static str,
        status: SubmissionStatus,
    },

    /// Emergency halts are final; only a new submission can ship
    #[error("Submission {submission_id} was halted; submit a new version to continue")]
    Halted { submission_id: Uuid },
}

impl RolloutError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type RolloutResult<T> = Result<T, RolloutError>;
