use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::states::Stage;

/// Events that drive cron job transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ReleaseEvent {
    /// Kickoff time reached for a pending cron job
    Start,
    /// Every task of the stage reached COMPLETED
    StageCompleted(Stage),
    /// A task of the current stage failed
    TaskFailed { task_id: Uuid, reason: String },
    /// Operator asked the release to stop progressing
    PauseRequested,
    /// Operator lifted a user-requested pause
    ResumeRequested,
    /// Operator started the stage a release was waiting on
    StageTriggered,
    /// Operator reset failed tasks for another attempt
    RetryRequested,
    Archived,
}

impl ReleaseEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::StageCompleted(_) => "stage_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::PauseRequested => "pause_requested",
            Self::ResumeRequested => "resume_requested",
            Self::StageTriggered => "stage_triggered",
            Self::RetryRequested => "retry_requested",
            Self::Archived => "archived",
        }
    }
}
