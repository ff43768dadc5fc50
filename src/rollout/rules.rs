//! Platform legality rules for submission rollout actions.
//!
//! [`apply`] is pure: it validates an action against a submission and returns the
//! submission as it should be persisted, or the reason the action is rejected.

use chrono::Utc;

use super::errors::{RolloutError, RolloutResult};
use crate::models::{HaltSeverity, Platform, Submission, SubmissionStatus};

/// An operator-initiated change to a submission's rollout
#[derive(Debug, Clone, PartialEq)]
pub enum RolloutAction {
    UpdateRollout { percentage: f64 },
    Pause { reason: Option<String> },
    Resume,
    Halt { severity: HaltSeverity, reason: String },
}

impl RolloutAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateRollout { .. } => "update_rollout",
            Self::Pause { .. } => "pause",
            Self::Resume => "resume",
            Self::Halt { .. } => "halt",
        }
    }
}

/// True only while the submission is LIVE below 100%.
pub fn can_increase_rollout(submission: &Submission) -> bool {
    submission.status == SubmissionStatus::Live && submission.rollout_percentage < 100.0
}

/// Validate `action` against `submission` and return the updated submission.
pub fn apply(submission: &Submission, action: &RolloutAction) -> RolloutResult<Submission> {
    if submission.is_emergency_halted() {
        return Err(RolloutError::Halted {
            submission_id: submission.id,
        });
    }

    let mut updated = submission.clone();
    match action {
        RolloutAction::UpdateRollout { percentage } => {
            update_rollout(&mut updated, *percentage, action.name())?
        }
        RolloutAction::Pause { reason } => pause(&mut updated, reason.clone(), action.name())?,
        RolloutAction::Resume => resume(&mut updated, action.name())?,
        RolloutAction::Halt { severity, reason } => {
            halt(&mut updated, *severity, reason, action.name())?
        }
    }
    updated.updated_at = Utc::now();
    Ok(updated)
}

fn ios_without_controls(submission: &Submission, action: &'static str) -> RolloutResult<()> {
    if submission.platform == Platform::Ios && !submission.phased_release {
        return Err(RolloutError::IllegalForPlatform {
            submission_id: submission.id,
            platform: submission.platform,
            action,
            reason: "release is not phased and is already available to all users".to_string(),
        });
    }
    Ok(())
}

fn invalid_state(submission: &Submission, action: &'static str) -> RolloutError {
    RolloutError::InvalidState {
        submission_id: submission.id,
        action,
        status: submission.status,
    }
}

fn update_rollout(
    submission: &mut Submission,
    percentage: f64,
    action: &'static str,
) -> RolloutResult<()> {
    ios_without_controls(submission, action)?;

    if !percentage.is_finite() || !(0.0..=100.0).contains(&percentage) {
        return Err(RolloutError::validation(format!(
            "rollout percentage must be between 0 and 100, got {percentage}"
        )));
    }

    if submission.platform == Platform::Ios && percentage != 100.0 {
        return Err(RolloutError::IllegalForPlatform {
            submission_id: submission.id,
            platform: submission.platform,
            action,
            reason: format!(
                "phased releases can only be completed at 100%, got {percentage}"
            ),
        });
    }

    if !can_increase_rollout(submission) {
        return Err(invalid_state(submission, action));
    }

    submission.rollout_percentage = percentage;
    Ok(())
}

fn pause(
    submission: &mut Submission,
    reason: Option<String>,
    action: &'static str,
) -> RolloutResult<()> {
    ios_without_controls(submission, action)?;

    if submission.status != SubmissionStatus::Live {
        return Err(invalid_state(submission, action));
    }

    submission.status = match submission.platform {
        Platform::Android => SubmissionStatus::Halted,
        Platform::Ios => SubmissionStatus::Paused,
    };
    submission.pause_reason = reason.filter(|r| !r.trim().is_empty());
    Ok(())
}

fn resume(submission: &mut Submission, action: &'static str) -> RolloutResult<()> {
    ios_without_controls(submission, action)?;

    let paused_status = match submission.platform {
        Platform::Android => SubmissionStatus::Halted,
        Platform::Ios => SubmissionStatus::Paused,
    };
    if submission.status != paused_status {
        return Err(invalid_state(submission, action));
    }

    submission.status = SubmissionStatus::Live;
    submission.pause_reason = None;
    Ok(())
}

fn halt(
    submission: &mut Submission,
    severity: HaltSeverity,
    reason: &str,
    action: &'static str,
) -> RolloutResult<()> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(RolloutError::validation("a halt requires a reason"));
    }

    if !matches!(
        submission.status,
        SubmissionStatus::Live | SubmissionStatus::Paused | SubmissionStatus::Halted
    ) {
        return Err(invalid_state(submission, action));
    }

    submission.status = SubmissionStatus::Halted;
    submission.halt_severity = Some(severity);
    submission.halt_reason = Some(reason.to_string());
    Ok(())
}
