use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::errors::RolloutError;
use super::rules::{self, RolloutAction};
use crate::error::{OrchestrationError, Result};
use crate::models::{HaltSeverity, Platform, Submission, SubmissionStatus};
use crate::repository::SubmissionStore;

/// Applies rollout actions to stored submissions.
///
/// Every action is validated by [`rules::apply`] before anything is written, and
/// the write is a compare-and-set on `Submission::version`.
#[derive(Clone)]
pub struct RolloutController {
    store: Arc<dyn SubmissionStore>,
}

impl std::fmt::Debug for RolloutController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RolloutController").finish_non_exhaustive()
    }
}

impl RolloutController {
    pub fn new(store: Arc<dyn SubmissionStore>) -> Self {
        Self { store }
    }

    /// Record a fresh store submission for one platform of a release
    pub async fn create_submission(
        &self,
        release_id: Uuid,
        platform: Platform,
        phased_release: bool,
    ) -> Result<Submission> {
        let submission = Submission::new(release_id, platform, phased_release);
        self.store.insert_submission(submission.clone()).await?;
        info!(
            submission_id = %submission.id,
            release_id = %release_id,
            platform = %platform,
            phased_release = submission.phased_release,
            "Created store submission"
        );
        Ok(submission)
    }

    pub async fn update_rollout(&self, submission_id: Uuid, percentage: f64) -> Result<Submission> {
        self.execute(submission_id, RolloutAction::UpdateRollout { percentage })
            .await
    }

    pub async fn pause(&self, submission_id: Uuid, reason: Option<String>) -> Result<Submission> {
        self.execute(submission_id, RolloutAction::Pause { reason })
            .await
    }

    pub async fn resume(&self, submission_id: Uuid) -> Result<Submission> {
        self.execute(submission_id, RolloutAction::Resume).await
    }

    pub async fn halt(
        &self,
        submission_id: Uuid,
        severity: HaltSeverity,
        reason: impl Into<String>,
    ) -> Result<Submission> {
        self.execute(
            submission_id,
            RolloutAction::Halt {
                severity,
                reason: reason.into(),
            },
        )
        .await
    }

    pub fn can_increase_rollout(&self, submission: &Submission) -> bool {
        rules::can_increase_rollout(submission)
    }

    /// Apply a review status reported by the store (SUBMITTED → IN_REVIEW → APPROVED → LIVE,
    /// REJECTED from review, CANCELLED before going live).
    ///
    /// A non-phased iOS release is available to everyone the moment it goes live.
    #[instrument(skip(self), fields(submission_id = %submission_id, status = %status))]
    pub async fn record_store_status(
        &self,
        submission_id: Uuid,
        status: SubmissionStatus,
    ) -> Result<Submission> {
        let submission = self.load(submission_id).await?;

        let allowed = matches!(
            (submission.status, status),
            (SubmissionStatus::Submitted, SubmissionStatus::InReview)
                | (SubmissionStatus::InReview, SubmissionStatus::Approved)
                | (SubmissionStatus::InReview, SubmissionStatus::Rejected)
                | (SubmissionStatus::Approved, SubmissionStatus::Live)
                | (
                    SubmissionStatus::Submitted
                        | SubmissionStatus::InReview
                        | SubmissionStatus::Approved,
                    SubmissionStatus::Cancelled
                )
        );
        if !allowed {
            return Err(RolloutError::InvalidState {
                submission_id,
                action: "record_store_status",
                status: submission.status,
            }
            .into());
        }

        let mut updated = submission.clone();
        updated.status = status;
        if status == SubmissionStatus::Live
            && submission.platform == Platform::Ios
            && !submission.phased_release
        {
            updated.rollout_percentage = 100.0;
        }
        updated.updated_at = chrono::Utc::now();

        self.store.save_submission(updated, submission.version).await
    }

    #[instrument(skip(self, action), fields(submission_id = %submission_id, action = action.name()))]
    async fn execute(&self, submission_id: Uuid, action: RolloutAction) -> Result<Submission> {
        let submission = self.load(submission_id).await?;

        let updated = match rules::apply(&submission, &action) {
            Ok(updated) => updated,
            Err(err) => {
                warn!(
                    platform = %submission.platform,
                    status = %submission.status,
                    error = %err,
                    "Rejected rollout action"
                );
                return Err(err.into());
            }
        };

        let saved = self
            .store
            .save_submission(updated, submission.version)
            .await?;

        info!(
            platform = %saved.platform,
            status = %saved.status,
            rollout_percentage = saved.rollout_percentage,
            halt_severity = ?saved.halt_severity,
            "Applied rollout action"
        );
        Ok(saved)
    }

    async fn load(&self, submission_id: Uuid) -> Result<Submission> {
        self.store
            .find_submission(submission_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("Submission", submission_id))
    }
}
