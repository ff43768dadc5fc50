//! # Release Repository
//!
//! Storage contracts for the orchestration engine.
//!
//! ## Architecture: Changesets Fenced by the Release Lock
//!
//! A tick reads what it needs through [`ReleaseStore`], computes every change in
//! memory, and writes them back with a single [`ReleaseStore::commit`]. A commit
//! is atomic (one transaction in PostgreSQL) and guarded three ways:
//!
//! - **Lock fence**: when `lock_owner` is set, the commit fails unless that owner
//!   still holds the release lock
//! - **Task CAS**: each task transition only applies from the status it was read in
//! - **Upload CAS**: an upload is only marked used if it is still unused
//!
//! Any guard failing rolls back the whole changeset and surfaces as
//! [`OrchestrationError::ConcurrentModification`](crate::error::OrchestrationError).
//!
//! Two implementations ship: [`InMemoryReleaseStore`] for tests and embedded use,
//! and [`PgReleaseStore`] backed by `sqlx`.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrchestrationError, Result};
use crate::models::{CronJob, Release, ReleaseTask, ReleaseUpload, Submission, UploadStage};
use crate::state_machine::states::{Stage, TaskStatus};

pub use in_memory::InMemoryReleaseStore;
pub use postgres::PgReleaseStore;

/// Checks every store runs before persisting a new release: the release is
/// well formed, the cron job belongs to it and its regression slots are ordered
/// and fall on or before the target release.
pub fn validate_new_release(release: &Release, cron_job: &CronJob) -> Result<()> {
    if cron_job.release_id != release.id {
        return Err(OrchestrationError::validation(format!(
            "cron job for release {} cannot be attached to release {}",
            cron_job.release_id, release.id
        )));
    }
    release.validate_with_regressions(&cron_job.upcoming_regressions)
}

/// A task status change, applied only if the task is still in `from`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTransition {
    pub task_id: Uuid,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub failure_reason: Option<String>,
    pub external_ref: Option<String>,
}

impl TaskTransition {
    pub fn new(task_id: Uuid, from: TaskStatus, to: TaskStatus) -> Self {
        Self {
            task_id,
            from,
            to,
            failure_reason: None,
            external_ref: None,
        }
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn with_external_ref(mut self, external_ref: Option<String>) -> Self {
        self.external_ref = external_ref;
        self
    }
}

/// Marks one upload as consumed by a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConsumption {
    pub upload_id: Uuid,
    pub task_id: Uuid,
    pub cycle_id: Option<Uuid>,
}

/// Every write one release tick (or operator action) performs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseChangeset {
    pub release_id: Uuid,
    /// Owner the changeset was computed under; `None` skips the lock fence
    pub lock_owner: Option<String>,
    pub cron_job: Option<CronJob>,
    pub new_tasks: Vec<ReleaseTask>,
    pub task_transitions: Vec<TaskTransition>,
    pub upload_consumptions: Vec<UploadConsumption>,
    /// Set `archived` on the release row
    pub archive_release: bool,
}

impl ReleaseChangeset {
    pub fn new(release_id: Uuid, lock_owner: Option<String>) -> Self {
        Self {
            release_id,
            lock_owner,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cron_job.is_none()
            && self.new_tasks.is_empty()
            && self.task_transitions.is_empty()
            && self.upload_consumptions.is_empty()
            && !self.archive_release
    }

    pub fn extend_tasks(&mut self, transitions: Vec<TaskTransition>, consumptions: Vec<UploadConsumption>) {
        self.task_transitions.extend(transitions);
        self.upload_consumptions.extend(consumptions);
    }
}

/// Storage for releases, cron jobs, tasks and uploads
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Persist a new release together with its cron job, rejecting it per [`validate_new_release`]
    async fn create_release(&self, release: Release, cron_job: CronJob) -> Result<()>;

    async fn find_release(&self, release_id: Uuid) -> Result<Option<Release>>;

    async fn find_cron_job(&self, release_id: Uuid) -> Result<Option<CronJob>>;

    /// Releases a tick should look at: RUNNING, or PENDING with kickoff due
    async fn schedulable_release_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;

    /// Tasks of one stage ordered by `sequence`
    async fn tasks_for_stage(&self, release_id: Uuid, stage: Stage) -> Result<Vec<ReleaseTask>>;

    async fn find_task(&self, task_id: Uuid) -> Result<Option<ReleaseTask>>;

    async fn unused_uploads(
        &self,
        release_id: Uuid,
        stage: UploadStage,
    ) -> Result<Vec<ReleaseUpload>>;

    async fn uploads_for_release(&self, release_id: Uuid) -> Result<Vec<ReleaseUpload>>;

    async fn insert_upload(&self, upload: ReleaseUpload) -> Result<()>;

    async fn submissions_for_release(&self, release_id: Uuid) -> Result<Vec<Submission>>;

    /// Set the lock fields iff `lock_version` still equals `expected_lock_version`
    async fn compare_and_set_lock(
        &self,
        release_id: Uuid,
        expected_lock_version: i64,
        owner_id: &str,
        locked_at: DateTime<Utc>,
        timeout_seconds: i64,
    ) -> Result<bool>;

    /// Clear the lock iff it is owned by `owner_id`
    async fn release_lock(&self, release_id: Uuid, owner_id: &str) -> Result<bool>;

    /// Apply a changeset atomically
    async fn commit(&self, changeset: ReleaseChangeset) -> Result<()>;
}

/// Storage for store submissions
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn insert_submission(&self, submission: Submission) -> Result<()>;

    async fn find_submission(&self, submission_id: Uuid) -> Result<Option<Submission>>;

    /// Write `submission` iff the stored version equals `expected_version`;
    /// returns the stored row with its bumped version
    async fn save_submission(
        &self,
        submission: Submission,
        expected_version: i64,
    ) -> Result<Submission>;
}
