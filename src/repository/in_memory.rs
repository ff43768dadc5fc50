//! # In-Memory Release Store
//!
//! Thread-safe in-memory implementation of [`ReleaseStore`] and [`SubmissionStore`]
//! for testing and embedded use.
//!
//! All state lives behind a single `parking_lot::Mutex`, so every trait method,
//! including [`ReleaseStore::commit`], is atomic with the same guard semantics as
//! the PostgreSQL store. The mutex is never held across an `.await`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{validate_new_release, ReleaseChangeset, ReleaseStore, SubmissionStore};
use crate::error::{OrchestrationError, Result};
use crate::models::{CronJob, Release, ReleaseTask, ReleaseUpload, Submission, UploadStage};
use crate::state_machine::states::{CronStatus, Stage};

#[derive(Debug, Default)]
struct InMemoryState {
    releases: HashMap<Uuid, Release>,
    cron_jobs: HashMap<Uuid, CronJob>,
    tasks: HashMap<Uuid, ReleaseTask>,
    uploads: HashMap<Uuid, ReleaseUpload>,
    submissions: HashMap<Uuid, Submission>,
}

#[derive(Debug, Default)]
pub struct InMemoryReleaseStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every task of a release (for testing)
    pub fn all_tasks(&self, release_id: Uuid) -> Vec<ReleaseTask> {
        let state = self.state.lock();
        let mut tasks: Vec<ReleaseTask> = state
            .tasks
            .values()
            .filter(|t| t.release_id == release_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.stage, t.sequence, t.created_at));
        tasks
    }

    /// Overwrite a cron job (for testing and operator tooling)
    pub fn put_cron_job(&self, cron_job: CronJob) {
        self.state.lock().cron_jobs.insert(cron_job.release_id, cron_job);
    }

    /// Overwrite a release row (for testing)
    pub fn put_release(&self, release: Release) {
        self.state.lock().releases.insert(release.id, release);
    }

    /// Overwrite a submission without version checks (for testing)
    pub fn put_submission(&self, submission: Submission) {
        self.state.lock().submissions.insert(submission.id, submission);
    }
}

fn sort_tasks(tasks: &mut [ReleaseTask]) {
    tasks.sort_by_key(|t| (t.sequence, t.created_at));
}

#[async_trait]
impl ReleaseStore for InMemoryReleaseStore {
    async fn create_release(&self, release: Release, cron_job: CronJob) -> Result<()> {
        validate_new_release(&release, &cron_job)?;
        let mut state = self.state.lock();
        state.cron_jobs.insert(release.id, cron_job);
        state.releases.insert(release.id, release);
        Ok(())
    }

    async fn find_release(&self, release_id: Uuid) -> Result<Option<Release>> {
        Ok(self.state.lock().releases.get(&release_id).cloned())
    }

    async fn find_cron_job(&self, release_id: Uuid) -> Result<Option<CronJob>> {
        Ok(self.state.lock().cron_jobs.get(&release_id).cloned())
    }

    async fn schedulable_release_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let state = self.state.lock();
        let mut eligible: Vec<(DateTime<Utc>, Uuid)> = state
            .cron_jobs
            .values()
            .filter_map(|job| {
                let release = state.releases.get(&job.release_id);
                let kickoff_at = release.map(|r| r.kickoff_at).unwrap_or(now);
                let eligible = match job.cron_status {
                    CronStatus::Running => true,
                    CronStatus::Pending => kickoff_at <= now,
                    CronStatus::Paused | CronStatus::Completed => false,
                };
                eligible.then_some((kickoff_at, job.release_id))
            })
            .collect();
        eligible.sort();
        Ok(eligible.into_iter().map(|(_, id)| id).collect())
    }

    async fn tasks_for_stage(&self, release_id: Uuid, stage: Stage) -> Result<Vec<ReleaseTask>> {
        let state = self.state.lock();
        let mut tasks: Vec<ReleaseTask> = state
            .tasks
            .values()
            .filter(|t| t.release_id == release_id && t.stage == stage)
            .cloned()
            .collect();
        sort_tasks(&mut tasks);
        Ok(tasks)
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<ReleaseTask>> {
        Ok(self.state.lock().tasks.get(&task_id).cloned())
    }

    async fn unused_uploads(
        &self,
        release_id: Uuid,
        stage: UploadStage,
    ) -> Result<Vec<ReleaseUpload>> {
        let state = self.state.lock();
        let mut uploads: Vec<ReleaseUpload> = state
            .uploads
            .values()
            .filter(|u| u.release_id == release_id && u.stage == stage && !u.used)
            .cloned()
            .collect();
        uploads.sort_by_key(|u| u.created_at);
        Ok(uploads)
    }

    async fn uploads_for_release(&self, release_id: Uuid) -> Result<Vec<ReleaseUpload>> {
        let state = self.state.lock();
        let mut uploads: Vec<ReleaseUpload> = state
            .uploads
            .values()
            .filter(|u| u.release_id == release_id)
            .cloned()
            .collect();
        uploads.sort_by_key(|u| u.created_at);
        Ok(uploads)
    }

    async fn insert_upload(&self, upload: ReleaseUpload) -> Result<()> {
        self.state.lock().uploads.insert(upload.id, upload);
        Ok(())
    }

    async fn submissions_for_release(&self, release_id: Uuid) -> Result<Vec<Submission>> {
        let state = self.state.lock();
        let mut submissions: Vec<Submission> = state
            .submissions
            .values()
            .filter(|s| s.release_id == release_id)
            .cloned()
            .collect();
        submissions.sort_by_key(|s| s.created_at);
        Ok(submissions)
    }

    async fn compare_and_set_lock(
        &self,
        release_id: Uuid,
        expected_lock_version: i64,
        owner_id: &str,
        locked_at: DateTime<Utc>,
        timeout_seconds: i64,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let job = state
            .cron_jobs
            .get_mut(&release_id)
            .ok_or_else(|| OrchestrationError::not_found("CronJob", release_id))?;

        if job.lock_version != expected_lock_version {
            return Ok(false);
        }
        job.locked_by = Some(owner_id.to_string());
        job.locked_at = Some(locked_at);
        job.lock_timeout_seconds = timeout_seconds;
        job.lock_version += 1;
        Ok(true)
    }

    async fn release_lock(&self, release_id: Uuid, owner_id: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let job = state
            .cron_jobs
            .get_mut(&release_id)
            .ok_or_else(|| OrchestrationError::not_found("CronJob", release_id))?;

        if job.locked_by.as_deref() != Some(owner_id) {
            return Ok(false);
        }
        job.locked_by = None;
        job.locked_at = None;
        job.lock_version += 1;
        Ok(true)
    }

    async fn commit(&self, changeset: ReleaseChangeset) -> Result<()> {
        let mut state = self.state.lock();
        let release_id = changeset.release_id;

        // Validate every guard before touching anything so a failure leaves no trace
        let current_job = state
            .cron_jobs
            .get(&release_id)
            .ok_or_else(|| OrchestrationError::not_found("CronJob", release_id))?;
        if let Some(owner) = &changeset.lock_owner {
            // An expired lock fails the fence even before anyone reclaims it
            if !current_job.is_locked_by(owner, Utc::now()) {
                return Err(OrchestrationError::concurrent_modification(
                    "CronJob",
                    release_id,
                    format!("lock no longer held by {owner}"),
                ));
            }
        }
        for consumption in &changeset.upload_consumptions {
            let upload = state
                .uploads
                .get(&consumption.upload_id)
                .ok_or_else(|| OrchestrationError::not_found("ReleaseUpload", consumption.upload_id))?;
            if upload.used {
                return Err(OrchestrationError::concurrent_modification(
                    "ReleaseUpload",
                    upload.id,
                    format!("already used by task {:?}", upload.used_by_task_id),
                ));
            }
        }
        for transition in &changeset.task_transitions {
            let task = state
                .tasks
                .get(&transition.task_id)
                .ok_or_else(|| OrchestrationError::not_found("ReleaseTask", transition.task_id))?;
            if task.task_status != transition.from {
                return Err(OrchestrationError::concurrent_modification(
                    "ReleaseTask",
                    task.id,
                    format!(
                        "expected status {} but found {}",
                        transition.from, task.task_status
                    ),
                ));
            }
        }

        let now = Utc::now();
        for consumption in changeset.upload_consumptions {
            if let Some(upload) = state.uploads.get_mut(&consumption.upload_id) {
                upload.used = true;
                upload.used_by_task_id = Some(consumption.task_id);
                upload.used_in_cycle_id = consumption.cycle_id;
            }
        }
        for transition in changeset.task_transitions {
            if let Some(task) = state.tasks.get_mut(&transition.task_id) {
                task.task_status = transition.to;
                if transition.failure_reason.is_some() {
                    task.failure_reason = transition.failure_reason;
                }
                if transition.external_ref.is_some() {
                    task.external_ref = transition.external_ref;
                }
                task.updated_at = now;
            }
        }
        for task in changeset.new_tasks {
            state.tasks.insert(task.id, task);
        }
        if changeset.archive_release {
            if let Some(release) = state.releases.get_mut(&release_id) {
                release.archived = true;
                release.updated_at = now;
            }
        }
        if let Some(mut job) = changeset.cron_job {
            if let Some(current) = state.cron_jobs.get(&release_id) {
                // Lock fields are owned by the lock manager, never by a changeset
                job.locked_by = current.locked_by.clone();
                job.locked_at = current.locked_at;
                job.lock_timeout_seconds = current.lock_timeout_seconds;
                job.lock_version = current.lock_version;
            }
            job.updated_at = now;
            state.cron_jobs.insert(release_id, job);
        }

        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for InMemoryReleaseStore {
    async fn insert_submission(&self, submission: Submission) -> Result<()> {
        self.state.lock().submissions.insert(submission.id, submission);
        Ok(())
    }

    async fn find_submission(&self, submission_id: Uuid) -> Result<Option<Submission>> {
        Ok(self.state.lock().submissions.get(&submission_id).cloned())
    }

    async fn save_submission(
        &self,
        mut submission: Submission,
        expected_version: i64,
    ) -> Result<Submission> {
        let mut state = self.state.lock();
        let current = state
            .submissions
            .get(&submission.id)
            .ok_or_else(|| OrchestrationError::not_found("Submission", submission.id))?;
        if current.version != expected_version {
            return Err(OrchestrationError::concurrent_modification(
                "Submission",
                submission.id,
                format!(
                    "expected version {expected_version} but found {}",
                    current.version
                ),
            ));
        }
        submission.version = expected_version + 1;
        submission.updated_at = Utc::now();
        state.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }
}
