//! Store wrapper that fails reads for selected releases and can force
//! concurrent callers to interleave

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Barrier;
use chrono::{DateTime, Utc};
use release_core::error::{OrchestrationError, Result};
use release_core::models::{CronJob, Release, ReleaseTask, ReleaseUpload, Submission, UploadStage};
use release_core::repository::{InMemoryReleaseStore, ReleaseChangeset, ReleaseStore};
use release_core::state_machine::Stage;
use uuid::Uuid;

/// Delegates to an in-memory store, but `find_release` errors for the poisoned ids
pub struct FailingReleaseStore {
    inner: Arc<InMemoryReleaseStore>,
    poisoned: HashSet<Uuid>,
    cron_job_barrier: Option<Barrier>,
}

impl FailingReleaseStore {
    pub fn new(inner: Arc<InMemoryReleaseStore>, poisoned: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            inner,
            poisoned: poisoned.into_iter().collect(),
            cron_job_barrier: None,
        }
    }

    /// `find_cron_job` returns only once `parties` callers have all read
    pub fn with_cron_job_barrier(mut self, parties: usize) -> Self {
        self.cron_job_barrier = Some(Barrier::new(parties));
        self
    }
}

#[async_trait]
impl ReleaseStore for FailingReleaseStore {
    async fn create_release(&self, release: Release, cron_job: CronJob) -> Result<()> {
        self.inner.create_release(release, cron_job).await
    }

    async fn find_release(&self, release_id: Uuid) -> Result<Option<Release>> {
        if self.poisoned.contains(&release_id) {
            return Err(OrchestrationError::validation("simulated storage failure"));
        }
        self.inner.find_release(release_id).await
    }

    async fn find_cron_job(&self, release_id: Uuid) -> Result<Option<CronJob>> {
        let job = self.inner.find_cron_job(release_id).await;
        if let Some(barrier) = &self.cron_job_barrier {
            barrier.wait().await;
        }
        job
    }

    async fn schedulable_release_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.inner.schedulable_release_ids(now).await
    }

    async fn tasks_for_stage(&self, release_id: Uuid, stage: Stage) -> Result<Vec<ReleaseTask>> {
        self.inner.tasks_for_stage(release_id, stage).await
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<ReleaseTask>> {
        self.inner.find_task(task_id).await
    }

    async fn unused_uploads(
        &self,
        release_id: Uuid,
        stage: UploadStage,
    ) -> Result<Vec<ReleaseUpload>> {
        self.inner.unused_uploads(release_id, stage).await
    }

    async fn uploads_for_release(&self, release_id: Uuid) -> Result<Vec<ReleaseUpload>> {
        self.inner.uploads_for_release(release_id).await
    }

    async fn insert_upload(&self, upload: ReleaseUpload) -> Result<()> {
        self.inner.insert_upload(upload).await
    }

    async fn submissions_for_release(&self, release_id: Uuid) -> Result<Vec<Submission>> {
        self.inner.submissions_for_release(release_id).await
    }

    async fn compare_and_set_lock(
        &self,
        release_id: Uuid,
        expected_lock_version: i64,
        owner_id: &str,
        locked_at: DateTime<Utc>,
        timeout_seconds: i64,
    ) -> Result<bool> {
        self.inner
            .compare_and_set_lock(release_id, expected_lock_version, owner_id, locked_at, timeout_seconds)
            .await
    }

    async fn release_lock(&self, release_id: Uuid, owner_id: &str) -> Result<bool> {
        self.inner.release_lock(release_id, owner_id).await
    }

    async fn commit(&self, changeset: ReleaseChangeset) -> Result<()> {
        self.inner.commit(changeset).await
    }
}
