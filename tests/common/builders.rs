//! Test data builders and a wired-up orchestration harness

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use release_core::config::{BackoffConfig, OrchestratorConfig};
use release_core::error::Result;
use release_core::models::{
    CronConfig, CronJob, DistributionMode, Platform, RegressionSlot, RegressionSlotConfig, Release,
    ReleaseUpload, UploadStage,
};
use release_core::orchestration::{
    CollaboratorRegistry, InMemoryPollerScheduler, OrchestratorContext, TaskCollaborator,
    TaskContext, TaskOutcome,
};
use release_core::repository::{InMemoryReleaseStore, ReleaseStore};
use release_core::version::ReleaseType;
use uuid::Uuid;

/// Configuration with fast retries so tests never sleep for long
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.environment = "test".to_string();
    config.scheduler.instance_id = "test-instance".to_string();
    config.executor.collaborator_timeout_seconds = 2;
    config.executor.backoff = BackoffConfig {
        max_retries: 1,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
    };
    config
}

pub fn regression_slot(offset_from_kickoff: u32, time: &str) -> RegressionSlot {
    RegressionSlot {
        offset_from_kickoff,
        time: time.to_string(),
        config: RegressionSlotConfig::default(),
    }
}

/// Builder for a release plus its cron job
pub struct ReleaseBuilder {
    platforms: Vec<Platform>,
    distribution_mode: DistributionMode,
    kickoff_at: DateTime<Utc>,
    version: String,
    cron_config: CronConfig,
    regressions: Vec<RegressionSlot>,
    auto_to_stage2: bool,
    auto_to_stage3: bool,
}

impl Default for ReleaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseBuilder {
    pub fn new() -> Self {
        Self {
            platforms: vec![Platform::Android, Platform::Ios],
            distribution_mode: DistributionMode::CiBuild,
            kickoff_at: Utc::now() - Duration::hours(1),
            version: "2.4.0".to_string(),
            cron_config: CronConfig::default(),
            regressions: Vec::new(),
            auto_to_stage2: true,
            auto_to_stage3: true,
        }
    }

    pub fn with_platforms(mut self, platforms: Vec<Platform>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn manual_upload(mut self) -> Self {
        self.distribution_mode = DistributionMode::ManualUpload;
        self
    }

    pub fn with_kickoff_at(mut self, kickoff_at: DateTime<Utc>) -> Self {
        self.kickoff_at = kickoff_at;
        self
    }

    pub fn with_cron_config(mut self, cron_config: CronConfig) -> Self {
        self.cron_config = cron_config;
        self
    }

    pub fn with_regression(mut self, slot: RegressionSlot) -> Self {
        self.regressions.push(slot);
        self
    }

    pub fn with_auto_transitions(mut self, to_stage2: bool, to_stage3: bool) -> Self {
        self.auto_to_stage2 = to_stage2;
        self.auto_to_stage3 = to_stage3;
        self
    }

    pub fn build(self) -> (Release, CronJob) {
        let now = Utc::now();
        let release = Release {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            version: self.version,
            release_type: ReleaseType::Minor,
            platforms: self.platforms,
            distribution_mode: self.distribution_mode,
            kickoff_at: self.kickoff_at,
            target_release_at: self.kickoff_at + Duration::days(7),
            archived: false,
            created_at: now,
            updated_at: now,
        };
        let cron_job = CronJob::new(release.id, self.cron_config)
            .with_regressions(self.regressions)
            .with_auto_transitions(self.auto_to_stage2, self.auto_to_stage3);
        (release, cron_job)
    }

    pub async fn create(self, store: &dyn ReleaseStore) -> Release {
        let (release, cron_job) = self.build();
        store
            .create_release(release.clone(), cron_job)
            .await
            .expect("Failed to create test release");
        release
    }
}

pub fn upload(release_id: Uuid, stage: UploadStage, platform: Platform) -> ReleaseUpload {
    ReleaseUpload::new(
        release_id,
        stage,
        platform,
        format!("uploads/{release_id}/{platform}/{}", Uuid::new_v4()),
    )
}

/// Fails every dispatch with a business error
pub struct FailingCollaborator {
    pub reason: String,
    pub calls: Mutex<u32>,
}

impl FailingCollaborator {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl TaskCollaborator for FailingCollaborator {
    fn name(&self) -> &str {
        "failing"
    }

    async fn dispatch(&self, _context: &TaskContext) -> Result<TaskOutcome> {
        *self.calls.lock() += 1;
        Ok(TaskOutcome::Failed {
            reason: self.reason.clone(),
        })
    }

    async fn poll(&self, _context: &TaskContext, _external_ref: Option<&str>) -> Result<TaskOutcome> {
        Ok(TaskOutcome::Failed {
            reason: self.reason.clone(),
        })
    }
}

/// In-memory store, pollers and collaborators wired into an [`OrchestratorContext`]
pub struct TestHarness {
    pub store: Arc<InMemoryReleaseStore>,
    pub pollers: Arc<InMemoryPollerScheduler>,
    pub collaborators: Arc<CollaboratorRegistry>,
    pub context: OrchestratorContext,
}

impl TestHarness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryReleaseStore::new());
        let pollers = Arc::new(InMemoryPollerScheduler::new());
        let collaborators = Arc::new(CollaboratorRegistry::new());
        let context = OrchestratorContext::new(
            store.clone(),
            Arc::clone(&collaborators),
            pollers.clone(),
            test_config(),
        );
        Self {
            store,
            pollers,
            collaborators,
            context,
        }
    }

    pub async fn cron_job(&self, release_id: Uuid) -> CronJob {
        self.store
            .find_cron_job(release_id)
            .await
            .expect("store read failed")
            .expect("cron job missing")
    }

    /// Run `count` tick batches
    pub async fn tick(&self, count: usize) {
        for _ in 0..count {
            let summary = self.context.tick_scheduler().run_tick().await;
            assert!(summary.errors.is_empty(), "tick errors: {:?}", summary.errors);
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
