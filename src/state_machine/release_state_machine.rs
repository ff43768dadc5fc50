//! # Release State Machine
//!
//! Owns one release's cron job between ticks. A tick loads the release, lets the
//! task executor advance the current stage, applies the resulting events through
//! the transition table and writes everything back in a single changeset fenced
//! by the caller's lock.
//!
//! ## Tick rules
//!
//! - PENDING with kickoff due: start, create kickoff tasks and both workflow pollers
//! - RUNNING: advance the current stage (or regression cycle); a failed task pauses
//!   the release, a finished stage moves on or waits for a trigger
//! - PAUSED or COMPLETED: nothing happens
//!
//! Pollers are created before the commit (creation is idempotent, so a failed
//! commit is healed by the next tick) and deleted after it.
//!
//! Operator actions (`pause`, `resume`, `trigger_next_stage`, `retry_failed_tasks`,
//! `archive`) take the release lock themselves.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::errors::StateMachineError;
use super::events::ReleaseEvent;
use super::states::{CronStatus, PauseType, Stage, TaskStatus};
use super::transitions::{self, TransitionEffect};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestrationError, Result};
use crate::logging::log_release_operation;
use crate::models::{CronJob, Platform, Release, StageData, Submission};
use crate::orchestration::lock_manager::LockManager;
use crate::orchestration::pollers::{
    create_release_pollers, delete_release_pollers, WorkflowPollerScheduler,
};
use crate::orchestration::task_executor::{StageProgress, TaskExecutor};
use crate::orchestration::task_factory;
use crate::repository::{ReleaseChangeset, ReleaseStore, TaskTransition};

/// What one tick did to a release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickOutcome {
    pub release_id: Uuid,
    pub cron_status: CronStatus,
    pub pause_type: PauseType,
    pub current_stage: Option<Stage>,
    pub events: Vec<ReleaseEvent>,
    pub tasks_created: usize,
    pub task_transitions: usize,
    pub uploads_consumed: usize,
}

impl TickOutcome {
    fn unchanged(job: &CronJob) -> Self {
        Self {
            release_id: job.release_id,
            cron_status: job.cron_status,
            pause_type: job.pause_type,
            current_stage: job.current_stage(),
            events: Vec::new(),
            tasks_created: 0,
            task_transitions: 0,
            uploads_consumed: 0,
        }
    }

    /// Whether the tick wrote anything
    pub fn changed(&self) -> bool {
        !self.events.is_empty()
            || self.tasks_created > 0
            || self.task_transitions > 0
            || self.uploads_consumed > 0
    }
}

/// Progress of the current stage plus whether its gating conditions now hold
struct StageStep {
    progress: StageProgress,
    stage_complete: bool,
}

#[derive(Clone)]
pub struct ReleaseStateMachine {
    store: Arc<dyn ReleaseStore>,
    executor: TaskExecutor,
    lock_manager: LockManager,
    pollers: Arc<dyn WorkflowPollerScheduler>,
    owner_id: String,
    lock_timeout_seconds: i64,
    poller_interval_minutes: u32,
}

impl std::fmt::Debug for ReleaseStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseStateMachine")
            .field("owner_id", &self.owner_id)
            .field("lock_timeout_seconds", &self.lock_timeout_seconds)
            .field("poller_interval_minutes", &self.poller_interval_minutes)
            .finish_non_exhaustive()
    }
}

impl ReleaseStateMachine {
    pub fn new(
        store: Arc<dyn ReleaseStore>,
        executor: TaskExecutor,
        pollers: Arc<dyn WorkflowPollerScheduler>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            lock_manager: LockManager::new(Arc::clone(&store)),
            store,
            executor,
            pollers,
            owner_id: config.scheduler.instance_id.clone(),
            lock_timeout_seconds: config.lock.timeout_seconds,
            poller_interval_minutes: config.pollers.interval_minutes,
        }
    }

    /// Owner id used for operator actions
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Advance one release by one tick. The caller must hold the release lock as `owner_id`.
    #[instrument(skip(self), fields(release_id = %release_id, owner_id = %owner_id))]
    pub async fn tick(&self, release_id: Uuid, owner_id: &str) -> Result<TickOutcome> {
        let (release, original) = self.load(release_id).await?;
        if !original.cron_status.is_tickable() {
            debug!(cron_status = %original.cron_status, pause_type = %original.pause_type, "Release not tickable");
            return Ok(TickOutcome::unchanged(&original));
        }

        let now = Utc::now();
        let mut job = original.clone();
        let mut changeset = ReleaseChangeset::new(release_id, Some(owner_id.to_string()));
        let mut events = Vec::new();
        let mut effects = Vec::new();

        if job.cron_status == CronStatus::Pending {
            if !release.is_kickoff_due(now) {
                return Ok(TickOutcome::unchanged(&original));
            }
            effects.push(self.apply_event(&mut job, ReleaseEvent::Start, &mut events)?);
        } else {
            let stage = job.current_stage().ok_or_else(|| {
                StateMachineError::InvariantViolated {
                    reason: format!("release {release_id} is RUNNING with no stage in progress"),
                }
            })?;

            let step = self
                .advance_stage(&release, &mut job, stage, now, &mut changeset)
                .await?;
            changeset.extend_tasks(step.progress.transitions, step.progress.consumptions);

            if let Some(failure) = step.progress.failure {
                warn!(
                    task_id = %failure.task_id,
                    task_type = %failure.task_type,
                    reason = %failure.reason,
                    "Task failed, pausing release"
                );
                let event = ReleaseEvent::TaskFailed {
                    task_id: failure.task_id,
                    reason: failure.reason,
                };
                effects.push(self.apply_event(&mut job, event, &mut events)?);
            } else if step.stage_complete {
                effects.push(self.apply_event(
                    &mut job,
                    ReleaseEvent::StageCompleted(stage),
                    &mut events,
                )?);
            }
        }

        for effect in &effects {
            if let TransitionEffect::StageStarted(stage) = effect {
                changeset
                    .new_tasks
                    .extend(task_factory::stage_tasks(&release, &job.cron_config, *stage));
                if *stage == Stage::Kickoff {
                    create_release_pollers(&self.pollers, release_id, self.poller_interval_minutes)
                        .await?;
                }
            }
        }

        job.validate_invariants(release.archived)?;
        if job != original {
            changeset.cron_job = Some(job.clone());
        }

        let outcome = TickOutcome {
            release_id,
            cron_status: job.cron_status,
            pause_type: job.pause_type,
            current_stage: job.current_stage(),
            events,
            tasks_created: changeset.new_tasks.len(),
            task_transitions: changeset.task_transitions.len(),
            uploads_consumed: changeset.upload_consumptions.len(),
        };

        if changeset.is_empty() {
            debug!("Tick made no changes");
            return Ok(outcome);
        }

        self.store.commit(changeset).await?;

        if effects
            .iter()
            .any(|effect| matches!(effect, TransitionEffect::Completed { .. }))
        {
            self.remove_pollers(release_id).await;
        }

        log_release_operation(
            "tick",
            release_id,
            Some(owner_id),
            &outcome.cron_status.to_string(),
            Some(&format!(
                "{} events, {} tasks created, {} task transitions",
                outcome.events.len(),
                outcome.tasks_created,
                outcome.task_transitions
            )),
        );
        Ok(outcome)
    }

    /// Stop a RUNNING release until it is resumed
    pub async fn pause(&self, release_id: Uuid) -> Result<CronJob> {
        self.operator_action(release_id, ReleaseEvent::PauseRequested)
            .await
    }

    /// Lift a user-requested pause
    pub async fn resume(&self, release_id: Uuid) -> Result<CronJob> {
        self.operator_action(release_id, ReleaseEvent::ResumeRequested)
            .await
    }

    /// Start the stage a release is waiting on
    pub async fn trigger_next_stage(&self, release_id: Uuid) -> Result<CronJob> {
        self.operator_action(release_id, ReleaseEvent::StageTriggered)
            .await
    }

    /// Put the current stage's FAILED tasks back to PENDING and resume
    pub async fn retry_failed_tasks(&self, release_id: Uuid) -> Result<CronJob> {
        self.operator_action(release_id, ReleaseEvent::RetryRequested)
            .await
    }

    /// Complete the release immediately
    pub async fn archive(&self, release_id: Uuid) -> Result<CronJob> {
        self.operator_action(release_id, ReleaseEvent::Archived)
            .await
    }

    #[instrument(skip(self), fields(release_id = %release_id, event = event.event_type()))]
    async fn operator_action(&self, release_id: Uuid, event: ReleaseEvent) -> Result<CronJob> {
        let acquired = self
            .lock_manager
            .acquire(release_id, &self.owner_id, self.lock_timeout_seconds)
            .await?;
        if !acquired {
            return Err(OrchestrationError::LockContention { release_id });
        }

        let result = self.apply_operator_event(release_id, event).await;

        if let Err(err) = self.lock_manager.release(release_id, &self.owner_id).await {
            warn!(error = %err, "Failed to release lock after operator action");
        }
        result
    }

    async fn apply_operator_event(&self, release_id: Uuid, event: ReleaseEvent) -> Result<CronJob> {
        let (release, original) = self.load(release_id).await?;
        let mut job = original.clone();
        let mut changeset = ReleaseChangeset::new(release_id, Some(self.owner_id.clone()));
        let event_type = event.event_type();

        let effect = transitions::apply(&mut job, &event)
            .map_err(|err| into_orchestration_error(release_id, err))?;

        match (&event, effect) {
            (ReleaseEvent::RetryRequested, _) => {
                let stage = job.current_stage().ok_or_else(|| {
                    OrchestrationError::invalid_transition(release_id, "no stage in progress")
                })?;
                let retried: Vec<TaskTransition> = self
                    .store
                    .tasks_for_stage(release_id, stage)
                    .await?
                    .into_iter()
                    .filter(|task| task.task_status == TaskStatus::Failed)
                    .map(|task| TaskTransition::new(task.id, TaskStatus::Failed, TaskStatus::Pending))
                    .collect();
                info!(stage = %stage, tasks = retried.len(), "Retrying failed tasks");
                changeset.extend_tasks(retried, Vec::new());
            }
            (_, TransitionEffect::StageStarted(stage)) => {
                changeset
                    .new_tasks
                    .extend(task_factory::stage_tasks(&release, &job.cron_config, stage));
            }
            (_, TransitionEffect::Completed { archived: true }) => {
                changeset.archive_release = true;
            }
            _ => {}
        }

        job.validate_invariants(release.archived || changeset.archive_release)?;
        changeset.cron_job = Some(job.clone());
        self.store.commit(changeset).await?;

        if matches!(effect, TransitionEffect::Completed { .. }) {
            self.remove_pollers(release_id).await;
        }

        log_release_operation(
            event_type,
            release_id,
            Some(&self.owner_id),
            &job.cron_status.to_string(),
            None,
        );
        Ok(job)
    }

    async fn load(&self, release_id: Uuid) -> Result<(Release, CronJob)> {
        let release = self
            .store
            .find_release(release_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("Release", release_id))?;
        let cron_job = self
            .store
            .find_cron_job(release_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("CronJob", release_id))?;
        Ok((release, cron_job))
    }

    fn apply_event(
        &self,
        job: &mut CronJob,
        event: ReleaseEvent,
        events: &mut Vec<ReleaseEvent>,
    ) -> Result<TransitionEffect> {
        let effect = transitions::apply(job, &event)
            .map_err(|err| into_orchestration_error(job.release_id, err))?;
        debug!(event = event.event_type(), effect = ?effect, "Applied release event");
        events.push(event);
        Ok(effect)
    }

    async fn advance_stage(
        &self,
        release: &Release,
        job: &mut CronJob,
        stage: Stage,
        now: DateTime<Utc>,
        changeset: &mut ReleaseChangeset,
    ) -> Result<StageStep> {
        match stage {
            Stage::Kickoff | Stage::PreRelease => {
                let tasks = self.store.tasks_for_stage(release.id, stage).await?;
                let progress = self.executor.advance(release, stage, tasks, None).await?;
                Ok(StageStep {
                    stage_complete: progress.all_completed,
                    progress,
                })
            }
            Stage::Regression => self.advance_regression(release, job, now, changeset).await,
            Stage::Distribution => {
                let submissions = self.store.submissions_for_release(release.id).await?;
                let submitted_platforms = submitted_platforms(release, &submissions);
                job.stage_data = StageData::Distribution {
                    submitted_platforms,
                };
                Ok(StageStep {
                    progress: StageProgress::default(),
                    stage_complete: is_distribution_complete(release, &submissions),
                })
            }
        }
    }

    /// Advance the running regression cycle, then fire the next due slot once the
    /// previous cycle has finished. Slots fire one at a time.
    async fn advance_regression(
        &self,
        release: &Release,
        job: &mut CronJob,
        now: DateTime<Utc>,
        changeset: &mut ReleaseChangeset,
    ) -> Result<StageStep> {
        let (mut current_cycle_id, mut current_slot, mut completed_cycles) = match &job.stage_data
        {
            StageData::Regression {
                current_cycle_id,
                current_slot,
                completed_cycles,
            } => (*current_cycle_id, *current_slot, *completed_cycles),
            _ => (None, None, 0),
        };

        let mut progress = StageProgress::default();
        if let Some(cycle_id) = current_cycle_id {
            let tasks = self
                .store
                .tasks_for_stage(release.id, Stage::Regression)
                .await?
                .into_iter()
                .filter(|task| task.cycle_id == Some(cycle_id))
                .collect();
            progress = self
                .executor
                .advance(release, Stage::Regression, tasks, current_slot)
                .await?;
            if progress.all_completed {
                info!(cycle_id = %cycle_id, "Regression cycle completed");
                completed_cycles += 1;
                current_cycle_id = None;
                current_slot = None;
            }
        }

        if current_cycle_id.is_none() && progress.failure.is_none() {
            let due = match job.upcoming_regressions.first() {
                Some(slot) => slot.is_due(release.kickoff_at, now)?,
                None => false,
            };
            if due {
                let slot = job.upcoming_regressions.remove(0);
                let cycle_id = Uuid::new_v4();
                info!(
                    cycle_id = %cycle_id,
                    offset_from_kickoff = slot.offset_from_kickoff,
                    time = %slot.time,
                    "Starting regression cycle"
                );
                changeset.new_tasks.extend(task_factory::regression_cycle_tasks(
                    release,
                    &job.cron_config,
                    &slot.config,
                    cycle_id,
                ));
                current_cycle_id = Some(cycle_id);
                current_slot = Some(slot.config);
            }
        }

        let stage_complete = progress.failure.is_none()
            && current_cycle_id.is_none()
            && job.upcoming_regressions.is_empty();
        job.stage_data = StageData::Regression {
            current_cycle_id,
            current_slot,
            completed_cycles,
        };

        Ok(StageStep {
            progress,
            stage_complete,
        })
    }

    async fn remove_pollers(&self, release_id: Uuid) {
        if let Err(err) = delete_release_pollers(&self.pollers, release_id).await {
            warn!(release_id = %release_id, error = %err, "Failed to delete workflow pollers");
        }
    }
}

fn into_orchestration_error(release_id: Uuid, err: StateMachineError) -> OrchestrationError {
    match err {
        StateMachineError::InvalidTransition { .. } => {
            OrchestrationError::invalid_transition(release_id, err.to_string())
        }
        other => other.into(),
    }
}

/// Every release platform has a fully-live submission
pub fn is_distribution_complete(release: &Release, submissions: &[Submission]) -> bool {
    release.platforms.iter().all(|platform| {
        submissions
            .iter()
            .any(|submission| submission.platform == *platform && submission.is_fully_live())
    })
}

fn submitted_platforms(release: &Release, submissions: &[Submission]) -> Vec<Platform> {
    release
        .platforms
        .iter()
        .copied()
        .filter(|platform| submissions.iter().any(|s| s.platform == *platform))
        .collect()
}
