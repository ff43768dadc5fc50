//! # Task Executor
//!
//! Advances the tasks of the current stage (or regression cycle) by one tick.
//!
//! ## Processing order
//!
//! 1. Every AWAITING_CALLBACK task is re-checked against the manual build gate
//! 2. Tasks are then walked in `sequence` order; a task only starts once every
//!    task before it has completed:
//!    - PENDING build task in a MANUAL_UPLOAD release: consume uploads if all
//!      platforms are ready, otherwise wait in AWAITING_CALLBACK
//!    - other PENDING tasks: dispatch to the task type's collaborator
//!    - IN_PROGRESS tasks: poll the collaborator
//! 3. No collaborator call starts once the tick budget is spent; the remaining
//!    tasks wait for the next tick
//!
//! Nothing is written here. Every change is returned in [`StageProgress`] and
//! committed by the state machine together with the rest of the tick.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::collaborators::{
    is_transient, CollaboratorInvoker, CollaboratorRegistry, TaskContext, TaskOutcome,
};
use super::manual_build_gate::ManualBuildGate;
use crate::error::{OrchestrationError, Result};
use crate::logging::log_task_operation;
use crate::models::{RegressionSlotConfig, Release, ReleaseTask, ReleaseUpload, TaskType, UploadStage};
use crate::repository::{ReleaseStore, TaskTransition, UploadConsumption};
use crate::state_machine::states::{Stage, TaskStatus};

/// The task that stopped the stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub reason: String,
}

/// Everything one `advance` call decided
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageProgress {
    pub transitions: Vec<TaskTransition>,
    pub consumptions: Vec<UploadConsumption>,
    pub failure: Option<StageFailure>,
    /// Every task is COMPLETED (vacuously true for a stage without tasks)
    pub all_completed: bool,
    /// Every task is COMPLETED or FAILED
    pub all_terminal: bool,
}

impl StageProgress {
    pub fn has_changes(&self) -> bool {
        !self.transitions.is_empty() || !self.consumptions.is_empty()
    }
}

/// Working copy of one task's status for the duration of a tick
struct TaskSlot {
    task: ReleaseTask,
    status: TaskStatus,
}

#[derive(Clone)]
pub struct TaskExecutor {
    store: Arc<dyn ReleaseStore>,
    collaborators: Arc<CollaboratorRegistry>,
    invoker: CollaboratorInvoker,
    tick_budget: Option<Duration>,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("invoker", &self.invoker)
            .field("tick_budget", &self.tick_budget)
            .finish_non_exhaustive()
    }
}

impl TaskExecutor {
    pub fn new(
        store: Arc<dyn ReleaseStore>,
        collaborators: Arc<CollaboratorRegistry>,
        invoker: CollaboratorInvoker,
    ) -> Self {
        Self {
            store,
            collaborators,
            invoker,
            tick_budget: None,
        }
    }

    /// Stop starting collaborator calls once `budget` has elapsed within one `advance`
    pub fn with_tick_budget(mut self, budget: Duration) -> Self {
        self.tick_budget = Some(budget);
        self
    }

    /// Advance `tasks` (one stage, or one regression cycle) by one tick
    #[instrument(skip(self, release, tasks, slot_config), fields(release_id = %release.id, stage = %stage))]
    pub async fn advance(
        &self,
        release: &Release,
        stage: Stage,
        tasks: Vec<ReleaseTask>,
        slot_config: Option<RegressionSlotConfig>,
    ) -> Result<StageProgress> {
        let mut slots: Vec<TaskSlot> = tasks
            .into_iter()
            .map(|task| TaskSlot {
                status: task.task_status,
                task,
            })
            .collect();
        slots.sort_by_key(|slot| (slot.task.sequence, slot.task.created_at));

        let mut progress = StageProgress::default();
        let mut claimed_uploads: HashSet<Uuid> = HashSet::new();
        let deadline = self
            .tick_budget
            .and_then(|budget| Instant::now().checked_add(budget));

        // Waiting tasks first: uploads may have arrived since the last tick
        for slot in slots
            .iter_mut()
            .filter(|slot| slot.status == TaskStatus::AwaitingCallback)
        {
            self.try_gate(release, slot, &mut claimed_uploads, &mut progress)
                .await?;
        }

        for slot in slots.iter_mut() {
            match slot.status {
                TaskStatus::Completed => continue,
                TaskStatus::Failed => {
                    progress.failure = Some(StageFailure {
                        task_id: slot.task.id,
                        task_type: slot.task.task_type,
                        reason: slot
                            .task
                            .failure_reason
                            .clone()
                            .unwrap_or_else(|| "task failed".to_string()),
                    });
                    break;
                }
                TaskStatus::AwaitingCallback => break,
                TaskStatus::Pending => {
                    if release.is_manual_upload() && slot.task.task_type.is_build_producing() {
                        let consumed = self
                            .try_gate(release, slot, &mut claimed_uploads, &mut progress)
                            .await?;
                        if !consumed {
                            record(&mut progress, slot, TaskStatus::AwaitingCallback, None, None);
                        }
                        if slot.status != TaskStatus::Completed {
                            break;
                        }
                        continue;
                    }
                    if budget_spent(deadline, &slot.task) {
                        break;
                    }
                    let context = self.context(release, &slot.task, slot_config);
                    let collaborator = self.collaborators.for_task(slot.task.task_type);
                    let outcome = self.invoker.dispatch(collaborator.as_ref(), &context).await;
                    if !self.apply_outcome(slot, outcome, &mut progress)? {
                        break;
                    }
                }
                TaskStatus::InProgress => {
                    if budget_spent(deadline, &slot.task) {
                        break;
                    }
                    let context = self.context(release, &slot.task, slot_config);
                    let collaborator = self.collaborators.for_task(slot.task.task_type);
                    let outcome = self
                        .invoker
                        .poll(
                            collaborator.as_ref(),
                            &context,
                            slot.task.external_ref.as_deref(),
                        )
                        .await;
                    if !self.apply_outcome(slot, outcome, &mut progress)? {
                        break;
                    }
                }
            }
        }

        progress.all_completed = slots.iter().all(|s| s.status == TaskStatus::Completed);
        progress.all_terminal = slots.iter().all(|s| s.status.is_terminal());
        debug!(
            transitions = progress.transitions.len(),
            consumptions = progress.consumptions.len(),
            all_completed = progress.all_completed,
            failed = progress.failure.is_some(),
            "Stage advanced"
        );
        Ok(progress)
    }

    fn context(
        &self,
        release: &Release,
        task: &ReleaseTask,
        slot_config: Option<RegressionSlotConfig>,
    ) -> TaskContext {
        TaskContext {
            release_id: release.id,
            task_id: task.id,
            task_type: task.task_type,
            stage: task.stage,
            cycle_id: task.cycle_id,
            version: release.version.clone(),
            platforms: release.platforms.clone(),
            slot_config: task.cycle_id.and(slot_config),
        }
    }

    /// Run the gate for one task. Returns whether the task completed.
    async fn try_gate(
        &self,
        release: &Release,
        slot: &mut TaskSlot,
        claimed_uploads: &mut HashSet<Uuid>,
        progress: &mut StageProgress,
    ) -> Result<bool> {
        let Some(upload_stage) = slot.task.task_type.upload_stage() else {
            return Ok(false);
        };
        let available = self
            .available_uploads(release.id, upload_stage, claimed_uploads)
            .await?;
        let required = slot.task.task_type.required_platforms(&release.platforms);

        let mut task = slot.task.clone();
        task.task_status = slot.status;
        let decision = ManualBuildGate::evaluate(&task, &required, &available);

        if !decision.result.consumed {
            debug!(
                task_id = %slot.task.id,
                missing_platforms = ?decision.result.missing_platforms,
                "Waiting on manual uploads"
            );
            return Ok(false);
        }

        claimed_uploads.extend(decision.consumptions.iter().map(|c| c.upload_id));
        progress.consumptions.extend(decision.consumptions);
        record(progress, slot, TaskStatus::Completed, None, None);
        Ok(true)
    }

    async fn available_uploads(
        &self,
        release_id: Uuid,
        stage: UploadStage,
        claimed: &HashSet<Uuid>,
    ) -> Result<Vec<ReleaseUpload>> {
        let unused = self.store.unused_uploads(release_id, stage).await?;
        Ok(unused
            .into_iter()
            .filter(|upload| !claimed.contains(&upload.id))
            .collect())
    }

    /// Apply a collaborator outcome. Returns whether later tasks may proceed this tick.
    fn apply_outcome(
        &self,
        slot: &mut TaskSlot,
        outcome: Result<TaskOutcome>,
        progress: &mut StageProgress,
    ) -> Result<bool> {
        match outcome {
            Ok(TaskOutcome::Completed) => {
                record(progress, slot, TaskStatus::Completed, None, None);
                Ok(true)
            }
            Ok(TaskOutcome::Failed { reason }) => {
                self.fail(slot, reason, progress);
                Ok(false)
            }
            Ok(TaskOutcome::Accepted { external_ref }) => {
                if slot.status != TaskStatus::InProgress {
                    record(progress, slot, TaskStatus::InProgress, None, external_ref);
                }
                Ok(false)
            }
            Ok(TaskOutcome::Running) => {
                if slot.status != TaskStatus::InProgress {
                    record(progress, slot, TaskStatus::InProgress, None, None);
                }
                Ok(false)
            }
            Err(OrchestrationError::TaskFailure { reason, .. }) => {
                self.fail(slot, reason, progress);
                Ok(false)
            }
            Err(err) if is_transient(&err) => {
                warn!(
                    task_id = %slot.task.id,
                    task_type = %slot.task.task_type,
                    error = %err,
                    "Collaborator retries exhausted, task left for next tick"
                );
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn fail(&self, slot: &mut TaskSlot, reason: String, progress: &mut StageProgress) {
        progress.failure = Some(StageFailure {
            task_id: slot.task.id,
            task_type: slot.task.task_type,
            reason: reason.clone(),
        });
        record(progress, slot, TaskStatus::Failed, Some(reason), None);
    }
}

fn budget_spent(deadline: Option<Instant>, task: &ReleaseTask) -> bool {
    let spent = deadline.is_some_and(|deadline| Instant::now() >= deadline);
    if spent {
        debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            "Tick budget spent, task left for next tick"
        );
    }
    spent
}

fn record(
    progress: &mut StageProgress,
    slot: &mut TaskSlot,
    to: TaskStatus,
    failure_reason: Option<String>,
    external_ref: Option<String>,
) {
    // A task moves at most once per tick, so the transition is always from the stored status
    let mut transition = TaskTransition::new(slot.task.id, slot.task.task_status, to)
        .with_external_ref(external_ref);
    if let Some(reason) = failure_reason {
        transition = transition.with_failure_reason(reason);
    }

    progress
        .transitions
        .retain(|existing| existing.task_id != slot.task.id);
    progress.transitions.push(transition);
    slot.status = to;

    log_task_operation(
        "transition",
        slot.task.release_id,
        slot.task.id,
        &slot.task.task_type.to_string(),
        &to.to_string(),
        None,
    );
}
