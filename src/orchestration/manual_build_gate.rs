//! # Manual Build Gate
//!
//! Rendezvous between a build-producing task in a MANUAL_UPLOAD release and the
//! builds people upload for it. The task waits in AWAITING_CALLBACK until every
//! required platform has at least one unused upload for the task's upload stage;
//! then exactly one upload per platform (the most recent) is marked used by the
//! task and the task completes, in one atomic write.
//!
//! Missing platforms are not an error: the gate reports them and changes nothing.
//!
//! [`ManualBuildGate::check_and_consume`] runs outside a tick, so it takes the
//! release lock itself and commits under it, the same way operator actions do.
//! A release that is mid-tick yields [`OrchestrationError::LockContention`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::lock_manager::LockManager;
use crate::error::{OrchestrationError, Result};
use crate::models::cron_job::DEFAULT_LOCK_TIMEOUT_SECONDS;
use crate::models::{Platform, ReleaseTask, ReleaseUpload, TaskType};
use crate::repository::{ReleaseChangeset, ReleaseStore, TaskTransition, UploadConsumption};
use crate::state_machine::states::TaskStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub all_ready: bool,
    /// Whether this call marked uploads used and completed the task
    pub consumed: bool,
    /// Uploads consumed by this call
    pub uploads: Vec<ReleaseUpload>,
    pub missing_platforms: Vec<Platform>,
}

impl GateResult {
    fn already_completed() -> Self {
        Self {
            all_ready: true,
            consumed: false,
            uploads: Vec::new(),
            missing_platforms: Vec::new(),
        }
    }
}

/// Writes the gate wants applied, for callers that commit them as part of a larger changeset
#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub result: GateResult,
    pub transition: Option<TaskTransition>,
    pub consumptions: Vec<UploadConsumption>,
}

pub const DEFAULT_GATE_LOCK_OWNER: &str = "manual-build-gate";

#[derive(Clone)]
pub struct ManualBuildGate {
    store: Arc<dyn ReleaseStore>,
    lock_manager: LockManager,
    owner_id: String,
    lock_timeout_seconds: i64,
}

impl std::fmt::Debug for ManualBuildGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualBuildGate")
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

impl ManualBuildGate {
    pub fn new(store: Arc<dyn ReleaseStore>) -> Self {
        Self {
            lock_manager: LockManager::new(Arc::clone(&store)),
            store,
            owner_id: DEFAULT_GATE_LOCK_OWNER.to_string(),
            lock_timeout_seconds: DEFAULT_LOCK_TIMEOUT_SECONDS,
        }
    }

    /// Lock owner and timeout used by [`Self::check_and_consume`]
    pub fn with_lock_owner(mut self, owner_id: impl Into<String>, lock_timeout_seconds: i64) -> Self {
        self.owner_id = owner_id.into();
        self.lock_timeout_seconds = lock_timeout_seconds;
        self
    }

    /// Decide what the gate does for `task` given the currently unused uploads.
    ///
    /// Pure; nothing is written.
    pub fn evaluate(
        task: &ReleaseTask,
        required_platforms: &[Platform],
        unused_uploads: &[ReleaseUpload],
    ) -> GateDecision {
        if task.task_status == TaskStatus::Completed {
            return GateDecision {
                result: GateResult::already_completed(),
                transition: None,
                consumptions: Vec::new(),
            };
        }

        let mut selected = Vec::new();
        let mut missing_platforms = Vec::new();
        for platform in required_platforms {
            let newest = unused_uploads
                .iter()
                .filter(|upload| upload.platform == *platform && !upload.used)
                .max_by_key(|upload| upload.created_at);
            match newest {
                Some(upload) => selected.push(upload.clone()),
                None => missing_platforms.push(*platform),
            }
        }

        if !missing_platforms.is_empty() {
            return GateDecision {
                result: GateResult {
                    all_ready: false,
                    consumed: false,
                    uploads: Vec::new(),
                    missing_platforms,
                },
                transition: None,
                consumptions: Vec::new(),
            };
        }

        let consumptions = selected
            .iter()
            .map(|upload| UploadConsumption {
                upload_id: upload.id,
                task_id: task.id,
                cycle_id: task.cycle_id,
            })
            .collect();

        let uploads = selected
            .into_iter()
            .map(|mut upload| {
                upload.used = true;
                upload.used_by_task_id = Some(task.id);
                upload.used_in_cycle_id = task.cycle_id;
                upload
            })
            .collect();

        GateDecision {
            result: GateResult {
                all_ready: true,
                consumed: true,
                uploads,
                missing_platforms: Vec::new(),
            },
            transition: Some(TaskTransition::new(
                task.id,
                task.task_status,
                TaskStatus::Completed,
            )),
            consumptions,
        }
    }

    /// Read the task's unused uploads and decide, without writing
    pub async fn plan(
        &self,
        task: &ReleaseTask,
        required_platforms: &[Platform],
    ) -> Result<GateDecision> {
        if task.task_status == TaskStatus::Completed {
            return Ok(Self::evaluate(task, required_platforms, &[]));
        }
        let upload_stage = task.task_type.upload_stage().ok_or_else(|| {
            OrchestrationError::validation(format!(
                "task type {} does not consume uploads",
                task.task_type
            ))
        })?;
        let unused = self
            .store
            .unused_uploads(task.release_id, upload_stage)
            .await?;
        Ok(Self::evaluate(task, required_platforms, &unused))
    }

    /// Check a waiting task's uploads and, if every platform is ready, consume them
    /// and complete the task atomically.
    ///
    /// Calling this again after the task completed changes nothing.
    #[instrument(skip(self, required_platforms), fields(release_id = %release_id, task_id = %task_id))]
    pub async fn check_and_consume(
        &self,
        release_id: Uuid,
        task_id: Uuid,
        task_type: TaskType,
        cycle_id: Option<Uuid>,
        required_platforms: &[Platform],
    ) -> Result<GateResult> {
        let acquired = self
            .lock_manager
            .acquire(release_id, &self.owner_id, self.lock_timeout_seconds)
            .await?;
        if !acquired {
            return Err(OrchestrationError::LockContention { release_id });
        }

        let result = self
            .consume_locked(release_id, task_id, task_type, cycle_id, required_platforms)
            .await;

        if let Err(err) = self.lock_manager.release(release_id, &self.owner_id).await {
            warn!(error = %err, "Failed to release lock after manual build check");
        }
        result
    }

    async fn consume_locked(
        &self,
        release_id: Uuid,
        task_id: Uuid,
        task_type: TaskType,
        cycle_id: Option<Uuid>,
        required_platforms: &[Platform],
    ) -> Result<GateResult> {
        let task = self
            .store
            .find_task(task_id)
            .await?
            .filter(|task| task.release_id == release_id)
            .ok_or_else(|| OrchestrationError::not_found("ReleaseTask", task_id))?;

        if task.task_type != task_type || task.cycle_id != cycle_id {
            return Err(OrchestrationError::validation(format!(
                "task {task_id} is {} in cycle {:?}, not {task_type} in cycle {cycle_id:?}",
                task.task_type, task.cycle_id
            )));
        }

        if !matches!(
            task.task_status,
            TaskStatus::Pending | TaskStatus::AwaitingCallback | TaskStatus::Completed
        ) {
            return Err(OrchestrationError::invalid_transition(
                release_id,
                format!("task {task_id} is {} and cannot take uploads", task.task_status),
            ));
        }

        let decision = self.plan(&task, required_platforms).await?;
        if !decision.result.consumed {
            debug!(
                all_ready = decision.result.all_ready,
                missing_platforms = ?decision.result.missing_platforms,
                "Manual build gate not consuming"
            );
            return Ok(decision.result);
        }

        let mut changeset = ReleaseChangeset::new(release_id, Some(self.owner_id.clone()));
        changeset.extend_tasks(decision.transition.into_iter().collect(), decision.consumptions);
        self.store.commit(changeset).await?;

        info!(
            task_type = %task_type,
            uploads = decision.result.uploads.len(),
            "Manual builds consumed, task completed"
        );
        Ok(decision.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UploadStage;
    use chrono::{Duration, Utc};

    fn waiting_task() -> ReleaseTask {
        let mut task = ReleaseTask::new(
            Uuid::new_v4(),
            TaskType::TriggerRegressionBuilds,
            Some(Uuid::new_v4()),
            0,
        );
        task.task_status = TaskStatus::AwaitingCallback;
        task
    }

    fn upload(task: &ReleaseTask, platform: Platform, age_minutes: i64) -> ReleaseUpload {
        let mut upload = ReleaseUpload::new(
            task.release_id,
            UploadStage::Regression,
            platform,
            format!("builds/{platform}/{age_minutes}"),
        );
        upload.created_at = Utc::now() - Duration::minutes(age_minutes);
        upload
    }

    #[test]
    fn test_missing_platforms_reported() {
        let task = waiting_task();
        let uploads = vec![upload(&task, Platform::Android, 1)];

        let decision =
            ManualBuildGate::evaluate(&task, &[Platform::Android, Platform::Ios], &uploads);
        assert!(!decision.result.all_ready);
        assert_eq!(decision.result.missing_platforms, vec![Platform::Ios]);
        assert!(decision.transition.is_none());
        assert!(decision.consumptions.is_empty());
    }

    #[test]
    fn test_newest_upload_per_platform_is_selected() {
        let task = waiting_task();
        let older = upload(&task, Platform::Android, 30);
        let newer = upload(&task, Platform::Android, 5);
        let ios = upload(&task, Platform::Ios, 10);

        let decision = ManualBuildGate::evaluate(
            &task,
            &[Platform::Android, Platform::Ios],
            &[older, newer.clone(), ios.clone()],
        );
        assert!(decision.result.consumed);
        let consumed: Vec<Uuid> = decision.consumptions.iter().map(|c| c.upload_id).collect();
        assert_eq!(consumed, vec![newer.id, ios.id]);
        assert!(decision
            .result
            .uploads
            .iter()
            .all(|u| u.used && u.used_by_task_id == Some(task.id) && u.used_in_cycle_id == task.cycle_id));
        assert_eq!(
            decision.transition.map(|t| (t.from, t.to)),
            Some((TaskStatus::AwaitingCallback, TaskStatus::Completed))
        );
    }

    #[test]
    fn test_completed_task_is_a_no_op() {
        let mut task = waiting_task();
        task.task_status = TaskStatus::Completed;
        let uploads = vec![upload(&task, Platform::Android, 1)];

        let decision = ManualBuildGate::evaluate(&task, &[Platform::Android], &uploads);
        assert!(!decision.result.consumed);
        assert!(decision.transition.is_none());
        assert!(decision.consumptions.is_empty());
    }
}
