//! # Cron Job Model
//!
//! One cron job exists per release and carries everything the tick loop needs to
//! decide what to do next: the four stage statuses, the overall cron status, why
//! the release is paused, the upcoming regression slots, and the advisory lock.
//!
//! ## Lock fields
//!
//! `locked_by`/`locked_at`/`lock_timeout_seconds` describe the advisory lock and
//! `lock_version` is bumped by every lock write. Acquisition is a compare-and-set
//! on `lock_version`, so two instances that read the same unlocked row cannot
//! both win.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::platform::Platform;
use super::regression_slot::{RegressionSlot, RegressionSlotConfig};
use crate::state_machine::errors::{invariant_violated, StateMachineResult};
use crate::state_machine::states::{CronStatus, PauseType, Stage, StageStatus};

pub const DEFAULT_LOCK_TIMEOUT_SECONDS: i64 = 300;

/// Per-release feature toggles deciding which tasks each stage creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CronConfig {
    pub kickoff_reminder: bool,
    pub pre_regression_builds: bool,
    pub project_management: bool,
    pub test_management: bool,
    pub release_notes: bool,
    pub test_flight_builds: bool,
    pub aab_builds: bool,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            kickoff_reminder: true,
            pre_regression_builds: true,
            project_management: true,
            test_management: true,
            release_notes: true,
            test_flight_builds: true,
            aab_builds: true,
        }
    }
}

/// Working state scoped to the stage currently running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageData {
    Kickoff {
        branch: Option<String>,
    },
    Regression {
        current_cycle_id: Option<Uuid>,
        /// Configuration of the slot that started the current cycle
        #[serde(default)]
        current_slot: Option<RegressionSlotConfig>,
        completed_cycles: u32,
    },
    PreRelease {
        release_tag: Option<String>,
    },
    Distribution {
        submitted_platforms: Vec<Platform>,
    },
}

impl StageData {
    pub fn initial_for(stage: Stage) -> Self {
        match stage {
            Stage::Kickoff => Self::Kickoff { branch: None },
            Stage::Regression => Self::Regression {
                current_cycle_id: None,
                current_slot: None,
                completed_cycles: 0,
            },
            Stage::PreRelease => Self::PreRelease { release_tag: None },
            Stage::Distribution => Self::Distribution {
                submitted_platforms: Vec::new(),
            },
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Kickoff { .. } => Stage::Kickoff,
            Self::Regression { .. } => Stage::Regression,
            Self::PreRelease { .. } => Stage::PreRelease,
            Self::Distribution { .. } => Stage::Distribution,
        }
    }
}

impl Default for StageData {
    fn default() -> Self {
        Self::initial_for(Stage::Kickoff)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    pub release_id: Uuid,
    pub stage1_status: StageStatus,
    pub stage2_status: StageStatus,
    pub stage3_status: StageStatus,
    pub stage4_status: StageStatus,
    pub cron_status: CronStatus,
    pub pause_type: PauseType,
    pub cron_config: CronConfig,
    pub upcoming_regressions: Vec<RegressionSlot>,
    pub auto_transition_to_stage2: bool,
    pub auto_transition_to_stage3: bool,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_timeout_seconds: i64,
    pub lock_version: i64,
    pub stage_data: StageData,
    pub updated_at: DateTime<Utc>,
}

impl CronJob {
    pub fn new(release_id: Uuid, cron_config: CronConfig) -> Self {
        Self {
            release_id,
            stage1_status: StageStatus::Pending,
            stage2_status: StageStatus::Pending,
            stage3_status: StageStatus::Pending,
            stage4_status: StageStatus::Pending,
            cron_status: CronStatus::Pending,
            pause_type: PauseType::None,
            cron_config,
            upcoming_regressions: Vec::new(),
            auto_transition_to_stage2: false,
            auto_transition_to_stage3: false,
            locked_by: None,
            locked_at: None,
            lock_timeout_seconds: DEFAULT_LOCK_TIMEOUT_SECONDS,
            lock_version: 0,
            stage_data: StageData::default(),
            updated_at: Utc::now(),
        }
    }

    /// Slots are kept in firing order
    pub fn with_regressions(mut self, mut slots: Vec<RegressionSlot>) -> Self {
        slots.sort_by(|a, b| {
            (a.offset_from_kickoff, a.time.as_str()).cmp(&(b.offset_from_kickoff, b.time.as_str()))
        });
        self.upcoming_regressions = slots;
        self
    }

    pub fn with_auto_transitions(mut self, to_stage2: bool, to_stage3: bool) -> Self {
        self.auto_transition_to_stage2 = to_stage2;
        self.auto_transition_to_stage3 = to_stage3;
        self
    }

    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Kickoff => self.stage1_status,
            Stage::Regression => self.stage2_status,
            Stage::PreRelease => self.stage3_status,
            Stage::Distribution => self.stage4_status,
        }
    }

    pub fn set_stage_status(&mut self, stage: Stage, status: StageStatus) {
        match stage {
            Stage::Kickoff => self.stage1_status = status,
            Stage::Regression => self.stage2_status = status,
            Stage::PreRelease => self.stage3_status = status,
            Stage::Distribution => self.stage4_status = status,
        }
    }

    /// The stage currently being worked on, if any.
    pub fn current_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|stage| self.stage_status(*stage) == StageStatus::InProgress)
    }

    /// The first stage that has not started yet.
    pub fn next_pending_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|stage| self.stage_status(*stage) == StageStatus::Pending)
    }

    /// Whether the next pending stage is gated behind an explicit trigger.
    pub fn requires_trigger_for(&self, stage: Stage) -> bool {
        match stage {
            Stage::Regression => !self.auto_transition_to_stage2,
            Stage::PreRelease => !self.auto_transition_to_stage3,
            Stage::Kickoff | Stage::Distribution => false,
        }
    }

    pub fn begin_stage(&mut self, stage: Stage) {
        self.set_stage_status(stage, StageStatus::InProgress);
        self.stage_data = StageData::initial_for(stage);
    }

    pub fn pause(&mut self, pause_type: PauseType) -> StateMachineResult<()> {
        if pause_type == PauseType::None {
            return Err(invariant_violated("cannot pause with pause type NONE"));
        }
        if self.cron_status.is_terminal() {
            return Err(invariant_violated(format!(
                "cannot pause completed cron job for release {}",
                self.release_id
            )));
        }
        self.cron_status = CronStatus::Paused;
        self.pause_type = pause_type;
        Ok(())
    }

    pub fn resume(&mut self) {
        self.cron_status = CronStatus::Running;
        self.pause_type = PauseType::None;
    }

    pub fn complete(&mut self, archived: bool) -> StateMachineResult<()> {
        if !archived && self.stage4_status != StageStatus::Completed {
            return Err(invariant_violated(format!(
                "release {} cannot complete before distribution has completed",
                self.release_id
            )));
        }
        self.cron_status = CronStatus::Completed;
        self.pause_type = PauseType::None;
        Ok(())
    }

    pub fn lock_expires_at(&self) -> Option<DateTime<Utc>> {
        self.locked_at
            .map(|at| at + Duration::seconds(self.lock_timeout_seconds))
    }

    /// A lock is held iff an owner is set and its timeout has not elapsed.
    pub fn is_lock_held(&self, now: DateTime<Utc>) -> bool {
        match (&self.locked_by, self.lock_expires_at()) {
            (Some(_), Some(expires_at)) => now < expires_at,
            _ => false,
        }
    }

    pub fn is_locked_by(&self, owner_id: &str, now: DateTime<Utc>) -> bool {
        self.is_lock_held(now) && self.locked_by.as_deref() == Some(owner_id)
    }

    pub fn validate_invariants(&self, archived: bool) -> StateMachineResult<()> {
        if self.cron_status == CronStatus::Completed
            && !archived
            && self.stage4_status != StageStatus::Completed
        {
            return Err(invariant_violated(
                "cron status COMPLETED requires stage 4 COMPLETED or an archived release",
            ));
        }
        if self.pause_type != PauseType::None && self.cron_status != CronStatus::Paused {
            return Err(invariant_violated(format!(
                "pause type {} set while cron status is {}",
                self.pause_type, self.cron_status
            )));
        }
        if self.cron_status == CronStatus::Paused && self.pause_type == PauseType::None {
            return Err(invariant_violated("cron status PAUSED without a pause type"));
        }
        let in_progress = Stage::ALL
            .iter()
            .filter(|stage| self.stage_status(**stage) == StageStatus::InProgress)
            .count();
        if in_progress > 1 {
            return Err(invariant_violated(format!(
                "{in_progress} stages in progress at once"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cron_job() -> CronJob {
        CronJob::new(Uuid::new_v4(), CronConfig::default())
    }

    #[test]
    fn test_new_cron_job_defaults() {
        let job = cron_job();
        assert_eq!(job.cron_status, CronStatus::Pending);
        assert_eq!(job.pause_type, PauseType::None);
        assert_eq!(job.lock_timeout_seconds, 300);
        assert_eq!(job.current_stage(), None);
        assert_eq!(job.next_pending_stage(), Some(Stage::Kickoff));
        assert!(job.validate_invariants(false).is_ok());
    }

    #[test]
    fn test_with_regressions_sorts_by_firing_time() {
        let slot = |offset: u32, time: &str| RegressionSlot {
            offset_from_kickoff: offset,
            time: time.to_string(),
            config: Default::default(),
        };
        let job = cron_job().with_regressions(vec![slot(2, "08:00"), slot(0, "17:00"), slot(0, "09:00")]);
        let order: Vec<(u32, &str)> = job
            .upcoming_regressions
            .iter()
            .map(|s| (s.offset_from_kickoff, s.time.as_str()))
            .collect();
        assert_eq!(order, vec![(0, "09:00"), (0, "17:00"), (2, "08:00")]);
    }

    #[test]
    fn test_lock_held_until_timeout() {
        let mut job = cron_job();
        let now = Utc::now();
        assert!(!job.is_lock_held(now));

        job.locked_by = Some("instance-a".to_string());
        job.locked_at = Some(now);
        assert!(job.is_lock_held(now + Duration::seconds(299)));
        assert!(!job.is_lock_held(now + Duration::seconds(300)));
        assert!(job.is_locked_by("instance-a", now));
        assert!(!job.is_locked_by("instance-b", now));
    }

    #[test]
    fn test_pause_and_resume_keep_invariants() {
        let mut job = cron_job();
        job.cron_status = CronStatus::Running;
        job.pause(PauseType::UserRequested).unwrap();
        assert_eq!(job.cron_status, CronStatus::Paused);
        assert!(job.validate_invariants(false).is_ok());

        job.resume();
        assert_eq!(job.pause_type, PauseType::None);
        assert!(job.validate_invariants(false).is_ok());

        assert!(job.pause(PauseType::None).is_err());
    }

    #[test]
    fn test_complete_requires_distribution_or_archive() {
        let mut job = cron_job();
        assert!(job.complete(false).is_err());
        assert!(job.complete(true).is_ok());
        assert!(job.validate_invariants(true).is_ok());
        assert!(job.validate_invariants(false).is_err());

        let mut finished = cron_job();
        finished.stage4_status = StageStatus::Completed;
        assert!(finished.complete(false).is_ok());
    }

    #[test]
    fn test_stage_tracking() {
        let mut job = cron_job();
        job.set_stage_status(Stage::Kickoff, StageStatus::Completed);
        job.begin_stage(Stage::Regression);
        assert_eq!(job.current_stage(), Some(Stage::Regression));
        assert_eq!(job.next_pending_stage(), Some(Stage::PreRelease));
        assert!(matches!(job.stage_data, StageData::Regression { .. }));
        assert!(job.requires_trigger_for(Stage::Regression));
        assert!(!job.requires_trigger_for(Stage::Distribution));
    }

    #[test]
    fn test_stage_data_serde_is_tagged() {
        let json = serde_json::to_value(StageData::initial_for(Stage::Regression)).unwrap();
        assert_eq!(json["stage"], "REGRESSION");
        assert_eq!(json["completed_cycles"], 0);
    }
}
