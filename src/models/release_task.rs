//! # Release Task Model
//!
//! A unit of stage work. Tasks are created when a stage (or a regression cycle)
//! begins and are only mutated by the task executor, the manual build gate and
//! the operator retry action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::platform::Platform;
use super::release_upload::UploadStage;
use crate::state_machine::states::{Stage, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    // Kickoff
    PreKickOffReminder,
    ForkBranch,
    CreateProjectManagementTicket,
    CreateTestSuite,
    TriggerPreRegressionBuilds,
    // Regression, once per cycle
    ResetTestSuite,
    CreateRcTag,
    CreateReleaseNotes,
    TriggerRegressionBuilds,
    TriggerAutomationRuns,
    AutomationRuns,
    SendRegressionBuildMessage,
    // Pre-release
    CreateReleaseTag,
    CreateFinalReleaseNotes,
    TriggerTestFlightBuild,
    CreateAabBuild,
    SendPreReleaseMessage,
}

impl TaskType {
    pub fn stage(&self) -> Stage {
        match self {
            Self::PreKickOffReminder
            | Self::ForkBranch
            | Self::CreateProjectManagementTicket
            | Self::CreateTestSuite
            | Self::TriggerPreRegressionBuilds => Stage::Kickoff,
            Self::ResetTestSuite
            | Self::CreateRcTag
            | Self::CreateReleaseNotes
            | Self::TriggerRegressionBuilds
            | Self::TriggerAutomationRuns
            | Self::AutomationRuns
            | Self::SendRegressionBuildMessage => Stage::Regression,
            Self::CreateReleaseTag
            | Self::CreateFinalReleaseNotes
            | Self::TriggerTestFlightBuild
            | Self::CreateAabBuild
            | Self::SendPreReleaseMessage => Stage::PreRelease,
        }
    }

    /// Task types that produce a build and can wait on a manual upload instead.
    pub fn is_build_producing(&self) -> bool {
        matches!(
            self,
            Self::TriggerPreRegressionBuilds
                | Self::TriggerRegressionBuilds
                | Self::TriggerTestFlightBuild
                | Self::CreateAabBuild
        )
    }

    /// Upload stage a build-producing task consumes from.
    pub fn upload_stage(&self) -> Option<UploadStage> {
        match self {
            Self::TriggerPreRegressionBuilds => Some(UploadStage::PreRegression),
            Self::TriggerRegressionBuilds => Some(UploadStage::Regression),
            Self::TriggerTestFlightBuild | Self::CreateAabBuild => Some(UploadStage::PreRelease),
            _ => None,
        }
    }

    /// Platforms a build-producing task needs an upload for.
    ///
    /// TestFlight builds are iOS-only and AAB builds Android-only; the other build
    /// tasks need one build per release platform. Platform-specific tasks only
    /// require their platform when the release actually targets it.
    pub fn required_platforms(&self, release_platforms: &[Platform]) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = match self {
            Self::TriggerTestFlightBuild => release_platforms
                .iter()
                .copied()
                .filter(|p| *p == Platform::Ios)
                .collect(),
            Self::CreateAabBuild => release_platforms
                .iter()
                .copied()
                .filter(|p| *p == Platform::Android)
                .collect(),
            _ => release_platforms.to_vec(),
        };
        platforms.sort();
        platforms.dedup();
        platforms
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // serde's SCREAMING_SNAKE_CASE is the canonical name
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{self:?}"));
        write!(f, "{name}")
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("Invalid task type: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseTask {
    pub id: Uuid,
    pub release_id: Uuid,
    pub stage: Stage,
    pub task_type: TaskType,
    pub task_status: TaskStatus,
    /// Groups one regression iteration's tasks and uploads
    pub cycle_id: Option<Uuid>,
    pub failure_reason: Option<String>,
    /// Identifier handed back by the collaborator on dispatch (build id, ticket key)
    pub external_ref: Option<String>,
    /// Position within the stage; tasks are advanced in this order
    pub sequence: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReleaseTask {
    pub fn new(release_id: Uuid, task_type: TaskType, cycle_id: Option<Uuid>, sequence: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            release_id,
            stage: task_type.stage(),
            task_type,
            task_status: TaskStatus::Pending,
            cycle_id,
            failure_reason: None,
            external_ref: None,
            sequence,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.task_status.is_terminal()
    }
}
