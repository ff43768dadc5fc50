use serde::{Deserialize, Serialize};
use std::fmt;

/// The four stages of a release, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Kickoff,
    Regression,
    PreRelease,
    Distribution,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Self::Kickoff,
        Self::Regression,
        Self::PreRelease,
        Self::Distribution,
    ];

    /// 1-based stage number as used by the `stageN_status` columns.
    pub fn number(&self) -> u8 {
        match self {
            Self::Kickoff => 1,
            Self::Regression => 2,
            Self::PreRelease => 3,
            Self::Distribution => 4,
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::Kickoff => Some(Self::Regression),
            Self::Regression => Some(Self::PreRelease),
            Self::PreRelease => Some(Self::Distribution),
            Self::Distribution => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kickoff => write!(f, "KICKOFF"),
            Self::Regression => write!(f, "REGRESSION"),
            Self::PreRelease => write!(f, "PRE_RELEASE"),
            Self::Distribution => write!(f, "DISTRIBUTION"),
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "KICKOFF" => Ok(Self::Kickoff),
            "REGRESSION" => Ok(Self::Regression),
            "PRE_RELEASE" => Ok(Self::PreRelease),
            "DISTRIBUTION" => Ok(Self::Distribution),
            _ => Err(format!("Invalid stage: {s}")),
        }
    }
}

/// Status of a single stage on the cron job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
        }
    }
}

impl std::str::FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            _ => Err(format!("Invalid stage status: {s}")),
        }
    }
}

/// Overall status of a release's cron job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CronStatus {
    /// Created, waiting for kickoff time
    #[default]
    Pending,
    /// Ticks advance the release
    Running,
    /// Ticks are no-ops until an operator acts; see [`PauseType`]
    Paused,
    /// Terminal
    Completed,
}

impl CronStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Whether a tick may do any work for a cron job in this status
    pub fn is_tickable(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for CronStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Completed => write!(f, "COMPLETED"),
        }
    }
}

impl std::str::FromStr for CronStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETED" => Ok(Self::Completed),
            _ => Err(format!("Invalid cron status: {s}")),
        }
    }
}

/// Why a cron job is paused. Non-`None` only while the cron status is `Paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PauseType {
    #[default]
    None,
    AwaitingStageTrigger,
    UserRequested,
    TaskFailure,
}

impl fmt::Display for PauseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::AwaitingStageTrigger => write!(f, "AWAITING_STAGE_TRIGGER"),
            Self::UserRequested => write!(f, "USER_REQUESTED"),
            Self::TaskFailure => write!(f, "TASK_FAILURE"),
        }
    }
}

impl std::str::FromStr for PauseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "AWAITING_STAGE_TRIGGER" => Ok(Self::AwaitingStageTrigger),
            "USER_REQUESTED" => Ok(Self::UserRequested),
            "TASK_FAILURE" => Ok(Self::TaskFailure),
            _ => Err(format!("Invalid pause type: {s}")),
        }
    }
}

/// Release task state definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created with its stage, not yet dispatched
    #[default]
    Pending,
    /// Dispatched to its collaborator, result outstanding
    InProgress,
    /// Waiting for a manual build upload
    AwaitingCallback,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::AwaitingCallback => write!(f, "AWAITING_CALLBACK"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "AWAITING_CALLBACK" => Ok(Self::AwaitingCallback),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}
