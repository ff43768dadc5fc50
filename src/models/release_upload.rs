//! # Release Upload Model
//!
//! A manually uploaded build. Rows are written by the upload intake and consumed
//! exactly once by the manual build gate; consumption only flags the row, it is
//! never deleted, so the uploads double as an audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStage {
    PreRegression,
    Regression,
    PreRelease,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreRegression => write!(f, "PRE_REGRESSION"),
            Self::Regression => write!(f, "REGRESSION"),
            Self::PreRelease => write!(f, "PRE_RELEASE"),
        }
    }
}

impl std::str::FromStr for UploadStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRE_REGRESSION" => Ok(Self::PreRegression),
            "REGRESSION" => Ok(Self::Regression),
            "PRE_RELEASE" => Ok(Self::PreRelease),
            _ => Err(format!("Invalid upload stage: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseUpload {
    pub id: Uuid,
    pub release_id: Uuid,
    pub stage: UploadStage,
    pub platform: Platform,
    pub artifact_path: String,
    pub used: bool,
    pub used_by_task_id: Option<Uuid>,
    pub used_in_cycle_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ReleaseUpload {
    pub fn new(
        release_id: Uuid,
        stage: UploadStage,
        platform: Platform,
        artifact_path: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            release_id,
            stage,
            platform,
            artifact_path: artifact_path.into(),
            used: false,
            used_by_task_id: None,
            used_in_cycle_id: None,
            created_at: Utc::now(),
        }
    }
}
