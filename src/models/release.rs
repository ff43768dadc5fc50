//! # Release Model
//!
//! The release a cron job orchestrates. Only the fields the engine needs are
//! modelled; tenant setup, integrations and team membership live elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::platform::Platform;
use super::regression_slot::{validate_regression_slots, RegressionSlot};
use crate::error::{OrchestrationError, Result};
use crate::version::{ReleaseType, SemanticVersion};

/// How builds for a release are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributionMode {
    /// Build tasks trigger a CI system
    #[default]
    CiBuild,
    /// Build tasks wait for someone to upload the artifacts
    ManualUpload,
}

impl std::fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CiBuild => write!(f, "CI_BUILD"),
            Self::ManualUpload => write!(f, "MANUAL_UPLOAD"),
        }
    }
}

impl std::str::FromStr for DistributionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "CI_BUILD" => Ok(Self::CiBuild),
            "MANUAL_UPLOAD" => Ok(Self::ManualUpload),
            _ => Err(format!("Invalid distribution mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub version: String,
    pub release_type: ReleaseType,
    pub platforms: Vec<Platform>,
    pub distribution_mode: DistributionMode,
    pub kickoff_at: DateTime<Utc>,
    pub target_release_at: DateTime<Utc>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Release {
    pub fn is_manual_upload(&self) -> bool {
        self.distribution_mode == DistributionMode::ManualUpload
    }

    pub fn is_kickoff_due(&self, now: DateTime<Utc>) -> bool {
        self.kickoff_at <= now
    }

    /// Reject releases the engine cannot orchestrate.
    pub fn validate(&self) -> Result<()> {
        if self.platforms.is_empty() {
            return Err(OrchestrationError::validation(format!(
                "release {} has no platforms",
                self.id
            )));
        }
        self.version.parse::<SemanticVersion>()?;
        if self.target_release_at < self.kickoff_at {
            return Err(OrchestrationError::validation(format!(
                "release {} targets {} before its kickoff at {}",
                self.id, self.target_release_at, self.kickoff_at
            )));
        }
        Ok(())
    }

    /// Whole days from the kickoff day to the target day, and the target time as "HH:mm"
    pub fn target_offset_from_kickoff(&self) -> (u32, String) {
        let days = (self.target_release_at.date_naive() - self.kickoff_at.date_naive()).num_days();
        let offset = u32::try_from(days.max(0)).unwrap_or(u32::MAX);
        (offset, self.target_release_at.format("%H:%M").to_string())
    }

    /// Validate the release itself and the regression slots scheduled for it
    pub fn validate_with_regressions(&self, slots: &[RegressionSlot]) -> Result<()> {
        self.validate()?;
        let (target_offset, target_time) = self.target_offset_from_kickoff();
        validate_regression_slots(slots, target_offset, &target_time)
    }
}
