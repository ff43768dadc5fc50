//! # Submission Model
//!
//! A store submission for one platform of a release. Created when the release is
//! first promoted to the stores and afterwards only mutated by the rollout
//! controller. `version` is an optimistic concurrency counter bumped on every
//! write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Submitted,
    InReview,
    Approved,
    Live,
    /// iOS phased release paused
    Paused,
    /// Android rollout halted; resumable unless it was an emergency halt
    Halted,
    Rejected,
    Cancelled,
}

impl SubmissionStatus {
    /// Whether the status exists on the platform's store.
    pub fn is_legal_for(&self, platform: Platform) -> bool {
        !matches!((self, platform), (Self::Paused, Platform::Android))
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::InReview => write!(f, "IN_REVIEW"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Live => write!(f, "LIVE"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Halted => write!(f, "HALTED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(Self::Submitted),
            "IN_REVIEW" => Ok(Self::InReview),
            "APPROVED" => Ok(Self::Approved),
            "LIVE" => Ok(Self::Live),
            "PAUSED" => Ok(Self::Paused),
            "HALTED" => Ok(Self::Halted),
            "REJECTED" => Ok(Self::Rejected),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid submission status: {s}")),
        }
    }
}

/// Severity recorded with an emergency halt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HaltSeverity {
    Critical,
    High,
    Medium,
}

impl fmt::Display for HaltSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
        }
    }
}

impl std::str::FromStr for HaltSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRITICAL" => Ok(Self::Critical),
            "HIGH" => Ok(Self::High),
            "MEDIUM" => Ok(Self::Medium),
            _ => Err(format!("Invalid halt severity: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub release_id: Uuid,
    pub platform: Platform,
    pub status: SubmissionStatus,
    pub rollout_percentage: f64,
    /// iOS only; Android submissions always carry `false`
    pub phased_release: bool,
    pub pause_reason: Option<String>,
    pub halt_severity: Option<HaltSeverity>,
    pub halt_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(release_id: Uuid, platform: Platform, phased_release: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            release_id,
            platform,
            status: SubmissionStatus::Submitted,
            rollout_percentage: 0.0,
            phased_release: platform == Platform::Ios && phased_release,
            pause_reason: None,
            halt_severity: None,
            halt_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Emergency halts carry a severity; plain Android pauses do not.
    pub fn is_emergency_halted(&self) -> bool {
        self.status == SubmissionStatus::Halted && self.halt_severity.is_some()
    }

    /// Every user of the platform can get the release.
    pub fn is_fully_live(&self) -> bool {
        if self.status != SubmissionStatus::Live {
            return false;
        }
        match self.platform {
            Platform::Ios if !self.phased_release => true,
            _ => self.rollout_percentage >= 100.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.is_fully_live()
            || self.is_emergency_halted()
            || matches!(
                self.status,
                SubmissionStatus::Rejected | SubmissionStatus::Cancelled
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phased_release_only_on_ios() {
        let android = Submission::new(Uuid::new_v4(), Platform::Android, true);
        assert!(!android.phased_release);
        let ios = Submission::new(Uuid::new_v4(), Platform::Ios, true);
        assert!(ios.phased_release);
    }

    #[test]
    fn test_fully_live_and_terminal() {
        let mut android = Submission::new(Uuid::new_v4(), Platform::Android, false);
        android.status = SubmissionStatus::Live;
        android.rollout_percentage = 20.5;
        assert!(!android.is_fully_live());
        assert!(!android.is_terminal());

        android.rollout_percentage = 100.0;
        assert!(android.is_fully_live());
        assert!(android.is_terminal());

        let mut ios = Submission::new(Uuid::new_v4(), Platform::Ios, false);
        ios.status = SubmissionStatus::Live;
        assert!(ios.is_fully_live());
    }

    #[test]
    fn test_emergency_halt_is_terminal_but_pause_is_not() {
        let mut android = Submission::new(Uuid::new_v4(), Platform::Android, false);
        android.status = SubmissionStatus::Halted;
        assert!(!android.is_terminal());

        android.halt_severity = Some(HaltSeverity::High);
        assert!(android.is_emergency_halted());
        assert!(android.is_terminal());
    }

    #[test]
    fn test_status_legality() {
        assert!(!SubmissionStatus::Paused.is_legal_for(Platform::Android));
        assert!(SubmissionStatus::Paused.is_legal_for(Platform::Ios));
        assert!(SubmissionStatus::Halted.is_legal_for(Platform::Android));
    }
}
