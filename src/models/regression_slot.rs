//! # Regression Slot
//!
//! A scheduled regression cycle, expressed relative to the release kickoff:
//! `offset_from_kickoff` whole days after kickoff, at `time` ("HH:mm", UTC).

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestrationError, Result};

const TIME_FORMAT: &str = "%H:%M";

/// Which work a regression cycle performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionSlotConfig {
    pub regression_builds: bool,
    pub post_release_notes: bool,
    pub automation_builds: bool,
    pub automation_runs: bool,
}

impl Default for RegressionSlotConfig {
    fn default() -> Self {
        Self {
            regression_builds: true,
            post_release_notes: true,
            automation_builds: false,
            automation_runs: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionSlot {
    pub offset_from_kickoff: u32,
    pub time: String,
    #[serde(default)]
    pub config: RegressionSlotConfig,
}

impl RegressionSlot {
    pub fn parsed_time(&self) -> Result<NaiveTime> {
        parse_slot_time(&self.time)
    }

    /// Absolute time the slot fires for a release kicked off at `kickoff_at`.
    pub fn due_at(&self, kickoff_at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let day = kickoff_at.date_naive() + Duration::days(i64::from(self.offset_from_kickoff));
        Ok(day.and_time(self.parsed_time()?).and_utc())
    }

    pub fn is_due(&self, kickoff_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.due_at(kickoff_at)? <= now)
    }
}

fn parse_slot_time(time: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(time, TIME_FORMAT).map_err(|e| {
        OrchestrationError::validation(format!("invalid slot time '{time}', expected HH:mm: {e}"))
    })
}

/// Validate slots against the release target, relative to kickoff.
///
/// Every slot must fall on or before the target day; a slot on the target day
/// must not be later than the target time. Slots must also be in firing order.
pub fn validate_regression_slots(
    slots: &[RegressionSlot],
    target_release_offset_from_kickoff: u32,
    target_release_time: &str,
) -> Result<()> {
    let target_time = parse_slot_time(target_release_time)?;
    let mut previous: Option<(u32, NaiveTime)> = None;

    for (index, slot) in slots.iter().enumerate() {
        let slot_time = slot.parsed_time()?;

        if slot.offset_from_kickoff > target_release_offset_from_kickoff {
            return Err(OrchestrationError::validation(format!(
                "regression slot {index} is {} days after kickoff, past the target release offset of {target_release_offset_from_kickoff}",
                slot.offset_from_kickoff
            )));
        }
        if slot.offset_from_kickoff == target_release_offset_from_kickoff && slot_time > target_time
        {
            return Err(OrchestrationError::validation(format!(
                "regression slot {index} at {} is after the target release time {target_release_time}",
                slot.time
            )));
        }

        let key = (slot.offset_from_kickoff, slot_time);
        if previous.is_some_and(|prev| key < prev) {
            return Err(OrchestrationError::validation(format!(
                "regression slot {index} is scheduled before the slot preceding it"
            )));
        }
        previous = Some(key);
    }

    Ok(())
}
