//! # Release Orchestration Models
//!
//! Logical entities the engine reads and mutates. Every payload that used to be
//! an opaque JSON blob (cron config, stage data) is a closed type here and is
//! only serialized to JSONB at the storage boundary.
//!
//! - [`Release`] - the release being orchestrated (platforms, distribution mode, schedule)
//! - [`CronJob`] - one per release; stage statuses, cron status, pause reason, lock fields
//! - [`ReleaseTask`] - a unit of stage work driven by the task executor
//! - [`ReleaseUpload`] - a manually uploaded build waiting to be consumed by a task
//! - [`RegressionSlot`] - a scheduled regression cycle
//! - [`Submission`] - a store submission managed by the rollout controller

pub mod cron_job;
pub mod platform;
pub mod regression_slot;
pub mod release;
pub mod release_task;
pub mod release_upload;
pub mod submission;

pub use cron_job::{CronConfig, CronJob, StageData};
pub use platform::Platform;
pub use regression_slot::{validate_regression_slots, RegressionSlot, RegressionSlotConfig};
pub use release::{DistributionMode, Release};
pub use release_task::{ReleaseTask, TaskType};
pub use release_upload::{ReleaseUpload, UploadStage};
pub use submission::{HaltSeverity, Submission, SubmissionStatus};
