//! Cron job transition table.
//!
//! Pure: applies one [`ReleaseEvent`] to a [`CronJob`] in memory and reports
//! what changed. Persisting the result, creating tasks and managing pollers is
//! the caller's job.

use super::errors::{invalid_transition, invariant_violated, StateMachineResult};
use super::events::ReleaseEvent;
use super::states::{CronStatus, PauseType, Stage, StageStatus};
use crate::models::CronJob;

/// What applying an event did to the cron job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    /// A stage moved to IN_PROGRESS; its tasks must be created
    StageStarted(Stage),
    /// A stage completed and the next one waits on an operator trigger
    AwaitingTrigger(Stage),
    Paused(PauseType),
    Resumed,
    /// Terminal; pollers must be deleted
    Completed { archived: bool },
}

/// Apply `event` to `job`, returning the effect or an invalid-transition error.
///
/// On error `job` is left untouched.
pub fn apply(job: &mut CronJob, event: &ReleaseEvent) -> StateMachineResult<TransitionEffect> {
    let effect = match (job.cron_status, job.pause_type, event) {
        (CronStatus::Pending, _, ReleaseEvent::Start) => {
            job.resume();
            job.begin_stage(Stage::Kickoff);
            TransitionEffect::StageStarted(Stage::Kickoff)
        }

        (CronStatus::Running, _, ReleaseEvent::StageCompleted(stage))
            if job.current_stage() == Some(*stage) =>
        {
            complete_stage(job, *stage)?
        }

        (CronStatus::Running, _, ReleaseEvent::TaskFailed { .. }) => {
            job.pause(PauseType::TaskFailure)?;
            TransitionEffect::Paused(PauseType::TaskFailure)
        }

        (CronStatus::Running, _, ReleaseEvent::PauseRequested) => {
            job.pause(PauseType::UserRequested)?;
            TransitionEffect::Paused(PauseType::UserRequested)
        }

        (CronStatus::Paused, PauseType::UserRequested, ReleaseEvent::ResumeRequested)
        | (CronStatus::Paused, PauseType::TaskFailure, ReleaseEvent::RetryRequested) => {
            job.resume();
            TransitionEffect::Resumed
        }

        (CronStatus::Paused, PauseType::AwaitingStageTrigger, ReleaseEvent::StageTriggered) => {
            let next = job.next_pending_stage().ok_or_else(|| {
                invariant_violated(format!(
                    "release {} awaits a stage trigger with no pending stage",
                    job.release_id
                ))
            })?;
            job.resume();
            job.begin_stage(next);
            TransitionEffect::StageStarted(next)
        }

        (status, _, ReleaseEvent::Archived) if !status.is_terminal() => {
            job.complete(true)?;
            TransitionEffect::Completed { archived: true }
        }

        (status, pause_type, event) => {
            let from = if status == CronStatus::Paused {
                format!("{status}/{pause_type}")
            } else {
                status.to_string()
            };
            return Err(invalid_transition(from, event.event_type()));
        }
    };

    Ok(effect)
}

fn complete_stage(job: &mut CronJob, stage: Stage) -> StateMachineResult<TransitionEffect> {
    job.set_stage_status(stage, StageStatus::Completed);
    match stage.next() {
        None => {
            job.complete(false)?;
            Ok(TransitionEffect::Completed { archived: false })
        }
        Some(next) if job.requires_trigger_for(next) => {
            job.pause(PauseType::AwaitingStageTrigger)?;
            Ok(TransitionEffect::AwaitingTrigger(next))
        }
        Some(next) => {
            job.begin_stage(next);
            Ok(TransitionEffect::StageStarted(next))
        }
    }
}
