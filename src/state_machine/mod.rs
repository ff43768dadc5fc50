// State machine module for release orchestration
//
// Stage, cron and task states; the events that move a cron job between them;
// and the per-release state machine that applies them on every tick.

pub mod errors;
pub mod events;
pub mod release_state_machine;
pub mod states;
pub mod transitions;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::ReleaseEvent;
pub use release_state_machine::{ReleaseStateMachine, TickOutcome};
pub use states::{CronStatus, PauseType, Stage, StageStatus, TaskStatus};
