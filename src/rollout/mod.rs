//! # Store Rollout Control
//!
//! Rollout, pause, resume and emergency halt for a single store submission,
//! invoked on demand rather than from the tick loop.
//!
//! ## Platform rules
//!
//! | | Android | iOS phased | iOS not phased |
//! |---|---|---|---|
//! | `update_rollout(pct)` | LIVE, below 100, any pct in [0, 100] | exactly 100 | illegal |
//! | `pause` | LIVE → HALTED | LIVE → PAUSED | illegal |
//! | `resume` | HALTED (no severity) → LIVE | PAUSED → LIVE | illegal |
//! | `halt(severity, reason)` | one-way | one-way | one-way |
//!
//! An emergency halt records a severity and reason; afterwards every action is
//! rejected and only a new submission can ship.

pub mod controller;
pub mod errors;
pub mod rules;

pub use controller::RolloutController;
pub use errors::{RolloutError, RolloutResult};
pub use rules::{can_increase_rollout, RolloutAction};
