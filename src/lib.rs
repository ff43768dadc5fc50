#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Release Core
//!
//! Orchestration engine for staged mobile app releases.
//!
//! ## Overview
//!
//! A release moves through four stages (Kickoff, Regression, Pre-Release,
//! Distribution) on Android and iOS. Each release has a cron job that an external
//! trigger ticks periodically; every tick takes a per-release lock, advances the
//! current stage's tasks through external collaborators, and commits the result
//! atomically. Horizontally scaled instances never advance the same release at once.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Tick scheduler, lock manager, task executor, manual build gate
//! - [`state_machine`] - Stage, cron and task states and the per-release state machine
//! - [`rollout`] - Store submission rollout, pause, resume and emergency halt
//! - [`version`] - Semantic version parsing, bumping and scheduled version resolution
//! - [`models`] - Releases, cron jobs, tasks, uploads, submissions
//! - [`repository`] - Store traits with in-memory and PostgreSQL implementations
//! - [`config`] - Layered configuration
//! - [`database`] - PostgreSQL connection and migrations
//! - [`logging`] - Structured logging
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use release_core::config::ConfigManager;
//! use release_core::database::DatabaseConnection;
//! use release_core::orchestration::{CollaboratorRegistry, InMemoryPollerScheduler, OrchestratorContext};
//! use release_core::repository::PgReleaseStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let connection = DatabaseConnection::connect(manager.config()).await?;
//!
//! let context = OrchestratorContext::new(
//!     Arc::new(PgReleaseStore::new(connection.pool().clone())),
//!     Arc::new(CollaboratorRegistry::new()),
//!     Arc::new(InMemoryPollerScheduler::new()),
//!     manager.config().clone(),
//! );
//! let summary = context.tick_scheduler().run_tick().await;
//! println!("{}", serde_json::to_string(&summary)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests (in-memory store)
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod repository;
pub mod rollout;
pub mod state_machine;
pub mod version;

pub use config::{ConfigManager, OrchestratorConfig};
pub use error::{OrchestrationError, Result};
pub use models::{CronJob, Release, ReleaseTask, ReleaseUpload, Submission};
pub use orchestration::{OrchestratorContext, TickScheduler, TickSummary};
pub use repository::{InMemoryReleaseStore, PgReleaseStore, ReleaseStore, SubmissionStore};
pub use rollout::RolloutController;
pub use state_machine::{CronStatus, PauseType, ReleaseStateMachine, Stage, TaskStatus};
pub use version::{ReleaseType, SemanticVersion};
