//! # Orchestration Engine
//!
//! Drives releases forward on every externally triggered tick.
//!
//! ## Core Components
//!
//! - **TickScheduler**: batch entry point; locks, ticks and unlocks each schedulable release
//! - **LockManager**: per-release advisory lock with staleness reclaim
//! - **TaskExecutor**: advances the current stage's tasks through collaborators
//! - **ManualBuildGate**: completes build tasks from manually uploaded artifacts
//! - **Collaborators**: external systems behind [`TaskCollaborator`], with bounded retries
//! - **Pollers**: lifecycle of the per-release workflow pollers
//!
//! The per-release rules themselves live in
//! [`ReleaseStateMachine`](crate::state_machine::ReleaseStateMachine).
//!
//! ## Wiring
//!
//! There are no global singletons. [`OrchestratorContext`] builds every component
//! from a store, a collaborator registry, a poller scheduler and the configuration:
//!
//! ```rust
//! use std::sync::Arc;
//! use release_core::config::OrchestratorConfig;
//! use release_core::orchestration::{CollaboratorRegistry, InMemoryPollerScheduler, OrchestratorContext};
//! use release_core::repository::InMemoryReleaseStore;
//!
//! # async fn example() {
//! let context = OrchestratorContext::new(
//!     Arc::new(InMemoryReleaseStore::new()),
//!     Arc::new(CollaboratorRegistry::new()),
//!     Arc::new(InMemoryPollerScheduler::new()),
//!     OrchestratorConfig::default(),
//! );
//! let summary = context.tick_scheduler().run_tick().await;
//! assert!(summary.success);
//! # }
//! ```

pub mod collaborators;
pub mod lock_manager;
pub mod manual_build_gate;
pub mod pollers;
pub mod task_executor;
pub mod task_factory;
pub mod tick_scheduler;

use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::repository::ReleaseStore;
use crate::state_machine::ReleaseStateMachine;

pub use collaborators::{
    CollaboratorInvoker, CollaboratorRegistry, CollaboratorRole, NoopCollaborator,
    TaskCollaborator, TaskContext, TaskOutcome,
};
pub use lock_manager::LockManager;
pub use manual_build_gate::{GateDecision, GateResult, ManualBuildGate};
pub use pollers::{
    InMemoryPollerScheduler, PgPollerScheduler, PollerKind, WorkflowPoller, WorkflowPollerScheduler,
};
pub use task_executor::{StageFailure, StageProgress, TaskExecutor};
pub use tick_scheduler::{TickScheduler, TickSummary};

/// Every orchestration component, built once from explicit dependencies
#[derive(Clone)]
pub struct OrchestratorContext {
    config: OrchestratorConfig,
    store: Arc<dyn ReleaseStore>,
    lock_manager: LockManager,
    gate: ManualBuildGate,
    state_machine: Arc<ReleaseStateMachine>,
    tick_scheduler: TickScheduler,
}

impl std::fmt::Debug for OrchestratorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorContext")
            .field("environment", &self.config.environment)
            .field("instance_id", &self.config.scheduler.instance_id)
            .finish_non_exhaustive()
    }
}

impl OrchestratorContext {
    pub fn new(
        store: Arc<dyn ReleaseStore>,
        collaborators: Arc<CollaboratorRegistry>,
        pollers: Arc<dyn WorkflowPollerScheduler>,
        config: OrchestratorConfig,
    ) -> Self {
        let invoker = CollaboratorInvoker::from_config(&config.executor);
        let executor = TaskExecutor::new(Arc::clone(&store), collaborators, invoker)
            .with_tick_budget(config.tick_dispatch_budget());
        let state_machine = Arc::new(ReleaseStateMachine::new(
            Arc::clone(&store),
            executor,
            pollers,
            &config,
        ));
        let tick_scheduler =
            TickScheduler::new(Arc::clone(&store), Arc::clone(&state_machine), &config);

        Self {
            lock_manager: LockManager::new(Arc::clone(&store)),
            gate: ManualBuildGate::new(Arc::clone(&store)).with_lock_owner(
                config.scheduler.instance_id.clone(),
                config.lock.timeout_seconds,
            ),
            store,
            state_machine,
            tick_scheduler,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ReleaseStore> {
        &self.store
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn manual_build_gate(&self) -> &ManualBuildGate {
        &self.gate
    }

    pub fn state_machine(&self) -> &Arc<ReleaseStateMachine> {
        &self.state_machine
    }

    pub fn tick_scheduler(&self) -> &TickScheduler {
        &self.tick_scheduler
    }
}
