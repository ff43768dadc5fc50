//! # Task Collaborators
//!
//! External systems that perform task work: CI, source control, project and test
//! management, chat notifications. The engine only knows them through
//! [`TaskCollaborator`]; concrete clients are registered per [`CollaboratorRole`]
//! in a [`CollaboratorRegistry`].
//!
//! [`CollaboratorInvoker`] wraps every call with the configured timeout and
//! retries transient failures with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{BackoffConfig, CollaboratorConfig, ExecutorConfig};
use crate::error::{OrchestrationError, Result};
use crate::models::{Platform, RegressionSlotConfig, TaskType};
use crate::state_machine::states::Stage;

/// Which kind of external system handles a task type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorRole {
    Notifications,
    SourceControl,
    ProjectManagement,
    TestManagement,
    Ci,
}

impl CollaboratorRole {
    pub fn for_task(task_type: TaskType) -> Self {
        match task_type {
            TaskType::PreKickOffReminder
            | TaskType::SendRegressionBuildMessage
            | TaskType::SendPreReleaseMessage => Self::Notifications,
            TaskType::ForkBranch
            | TaskType::CreateRcTag
            | TaskType::CreateReleaseNotes
            | TaskType::CreateReleaseTag
            | TaskType::CreateFinalReleaseNotes => Self::SourceControl,
            TaskType::CreateProjectManagementTicket => Self::ProjectManagement,
            TaskType::CreateTestSuite | TaskType::ResetTestSuite => Self::TestManagement,
            TaskType::TriggerPreRegressionBuilds
            | TaskType::TriggerRegressionBuilds
            | TaskType::TriggerAutomationRuns
            | TaskType::AutomationRuns
            | TaskType::TriggerTestFlightBuild
            | TaskType::CreateAabBuild => Self::Ci,
        }
    }

    pub fn for_provider(config: &CollaboratorConfig) -> Option<Self> {
        match config {
            CollaboratorConfig::Slack { .. } => Some(Self::Notifications),
            CollaboratorConfig::Github { .. } => Some(Self::SourceControl),
            CollaboratorConfig::Jira { .. } => Some(Self::ProjectManagement),
            CollaboratorConfig::TestRail { .. } => Some(Self::TestManagement),
            CollaboratorConfig::Jenkins { .. } => Some(Self::Ci),
            CollaboratorConfig::Noop => None,
        }
    }
}

/// Everything a collaborator needs to perform one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub release_id: Uuid,
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub stage: Stage,
    pub cycle_id: Option<Uuid>,
    pub version: String,
    pub platforms: Vec<Platform>,
    /// Set for regression cycle tasks
    pub slot_config: Option<RegressionSlotConfig>,
}

/// Result of dispatching or polling a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    /// Business-level failure; pauses the release until an operator retries
    Failed { reason: String },
    /// Work started asynchronously; poll later
    Accepted { external_ref: Option<String> },
    /// Polled work has not finished yet
    Running,
}

#[async_trait]
pub trait TaskCollaborator: Send + Sync {
    fn name(&self) -> &str;

    /// Start the work for a PENDING task
    async fn dispatch(&self, context: &TaskContext) -> Result<TaskOutcome>;

    /// Check on work previously accepted
    async fn poll(&self, context: &TaskContext, external_ref: Option<&str>) -> Result<TaskOutcome>;
}

/// Completes every task immediately. Used for roles with no configured provider.
#[derive(Debug, Clone)]
pub struct NoopCollaborator {
    name: String,
}

impl NoopCollaborator {
    pub fn new() -> Self {
        Self::named("noop")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for NoopCollaborator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskCollaborator for NoopCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dispatch(&self, context: &TaskContext) -> Result<TaskOutcome> {
        debug!(
            collaborator = %self.name,
            task_id = %context.task_id,
            task_type = %context.task_type,
            "No-op collaborator completing task"
        );
        Ok(TaskOutcome::Completed)
    }

    async fn poll(&self, _context: &TaskContext, _external_ref: Option<&str>) -> Result<TaskOutcome> {
        Ok(TaskOutcome::Completed)
    }
}

/// Collaborators by role, falling back to a [`NoopCollaborator`]
pub struct CollaboratorRegistry {
    collaborators: DashMap<CollaboratorRole, Arc<dyn TaskCollaborator>>,
    fallback: Arc<dyn TaskCollaborator>,
}

impl std::fmt::Debug for CollaboratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let roles: Vec<CollaboratorRole> =
            self.collaborators.iter().map(|entry| *entry.key()).collect();
        f.debug_struct("CollaboratorRegistry")
            .field("roles", &roles)
            .finish()
    }
}

impl Default for CollaboratorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CollaboratorRegistry {
    pub fn new() -> Self {
        Self {
            collaborators: DashMap::new(),
            fallback: Arc::new(NoopCollaborator::new()),
        }
    }

    pub fn register(&self, role: CollaboratorRole, collaborator: Arc<dyn TaskCollaborator>) {
        debug!(role = ?role, collaborator = collaborator.name(), "Registered collaborator");
        self.collaborators.insert(role, collaborator);
    }

    pub fn for_task(&self, task_type: TaskType) -> Arc<dyn TaskCollaborator> {
        self.collaborators
            .get(&CollaboratorRole::for_task(task_type))
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    pub fn is_registered(&self, role: CollaboratorRole) -> bool {
        self.collaborators.contains_key(&role)
    }
}

/// Bounded, retried collaborator calls
#[derive(Debug, Clone)]
pub struct CollaboratorInvoker {
    timeout: Duration,
    backoff: BackoffConfig,
}

impl CollaboratorInvoker {
    pub fn new(timeout: Duration, backoff: BackoffConfig) -> Self {
        Self { timeout, backoff }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(config.collaborator_timeout(), config.backoff.clone())
    }

    pub async fn dispatch(
        &self,
        collaborator: &dyn TaskCollaborator,
        context: &TaskContext,
    ) -> Result<TaskOutcome> {
        self.call_with_retry(collaborator.name(), "dispatch", move || {
            collaborator.dispatch(context)
        })
        .await
    }

    pub async fn poll(
        &self,
        collaborator: &dyn TaskCollaborator,
        context: &TaskContext,
        external_ref: Option<&str>,
    ) -> Result<TaskOutcome> {
        self.call_with_retry(collaborator.name(), "poll", move || {
            collaborator.poll(context, external_ref)
        })
        .await
    }

    /// Retries timeouts and transient integration errors; everything else returns at once
    async fn call_with_retry<F, Fut>(
        &self,
        collaborator: &str,
        operation: &str,
        mut call: F,
    ) -> Result<TaskOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<TaskOutcome>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(OrchestrationError::Timeout {
                    operation: format!("{collaborator} {operation}"),
                    timeout: self.timeout,
                }),
            };

            match result {
                Err(err) if is_transient(&err) && attempt < self.backoff.max_retries => {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!(
                        collaborator = %collaborator,
                        operation = %operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient collaborator failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Failures worth retrying inside the same tick
pub fn is_transient(err: &OrchestrationError) -> bool {
    matches!(
        err,
        OrchestrationError::TransientIntegration { .. } | OrchestrationError::Timeout { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FlakyCollaborator {
        failures_left: Mutex<u32>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl TaskCollaborator for FlakyCollaborator {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn dispatch(&self, _context: &TaskContext) -> Result<TaskOutcome> {
            *self.calls.lock() += 1;
            let mut failures = self.failures_left.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(OrchestrationError::TransientIntegration {
                    collaborator: "flaky".to_string(),
                    reason: "503".to_string(),
                });
            }
            Ok(TaskOutcome::Accepted {
                external_ref: Some("build-42".to_string()),
            })
        }

        async fn poll(&self, _context: &TaskContext, _external_ref: Option<&str>) -> Result<TaskOutcome> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(TaskOutcome::Completed)
        }
    }

    fn context() -> TaskContext {
        TaskContext {
            release_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            task_type: TaskType::TriggerRegressionBuilds,
            stage: Stage::Regression,
            cycle_id: Some(Uuid::new_v4()),
            version: "1.2.0".to_string(),
            platforms: vec![Platform::Android],
            slot_config: None,
        }
    }

    fn fast_backoff(max_retries: u32) -> BackoffConfig {
        BackoffConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_every_task_type_has_a_role() {
        assert_eq!(
            CollaboratorRole::for_task(TaskType::CreateAabBuild),
            CollaboratorRole::Ci
        );
        assert_eq!(
            CollaboratorRole::for_task(TaskType::SendPreReleaseMessage),
            CollaboratorRole::Notifications
        );
        assert_eq!(
            CollaboratorRole::for_provider(&CollaboratorConfig::Noop),
            None
        );
    }

    #[tokio::test]
    async fn test_registry_falls_back_to_noop() {
        let registry = CollaboratorRegistry::new();
        assert_eq!(registry.for_task(TaskType::ForkBranch).name(), "noop");

        registry.register(
            CollaboratorRole::SourceControl,
            Arc::new(NoopCollaborator::named("github")),
        );
        assert!(registry.is_registered(CollaboratorRole::SourceControl));
        assert_eq!(registry.for_task(TaskType::ForkBranch).name(), "github");
        assert_eq!(registry.for_task(TaskType::CreateTestSuite).name(), "noop");
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let collaborator = FlakyCollaborator {
            failures_left: Mutex::new(2),
            calls: Mutex::new(0),
        };
        let invoker = CollaboratorInvoker::new(Duration::from_secs(1), fast_backoff(3));

        let outcome = invoker.dispatch(&collaborator, &context()).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Accepted { .. }));
        assert_eq!(*collaborator.calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let collaborator = FlakyCollaborator {
            failures_left: Mutex::new(10),
            calls: Mutex::new(0),
        };
        let invoker = CollaboratorInvoker::new(Duration::from_secs(1), fast_backoff(2));

        let err = invoker.dispatch(&collaborator, &context()).await.unwrap_err();
        assert!(is_transient(&err));
        assert_eq!(*collaborator.calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_calls_are_bounded_by_timeout() {
        let collaborator = FlakyCollaborator {
            failures_left: Mutex::new(0),
            calls: Mutex::new(0),
        };
        let invoker = CollaboratorInvoker::new(Duration::from_millis(10), fast_backoff(0));

        let err = invoker
            .poll(&collaborator, &context(), Some("build-42"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Timeout { .. }));
    }
}
