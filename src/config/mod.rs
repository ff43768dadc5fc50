//! # Release Orchestrator Configuration
//!
//! Layered configuration for the orchestration engine, loaded by [`ConfigManager`]
//! with the `config` crate:
//!
//! 1. Built-in defaults ([`OrchestratorConfig::default`])
//! 2. `config/release-orchestrator.toml`
//! 3. `config/release-orchestrator.{environment}.toml`
//! 4. `RELEASE_ORCHESTRATOR__*` environment variables (`__` separates sections)
//!
//! Every layer is optional; the merged result is validated before it is handed out.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use release_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let lock_timeout = manager.config().lock.timeout_seconds;
//! let database_url = manager.config().database_url();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// development, test or production
    pub environment: String,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub lock: LockConfig,
    pub executor: ExecutorConfig,
    pub pollers: PollerConfig,
    /// One entry per external provider the engine talks to
    pub collaborators: Vec<CollaboratorConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            lock: LockConfig::default(),
            executor: ExecutorConfig::default(),
            pollers: PollerConfig::default(),
            collaborators: Vec::new(),
        }
    }
}

/// Database connection and pooling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the individual components
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub pool: u32,
    pub connect_timeout_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "release_orchestrator".to_string(),
            pool: 10,
            connect_timeout_seconds: 10,
            run_migrations: false,
        }
    }
}

impl DatabaseConfig {
    /// Connection URL for this database, honoring `DATABASE_URL` if the url is `${DATABASE_URL}`
    pub fn database_url(&self, environment: &str) -> String {
        if let Some(url) = &self.url {
            if url == "${DATABASE_URL}" {
                if let Ok(env_url) = std::env::var("DATABASE_URL") {
                    return env_url;
                }
            } else if !url.is_empty() {
                return url.clone();
            }
        }

        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username,
            self.password,
            self.host,
            self.port,
            self.database_name(environment)
        )
    }

    /// Test databases get a `_test` suffix so they never collide with development data
    pub fn database_name(&self, environment: &str) -> String {
        if environment == "test" && !self.database.ends_with("_test") {
            format!("{}_test", self.database)
        } else {
            self.database.clone()
        }
    }
}

/// Tick batch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Lock owner id written into `locked_by` by this instance
    pub instance_id: String,
    pub max_concurrent_releases: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_id: format!("release-orchestrator-{}", std::process::id()),
            max_concurrent_releases: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockConfig {
    pub timeout_seconds: i64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: crate::models::cron_job::DEFAULT_LOCK_TIMEOUT_SECONDS,
        }
    }
}

/// Task executor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on every collaborator call; must stay below the lock timeout
    pub collaborator_timeout_seconds: u64,
    pub backoff: BackoffConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout_seconds: 30,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_seconds)
    }

    /// Longest one collaborator call can take: every attempt timing out plus every backoff sleep
    pub fn worst_case_call(&self) -> Duration {
        self.collaborator_timeout()
            .saturating_mul(self.backoff.max_retries.saturating_add(1))
            .saturating_add(self.backoff.total_delay())
    }
}

/// Exponential backoff for transient collaborator failures
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (0-based), capped at `max_delay_ms`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let delay_ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Sum of every retry delay for one call
    pub fn total_delay(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| self.delay_for_attempt(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Workflow poller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_minutes: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
        }
    }
}

/// Per-provider collaborator configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum CollaboratorConfig {
    Slack { webhook_url: String, channel: String },
    Jira { base_url: String, project_key: String },
    Github { owner: String, repository: String },
    Jenkins { base_url: String, job_name: String },
    TestRail { base_url: String, project_id: String },
    Noop,
}

impl CollaboratorConfig {
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Slack { .. } => "slack",
            Self::Jira { .. } => "jira",
            Self::Github { .. } => "github",
            Self::Jenkins { .. } => "jenkins",
            Self::TestRail { .. } => "test_rail",
            Self::Noop => "noop",
        }
    }

    fn required_fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::Slack {
                webhook_url,
                channel,
            } => vec![("webhook_url", webhook_url.as_str()), ("channel", channel.as_str())],
            Self::Jira {
                base_url,
                project_key,
            } => vec![("base_url", base_url.as_str()), ("project_key", project_key.as_str())],
            Self::Github { owner, repository } => {
                vec![("owner", owner.as_str()), ("repository", repository.as_str())]
            }
            Self::Jenkins { base_url, job_name } => {
                vec![("base_url", base_url.as_str()), ("job_name", job_name.as_str())]
            }
            Self::TestRail {
                base_url,
                project_id,
            } => vec![("base_url", base_url.as_str()), ("project_id", project_id.as_str())],
            Self::Noop => Vec::new(),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (field, value) in self.required_fields() {
            if value.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    format!("collaborators.{}.{field}", self.provider()),
                    "collaborator configuration",
                ));
            }
        }
        Ok(())
    }
}

impl OrchestratorConfig {
    /// Validate the merged configuration
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.environment.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "environment",
                "root configuration",
            ));
        }

        if self.database.pool == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.pool",
                "0",
                "pool size must be greater than 0",
            ));
        }

        if self.scheduler.instance_id.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "scheduler.instance_id",
                "scheduler configuration",
            ));
        }

        if self.scheduler.max_concurrent_releases == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.max_concurrent_releases",
                "0",
                "at least one release must be processed at a time",
            ));
        }

        if self.lock.timeout_seconds <= 0 {
            return Err(ConfigurationError::invalid_value(
                "lock.timeout_seconds",
                self.lock.timeout_seconds.to_string(),
                "lock timeout must be greater than 0",
            ));
        }

        if self.executor.collaborator_timeout_seconds as i64 >= self.lock.timeout_seconds {
            return Err(ConfigurationError::invalid_value(
                "executor.collaborator_timeout_seconds",
                self.executor.collaborator_timeout_seconds.to_string(),
                format!(
                    "must be shorter than lock.timeout_seconds ({})",
                    self.lock.timeout_seconds
                ),
            ));
        }

        let worst_case_call = self.executor.worst_case_call();
        if worst_case_call >= self.lock_timeout() {
            return Err(ConfigurationError::invalid_value(
                "executor.backoff.max_retries",
                self.executor.backoff.max_retries.to_string(),
                format!(
                    "one collaborator call may take {:.1}s with retries, must be shorter than lock.timeout_seconds ({})",
                    worst_case_call.as_secs_f64(),
                    self.lock.timeout_seconds
                ),
            ));
        }

        if !(1..=59).contains(&self.pollers.interval_minutes) {
            return Err(ConfigurationError::invalid_value(
                "pollers.interval_minutes",
                self.pollers.interval_minutes.to_string(),
                "interval must be between 1 and 59 minutes",
            ));
        }

        if self.executor.backoff.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "executor.backoff.backoff_multiplier",
                self.executor.backoff.backoff_multiplier.to_string(),
                "multiplier must be at least 1.0",
            ));
        }

        for collaborator in &self.collaborators {
            collaborator.validate()?;
        }

        Ok(())
    }

    pub fn database_url(&self) -> String {
        self.database.database_url(&self.environment)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.lock.timeout_seconds).unwrap_or(0))
    }

    /// How long a release tick may keep starting collaborator calls. A call started
    /// just before the budget runs out still finishes before the lock expires.
    pub fn tick_dispatch_budget(&self) -> Duration {
        self.lock_timeout()
            .saturating_sub(self.executor.worst_case_call())
    }

    pub fn is_test_environment(&self) -> bool {
        self.environment == "test"
    }

    pub fn is_production_environment(&self) -> bool {
        self.environment == "production"
    }
}
