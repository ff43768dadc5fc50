//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles config directory discovery,
//! environment detection and layering through the `config` crate.

use super::error::{ConfigResult, ConfigurationError};
use super::OrchestratorConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const CONFIG_FILE_STEM: &str = "release-orchestrator";
pub const ENV_PREFIX: &str = "RELEASE_ORCHESTRATOR";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::build_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            instance_id = %config.scheduler.instance_id,
            max_concurrent_releases = config.scheduler.max_concurrent_releases,
            lock_timeout_seconds = config.lock.timeout_seconds,
            collaborators = config.collaborators.len(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (tests, embedding)
    pub fn from_config(config: OrchestratorConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            environment: config.environment.clone(),
            config,
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with the database password masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        if let Some(database) = value.get_mut("database").and_then(|d| d.as_object_mut()) {
            database.insert("password".to_string(), serde_json::json!("***"));
            if database.get("url").is_some_and(|url| !url.is_null()) {
                database.insert("url".to_string(), serde_json::json!("***"));
            }
        }
        value
    }

    /// RELEASE_ENV, then APP_ENV, defaulting to development
    pub fn detect_environment() -> String {
        env::var("RELEASE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn build_config(config_directory: &Path, environment: &str) -> ConfigResult<OrchestratorConfig> {
        let defaults = OrchestratorConfig {
            environment: environment.to_string(),
            ..OrchestratorConfig::default()
        };

        let base_file = config_directory.join(format!("{CONFIG_FILE_STEM}.toml"));
        let env_file = config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}.toml"));

        for file in [&base_file, &env_file] {
            if file.exists() {
                debug!(file = %file.display(), "Applying configuration file");
            }
        }

        let defaults_source = Config::try_from(&defaults)
            .map_err(|e| ConfigurationError::load_error(environment, e))?;

        Config::builder()
            .add_source(defaults_source)
            .add_source(File::from(base_file).required(false))
            .add_source(File::from(env_file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|merged| merged.try_deserialize::<OrchestratorConfig>())
            .map_err(|e| ConfigurationError::load_error(environment, e))
    }
}
