//! Configuration Error Types
//!
//! Specific, actionable errors for configuration loading and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Configuration directory does not exist
    #[error("Configuration directory not found: {path:?}")]
    ConfigDirectoryNotFound { path: PathBuf },

    /// Layer merging or deserialization failed inside the `config` crate
    #[error("Failed to load configuration for environment '{environment}': {error}")]
    LoadError { environment: String, error: String },

    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Cross-field validation errors
    #[error("Configuration validation failed: {error}")]
    ValidationError { error: String },
}

impl ConfigurationError {
    pub fn config_directory_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ConfigDirectoryNotFound { path: path.into() }
    }

    pub fn load_error<E: Into<String>, R: std::fmt::Display>(environment: E, error: R) -> Self {
        Self::LoadError {
            environment: environment.into(),
            error: error.to_string(),
        }
    }

    /// Create a missing required field error
    pub fn missing_required_field<F: Into<String>, C: Into<String>>(field: F, context: C) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value<F: Into<String>, V: Into<String>, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    pub fn validation_error<E: std::fmt::Display>(error: E) -> Self {
        Self::ValidationError {
            error: error.to_string(),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;
