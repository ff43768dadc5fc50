//! # Structured Logging Module
//!
//! Environment-aware structured logging for the tick loop and operator actions.
//! Human-readable output in development and test, JSON lines in production.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let layer = if environment == "production" {
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter)
                .boxed()
        };

        // Embedding applications may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("RELEASE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
        .to_lowercase()
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for release-level operations (ticks, stage changes, operator actions)
pub fn log_release_operation(
    operation: &str,
    release_id: Uuid,
    owner_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        release_id = %release_id,
        owner_id = owner_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🚀 RELEASE_OPERATION"
    );
}

/// Log structured data for task operations
pub fn log_task_operation(
    operation: &str,
    release_id: Uuid,
    task_id: Uuid,
    task_type: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        release_id = %release_id,
        task_id = %task_id,
        task_type = %task_type,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 TASK_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
