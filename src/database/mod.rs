//! # Database Operations
//!
//! PostgreSQL connection management for the release orchestrator.
//!
//! - [`connection`] - pool construction from [`DatabaseConfig`](crate::config::DatabaseConfig),
//!   health checks and schema migrations from `migrations/`
//!
//! Queries themselves live in [`crate::repository::PgReleaseStore`].
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use release_core::config::OrchestratorConfig;
//! use release_core::database::DatabaseConnection;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrchestratorConfig::default();
//! let db = DatabaseConnection::connect(&config).await?;
//! assert!(db.health_check().await?);
//! # Ok(())
//! # }
//! ```

pub mod connection;

pub use connection::DatabaseConnection;
