use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::OrchestratorConfig;

#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    /// Open a pool sized and timed from configuration, running migrations if enabled
    pub async fn connect(config: &OrchestratorConfig) -> Result<Self, sqlx::Error> {
        let database = &config.database;
        let pool = PgPoolOptions::new()
            .max_connections(database.pool)
            .acquire_timeout(Duration::from_secs(database.connect_timeout_seconds))
            .connect(&config.database_url())
            .await?;

        info!(
            pool_size = database.pool,
            database = %database.database_name(&config.environment),
            "Database pool connected"
        );

        let connection = Self { pool };
        if database.run_migrations {
            connection.migrate().await?;
        }
        Ok(connection)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        debug!("Running release orchestration migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 as health")
            .fetch_one(&self.pool)
            .await?;

        let health: i32 = row.try_get("health")?;
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
