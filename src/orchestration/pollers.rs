//! # Workflow Pollers
//!
//! Each running release gets two recurring pollers in an external scheduler: one
//! that picks up PENDING workflow runs and one that follows RUNNING ones. They are
//! created when the release starts and deleted when it completes or is archived.
//!
//! Poller ids are derived from the release id, so creating them is idempotent and
//! deleting them needs no stored state.
//!
//! [`PgPollerScheduler`] keeps poller definitions in the `workflow_pollers` table,
//! where the external cron runner reads them; they outlive the process that
//! created them. [`InMemoryPollerScheduler`] is process-local and only suits tests
//! and embedded use.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{OrchestrationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerKind {
    Pending,
    Running,
}

impl PollerKind {
    pub const ALL: [PollerKind; 2] = [PollerKind::Pending, PollerKind::Running];

    pub fn poller_id(&self, release_id: Uuid) -> String {
        format!("{self}-poller-{release_id}")
    }
}

impl fmt::Display for PollerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPoller {
    pub id: String,
    pub release_id: Uuid,
    pub kind: PollerKind,
    pub interval_minutes: u32,
    pub created_at: DateTime<Utc>,
}

impl WorkflowPoller {
    pub fn new(release_id: Uuid, kind: PollerKind, interval_minutes: u32) -> Result<Self> {
        if !(1..=59).contains(&interval_minutes) {
            return Err(OrchestrationError::validation(format!(
                "poller interval must be between 1 and 59 minutes, got {interval_minutes}"
            )));
        }
        Ok(Self {
            id: kind.poller_id(release_id),
            release_id,
            kind,
            interval_minutes,
            created_at: Utc::now(),
        })
    }

    /// Cron expression the external scheduler runs the poller on
    pub fn cron_expression(&self) -> String {
        format!("*/{} * * * *", self.interval_minutes)
    }
}

/// External scheduler owning recurring poller jobs
#[async_trait]
pub trait WorkflowPollerScheduler: Send + Sync {
    /// Create or replace a poller
    async fn upsert_poller(&self, poller: WorkflowPoller) -> Result<()>;

    /// Remove a poller; returns whether it existed
    async fn delete_poller(&self, poller_id: &str) -> Result<bool>;
}

/// Create both pollers for a release
pub async fn create_release_pollers(
    scheduler: &Arc<dyn WorkflowPollerScheduler>,
    release_id: Uuid,
    interval_minutes: u32,
) -> Result<()> {
    for kind in PollerKind::ALL {
        let poller = WorkflowPoller::new(release_id, kind, interval_minutes)?;
        debug!(poller_id = %poller.id, cron = %poller.cron_expression(), "Creating workflow poller");
        scheduler.upsert_poller(poller).await?;
    }
    info!(release_id = %release_id, interval_minutes, "Workflow pollers created");
    Ok(())
}

/// Delete both pollers for a release
pub async fn delete_release_pollers(
    scheduler: &Arc<dyn WorkflowPollerScheduler>,
    release_id: Uuid,
) -> Result<()> {
    for kind in PollerKind::ALL {
        scheduler.delete_poller(&kind.poller_id(release_id)).await?;
    }
    info!(release_id = %release_id, "Workflow pollers deleted");
    Ok(())
}

/// In-process poller registry for tests and single-node deployments
#[derive(Debug, Default)]
pub struct InMemoryPollerScheduler {
    pollers: DashMap<String, WorkflowPoller>,
}

impl InMemoryPollerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, poller_id: &str) -> Option<WorkflowPoller> {
        self.pollers.get(poller_id).map(|p| p.value().clone())
    }

    pub fn pollers_for_release(&self, release_id: Uuid) -> Vec<WorkflowPoller> {
        let mut pollers: Vec<WorkflowPoller> = self
            .pollers
            .iter()
            .filter(|entry| entry.value().release_id == release_id)
            .map(|entry| entry.value().clone())
            .collect();
        pollers.sort_by(|a, b| a.id.cmp(&b.id));
        pollers
    }

    pub fn len(&self) -> usize {
        self.pollers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pollers.is_empty()
    }
}

#[async_trait]
impl WorkflowPollerScheduler for InMemoryPollerScheduler {
    async fn upsert_poller(&self, poller: WorkflowPoller) -> Result<()> {
        self.pollers.insert(poller.id.clone(), poller);
        Ok(())
    }

    async fn delete_poller(&self, poller_id: &str) -> Result<bool> {
        Ok(self.pollers.remove(poller_id).is_some())
    }
}

/// Poller definitions persisted in PostgreSQL
#[derive(Debug, Clone)]
pub struct PgPollerScheduler {
    pool: PgPool,
}

impl PgPollerScheduler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn pollers_for_release(&self, release_id: Uuid) -> Result<Vec<WorkflowPoller>> {
        let rows = sqlx::query(
            r#"
            SELECT id, release_id, kind, interval_minutes, created_at
            FROM workflow_pollers
            WHERE release_id = $1
            ORDER BY id
            "#,
        )
        .bind(release_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let kind: String = row.try_get("kind")?;
                let interval_minutes: i32 = row.try_get("interval_minutes")?;
                Ok(WorkflowPoller {
                    id: row.try_get("id")?,
                    release_id: row.try_get("release_id")?,
                    kind: match kind.as_str() {
                        "pending" => PollerKind::Pending,
                        "running" => PollerKind::Running,
                        other => {
                            return Err(OrchestrationError::validation(format!(
                                "unknown poller kind '{other}'"
                            )))
                        }
                    },
                    interval_minutes: u32::try_from(interval_minutes).map_err(|_| {
                        OrchestrationError::validation(format!(
                            "negative poller interval {interval_minutes}"
                        ))
                    })?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl WorkflowPollerScheduler for PgPollerScheduler {
    #[instrument(skip(self, poller), fields(poller_id = %poller.id))]
    async fn upsert_poller(&self, poller: WorkflowPoller) -> Result<()> {
        let interval_minutes = i32::try_from(poller.interval_minutes).map_err(|_| {
            OrchestrationError::validation(format!(
                "poller interval {} out of range",
                poller.interval_minutes
            ))
        })?;
        sqlx::query(
            r#"
            INSERT INTO workflow_pollers (id, release_id, kind, interval_minutes, cron_expression, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET interval_minutes = EXCLUDED.interval_minutes,
                cron_expression = EXCLUDED.cron_expression
            "#,
        )
        .bind(&poller.id)
        .bind(poller.release_id)
        .bind(poller.kind.to_string())
        .bind(interval_minutes)
        .bind(poller.cron_expression())
        .bind(poller.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_poller(&self, poller_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflow_pollers WHERE id = $1")
            .bind(poller_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poller_ids() {
        let release_id = Uuid::nil();
        assert_eq!(
            PollerKind::Pending.poller_id(release_id),
            "pending-poller-00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            PollerKind::Running.poller_id(release_id),
            "running-poller-00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_interval_bounds() {
        assert!(WorkflowPoller::new(Uuid::new_v4(), PollerKind::Pending, 0).is_err());
        assert!(WorkflowPoller::new(Uuid::new_v4(), PollerKind::Pending, 60).is_err());
        let poller = WorkflowPoller::new(Uuid::new_v4(), PollerKind::Running, 15).unwrap();
        assert_eq!(poller.cron_expression(), "*/15 * * * *");
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_delete_removes_both() {
        let in_memory = Arc::new(InMemoryPollerScheduler::new());
        let scheduler: Arc<dyn WorkflowPollerScheduler> = in_memory.clone();
        let release_id = Uuid::new_v4();

        create_release_pollers(&scheduler, release_id, 5).await.unwrap();
        create_release_pollers(&scheduler, release_id, 5).await.unwrap();
        assert_eq!(in_memory.pollers_for_release(release_id).len(), 2);

        delete_release_pollers(&scheduler, release_id).await.unwrap();
        assert!(in_memory.is_empty());
    }
}
