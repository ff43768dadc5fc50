//! # Release Lock Manager
//!
//! ## Architecture: Per-Release Advisory Lock with Staleness Reclaim
//!
//! Every release's cron job carries `locked_by`, `locked_at` and
//! `lock_timeout_seconds`. An instance may progress a release only while it holds
//! that lock, so horizontally scaled instances never advance the same release at
//! once.
//!
//! ## Key Features
//!
//! - **Compare-and-set acquisition**: the write only applies if `lock_version` is
//!   still the version that was read, so two instances racing on the same
//!   unlocked (or stale) row cannot both win
//! - **Staleness reclaim**: a lock whose `locked_at + lock_timeout_seconds` has
//!   passed is free, which recovers releases whose owner crashed mid-tick
//! - **Owner-only release**: releasing a lock someone else holds is a no-op
//!
//! ## Usage
//!
//! ```rust
//! use release_core::orchestration::lock_manager::LockManager;
//! use release_core::repository::InMemoryReleaseStore;
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! # async fn example(release_id: Uuid) -> release_core::error::Result<()> {
//! let manager = LockManager::new(Arc::new(InMemoryReleaseStore::new()));
//!
//! if manager.acquire(release_id, "orchestrator-a", 300).await? {
//!     // progress the release...
//!     manager.release(release_id, "orchestrator-a").await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{OrchestrationError, Result};
use crate::models::CronJob;
use crate::repository::ReleaseStore;

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn ReleaseStore>,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager").finish_non_exhaustive()
    }
}

impl LockManager {
    pub fn new(store: Arc<dyn ReleaseStore>) -> Self {
        Self { store }
    }

    /// Try to take the release lock for `owner_id`.
    ///
    /// Returns `false` when another valid lock exists or another instance won the
    /// compare-and-set; contention is never an error.
    #[instrument(skip(self), fields(release_id = %release_id, owner_id = %owner_id))]
    pub async fn acquire(
        &self,
        release_id: Uuid,
        owner_id: &str,
        timeout_seconds: i64,
    ) -> Result<bool> {
        if timeout_seconds <= 0 {
            return Err(OrchestrationError::validation(format!(
                "lock timeout must be positive, got {timeout_seconds}"
            )));
        }

        let cron_job = self
            .store
            .find_cron_job(release_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("CronJob", release_id))?;

        let now = Utc::now();
        if cron_job.is_lock_held(now) {
            debug!(
                locked_by = ?cron_job.locked_by,
                expires_at = ?cron_job.lock_expires_at(),
                "Release lock held by another owner"
            );
            return Ok(false);
        }

        if cron_job.locked_by.is_some() {
            info!(
                stale_owner = ?cron_job.locked_by,
                "Reclaiming stale release lock"
            );
        }

        let acquired = self
            .store
            .compare_and_set_lock(
                release_id,
                cron_job.lock_version,
                owner_id,
                now,
                timeout_seconds,
            )
            .await?;

        if acquired {
            debug!("Acquired release lock");
        } else {
            debug!("Lost release lock race");
        }
        Ok(acquired)
    }

    /// Release the lock if `owner_id` holds it. Returns whether anything was released.
    #[instrument(skip(self), fields(release_id = %release_id, owner_id = %owner_id))]
    pub async fn release(&self, release_id: Uuid, owner_id: &str) -> Result<bool> {
        let released = self.store.release_lock(release_id, owner_id).await?;
        if !released {
            debug!("Release lock was not held by this owner");
        }
        Ok(released)
    }

    /// A lock is held iff an owner is set and its timeout has not elapsed
    pub fn is_held(cron_job: &CronJob) -> bool {
        cron_job.is_lock_held(Utc::now())
    }
}
