//! # Tick Scheduler
//!
//! Entry point for one externally triggered batch. Every schedulable release is
//! locked, ticked and unlocked independently; a release that is locked elsewhere
//! is skipped, and a release whose tick fails, panics or outlives its lock is
//! reported in the summary without affecting the others. Releases run
//! concurrently up to `scheduler.max_concurrent_releases`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::lock_manager::LockManager;
use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::logging::log_error;
use crate::repository::ReleaseStore;
use crate::state_machine::ReleaseStateMachine;

/// Result of one batch, as returned to the tick endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    /// The batch ran; per-release failures are listed in `errors`
    pub success: bool,
    pub processed_count: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

enum ReleaseTickResult {
    Processed,
    Skipped,
    Failed(String),
}

#[derive(Clone)]
pub struct TickScheduler {
    store: Arc<dyn ReleaseStore>,
    lock_manager: LockManager,
    state_machine: Arc<ReleaseStateMachine>,
    owner_id: String,
    lock_timeout_seconds: i64,
    lock_timeout: Duration,
    max_concurrent_releases: usize,
}

impl std::fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("owner_id", &self.owner_id)
            .field("max_concurrent_releases", &self.max_concurrent_releases)
            .finish_non_exhaustive()
    }
}

impl TickScheduler {
    pub fn new(
        store: Arc<dyn ReleaseStore>,
        state_machine: Arc<ReleaseStateMachine>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            lock_manager: LockManager::new(Arc::clone(&store)),
            store,
            state_machine,
            owner_id: config.scheduler.instance_id.clone(),
            lock_timeout_seconds: config.lock.timeout_seconds,
            lock_timeout: config.lock_timeout(),
            max_concurrent_releases: config.scheduler.max_concurrent_releases.max(1),
        }
    }

    /// Run one batch over every schedulable release
    #[instrument(skip(self), fields(owner_id = %self.owner_id))]
    pub async fn run_tick(&self) -> TickSummary {
        let started = Instant::now();

        let release_ids = match self.store.schedulable_release_ids(Utc::now()).await {
            Ok(ids) => ids,
            Err(err) => {
                log_error("tick_scheduler", "schedulable_release_ids", &err.to_string(), None);
                return TickSummary {
                    success: false,
                    processed_count: 0,
                    errors: vec![err.to_string()],
                    duration_ms: elapsed_ms(started),
                };
            }
        };
        debug!(candidates = release_ids.len(), "Starting tick batch");

        let results: Vec<(Uuid, ReleaseTickResult)> = stream::iter(release_ids)
            .map(|release_id| async move { (release_id, self.process_release(release_id).await) })
            .buffer_unordered(self.max_concurrent_releases)
            .collect()
            .await;

        let mut processed_count = 0;
        let mut skipped = 0;
        let mut errors = Vec::new();
        for (release_id, result) in results {
            match result {
                ReleaseTickResult::Processed => processed_count += 1,
                ReleaseTickResult::Skipped => skipped += 1,
                ReleaseTickResult::Failed(message) => {
                    errors.push(format!("{release_id}: {message}"));
                }
            }
        }
        errors.sort();

        let summary = TickSummary {
            success: true,
            processed_count,
            errors,
            duration_ms: elapsed_ms(started),
        };
        info!(
            processed = summary.processed_count,
            skipped,
            failed = summary.errors.len(),
            duration_ms = summary.duration_ms,
            "Tick batch finished"
        );
        summary
    }

    async fn process_release(&self, release_id: Uuid) -> ReleaseTickResult {
        let acquired = match self
            .lock_manager
            .acquire(release_id, &self.owner_id, self.lock_timeout_seconds)
            .await
        {
            Ok(acquired) => acquired,
            Err(err) => return ReleaseTickResult::Failed(err.to_string()),
        };
        if !acquired {
            debug!(release_id = %release_id, "Release locked elsewhere, skipping");
            return ReleaseTickResult::Skipped;
        }

        // The lock is released on every path, including a panicking collaborator
        let tick = AssertUnwindSafe(self.tick_locked(release_id)).catch_unwind();
        let result = match tokio::time::timeout(self.lock_timeout, tick).await {
            Ok(Ok(Ok(()))) => ReleaseTickResult::Processed,
            Ok(Ok(Err(err))) => {
                error!(release_id = %release_id, error = %err, "Release tick failed");
                ReleaseTickResult::Failed(err.to_string())
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(release_id = %release_id, panic = %message, "Release tick panicked");
                ReleaseTickResult::Failed(format!("tick panicked: {message}"))
            }
            Err(_) => {
                error!(
                    release_id = %release_id,
                    lock_timeout_seconds = self.lock_timeout_seconds,
                    "Release tick outlived its lock, abandoned"
                );
                ReleaseTickResult::Failed(format!(
                    "tick exceeded lock timeout of {}s",
                    self.lock_timeout_seconds
                ))
            }
        };

        if let Err(err) = self.lock_manager.release(release_id, &self.owner_id).await {
            warn!(release_id = %release_id, error = %err, "Failed to release lock");
        }
        result
    }


    async fn tick_locked(&self, release_id: Uuid) -> Result<()> {
        let outcome = self.state_machine.tick(release_id, &self.owner_id).await?;
        if outcome.changed() {
            debug!(
                release_id = %release_id,
                cron_status = %outcome.cron_status,
                events = outcome.events.len(),
                "Release advanced"
            );
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_reads_str_and_string_payloads() {
        let from_str: Box<dyn Any + Send> = Box::new("boom");
        let from_string: Box<dyn Any + Send> = Box::new(format!("task {} exploded", 7));
        let opaque: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(from_str.as_ref()), "boom");
        assert_eq!(panic_message(from_string.as_ref()), "task 7 exploded");
        assert_eq!(panic_message(opaque.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let summary = TickSummary {
            success: true,
            processed_count: 2,
            errors: vec!["abc: boom".to_string()],
            duration_ms: 17,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": true,
                "processedCount": 2,
                "errors": ["abc: boom"],
                "durationMs": 17
            })
        );
    }
}
