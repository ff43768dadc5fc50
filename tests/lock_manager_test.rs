mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{FailingReleaseStore, ReleaseBuilder};
use release_core::error::OrchestrationError;
use release_core::orchestration::LockManager;
use release_core::repository::{InMemoryReleaseStore, ReleaseStore};
use uuid::Uuid;

async fn setup() -> (Arc<InMemoryReleaseStore>, LockManager, Uuid) {
    let store = Arc::new(InMemoryReleaseStore::new());
    let release = ReleaseBuilder::new().create(store.as_ref()).await;
    let manager = LockManager::new(store.clone());
    (store, manager, release.id)
}

#[tokio::test]
async fn test_concurrent_acquires_have_exactly_one_winner() {
    let (store, manager, release_id) = setup().await;

    let attempts = (0..8).map(|i| {
        let manager = manager.clone();
        async move { manager.acquire(release_id, &format!("instance-{i}"), 300).await }
    });
    let results: Vec<bool> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|won| **won).count(), 1);
    let job = store.find_cron_job(release_id).await.unwrap().unwrap();
    assert!(job.is_lock_held(Utc::now()));
}

#[tokio::test]
async fn test_interleaved_acquires_race_on_the_same_version() {
    let inner = Arc::new(InMemoryReleaseStore::new());
    let release = ReleaseBuilder::new().create(inner.as_ref()).await;
    // Both callers read the unlocked cron job before either compare-and-set runs
    let store = Arc::new(FailingReleaseStore::new(inner.clone(), []).with_cron_job_barrier(2));
    let manager = LockManager::new(store);

    let (a, b) = tokio::join!(
        manager.acquire(release.id, "instance-a", 300),
        manager.acquire(release.id, "instance-b", 300),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a ^ b, "exactly one acquire must win, got a={a} b={b}");

    let job = inner.find_cron_job(release.id).await.unwrap().unwrap();
    assert_eq!(job.lock_version, 1);
    let winner = if a { "instance-a" } else { "instance-b" };
    assert_eq!(job.locked_by.as_deref(), Some(winner));
}

#[tokio::test]
async fn test_held_lock_blocks_everyone_including_owner() {
    let (_store, manager, release_id) = setup().await;

    assert!(manager.acquire(release_id, "instance-a", 300).await.unwrap());
    assert!(!manager.acquire(release_id, "instance-b", 300).await.unwrap());
    assert!(!manager.acquire(release_id, "instance-a", 300).await.unwrap());
}

#[tokio::test]
async fn test_stale_lock_is_reclaimed() {
    let (store, manager, release_id) = setup().await;
    assert!(manager.acquire(release_id, "crashed-instance", 60).await.unwrap());

    // Age the lock past its timeout
    let mut job = store.find_cron_job(release_id).await.unwrap().unwrap();
    job.locked_at = Some(Utc::now() - Duration::seconds(61));
    store.put_cron_job(job);

    assert!(manager.acquire(release_id, "instance-b", 300).await.unwrap());
    let job = store.find_cron_job(release_id).await.unwrap().unwrap();
    assert_eq!(job.locked_by.as_deref(), Some("instance-b"));
    assert_eq!(job.lock_timeout_seconds, 300);
}

#[tokio::test]
async fn test_only_owner_releases() {
    let (store, manager, release_id) = setup().await;
    assert!(manager.acquire(release_id, "instance-a", 300).await.unwrap());

    assert!(!manager.release(release_id, "instance-b").await.unwrap());
    assert!(store
        .find_cron_job(release_id)
        .await
        .unwrap()
        .unwrap()
        .is_locked_by("instance-a", Utc::now()));

    assert!(manager.release(release_id, "instance-a").await.unwrap());
    assert!(manager.acquire(release_id, "instance-b", 300).await.unwrap());
}

#[tokio::test]
async fn test_unknown_release_and_bad_timeout_are_errors() {
    let (_store, manager, release_id) = setup().await;

    assert!(matches!(
        manager.acquire(Uuid::new_v4(), "instance-a", 300).await,
        Err(OrchestrationError::NotFound { .. })
    ));
    assert!(matches!(
        manager.acquire(release_id, "instance-a", 0).await,
        Err(OrchestrationError::Validation(_))
    ));
}
