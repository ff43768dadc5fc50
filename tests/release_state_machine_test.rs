mod common;

use std::sync::Arc;

use common::{regression_slot, upload, FailingCollaborator, ReleaseBuilder, TestHarness};
use release_core::error::OrchestrationError;
use release_core::models::{Platform, StageData, SubmissionStatus, TaskType, UploadStage};
use release_core::orchestration::{CollaboratorRole, LockManager, NoopCollaborator};
use release_core::repository::ReleaseStore;
use release_core::rollout::RolloutController;
use release_core::state_machine::{CronStatus, PauseType, Stage, StageStatus, TaskStatus};
use uuid::Uuid;

async fn ship_everywhere(harness: &TestHarness, release_id: Uuid) {
    let rollout = RolloutController::new(harness.store.clone());

    let android = rollout
        .create_submission(release_id, Platform::Android, false)
        .await
        .unwrap();
    let ios = rollout
        .create_submission(release_id, Platform::Ios, false)
        .await
        .unwrap();
    for submission in [&android, &ios] {
        for status in [
            SubmissionStatus::InReview,
            SubmissionStatus::Approved,
            SubmissionStatus::Live,
        ] {
            rollout.record_store_status(submission.id, status).await.unwrap();
        }
    }
    rollout.update_rollout(android.id, 100.0).await.unwrap();
}

fn task_status(harness: &TestHarness, release_id: Uuid, task_type: TaskType) -> TaskStatus {
    harness
        .store
        .all_tasks(release_id)
        .into_iter()
        .find(|task| task.task_type == task_type)
        .map(|task| task.task_status)
        .expect("task not created")
}

#[tokio::test]
async fn test_ci_release_runs_through_every_stage() {
    let harness = TestHarness::new();
    let release = ReleaseBuilder::new()
        .with_regression(regression_slot(0, "00:00"))
        .create(harness.store.as_ref())
        .await;

    // Start
    harness.tick(1).await;
    let job = harness.cron_job(release.id).await;
    assert_eq!(job.cron_status, CronStatus::Running);
    assert_eq!(harness.pollers.pollers_for_release(release.id).len(), 2);

    // Kickoff tasks complete and regression begins
    harness.tick(1).await;
    let job = harness.cron_job(release.id).await;
    assert_eq!(job.stage1_status, StageStatus::Completed);
    assert_eq!(job.current_stage(), Some(Stage::Regression));
    assert!(harness
        .store
        .tasks_for_stage(release.id, Stage::Kickoff)
        .await
        .unwrap()
        .iter()
        .all(|task| task.task_status == TaskStatus::Completed));

    // The due slot fires a cycle
    harness.tick(1).await;
    let job = harness.cron_job(release.id).await;
    assert!(job.upcoming_regressions.is_empty());
    let StageData::Regression {
        current_cycle_id: Some(cycle_id),
        completed_cycles: 0,
        ..
    } = job.stage_data
    else {
        panic!("expected a running regression cycle, got {:?}", job.stage_data);
    };
    let cycle_tasks = harness
        .store
        .tasks_for_stage(release.id, Stage::Regression)
        .await
        .unwrap();
    assert_eq!(cycle_tasks.len(), 5);
    assert!(cycle_tasks.iter().all(|task| task.cycle_id == Some(cycle_id)));

    // Cycle completes, regression completes, pre-release completes
    harness.tick(2).await;
    let job = harness.cron_job(release.id).await;
    assert_eq!(job.stage2_status, StageStatus::Completed);
    assert_eq!(job.stage3_status, StageStatus::Completed);
    assert_eq!(job.current_stage(), Some(Stage::Distribution));

    // Distribution waits for the stores
    harness.tick(1).await;
    assert_eq!(harness.cron_job(release.id).await.cron_status, CronStatus::Running);

    ship_everywhere(&harness, release.id).await;
    harness.tick(1).await;

    let job = harness.cron_job(release.id).await;
    assert_eq!(job.stage4_status, StageStatus::Completed);
    assert_eq!(job.cron_status, CronStatus::Completed);
    assert_eq!(job.pause_type, PauseType::None);
    assert!(job.locked_by.is_none());
    assert!(harness.pollers.pollers_for_release(release.id).is_empty());

    // Completed releases are no longer scheduled
    let summary = harness.context.tick_scheduler().run_tick().await;
    assert_eq!(summary.processed_count, 0);
}

#[tokio::test]
async fn test_manual_stage_trigger() {
    let harness = TestHarness::new();
    let release = ReleaseBuilder::new()
        .with_auto_transitions(false, true)
        .create(harness.store.as_ref())
        .await;
    let state_machine = harness.context.state_machine();

    harness.tick(2).await;
    let job = harness.cron_job(release.id).await;
    assert_eq!(job.cron_status, CronStatus::Paused);
    assert_eq!(job.pause_type, PauseType::AwaitingStageTrigger);
    assert_eq!(job.stage1_status, StageStatus::Completed);
    assert_eq!(job.stage2_status, StageStatus::Pending);

    // Paused releases are not ticked
    let summary = harness.context.tick_scheduler().run_tick().await;
    assert_eq!(summary.processed_count, 0);

    // Resume does not lift a stage gate
    assert!(matches!(
        state_machine.resume(release.id).await,
        Err(OrchestrationError::InvalidTransition { .. })
    ));

    let job = state_machine.trigger_next_stage(release.id).await.unwrap();
    assert_eq!(job.cron_status, CronStatus::Running);
    assert_eq!(job.pause_type, PauseType::None);
    assert_eq!(job.current_stage(), Some(Stage::Regression));
    assert!(harness.cron_job(release.id).await.locked_by.is_none());

    // Nothing left to trigger
    assert!(matches!(
        state_machine.trigger_next_stage(release.id).await,
        Err(OrchestrationError::InvalidTransition { .. })
    ));

    // No slots: regression completes and pre-release starts on its own
    harness.tick(1).await;
    assert_eq!(
        harness.cron_job(release.id).await.current_stage(),
        Some(Stage::PreRelease)
    );
}

#[tokio::test]
async fn test_task_failure_pauses_until_retried() {
    let harness = TestHarness::new();
    let failing = Arc::new(FailingCollaborator::new("branch protection rejected push"));
    harness
        .collaborators
        .register(CollaboratorRole::SourceControl, failing.clone());
    let release = ReleaseBuilder::new().create(harness.store.as_ref()).await;
    let state_machine = harness.context.state_machine();

    harness.tick(2).await;
    let job = harness.cron_job(release.id).await;
    assert_eq!(job.cron_status, CronStatus::Paused);
    assert_eq!(job.pause_type, PauseType::TaskFailure);
    assert_eq!(job.current_stage(), Some(Stage::Kickoff));
    assert_eq!(*failing.calls.lock(), 1);

    let fork = harness
        .store
        .all_tasks(release.id)
        .into_iter()
        .find(|task| task.task_type == TaskType::ForkBranch)
        .unwrap();
    assert_eq!(fork.task_status, TaskStatus::Failed);
    assert_eq!(
        fork.failure_reason.as_deref(),
        Some("branch protection rejected push")
    );
    // Later tasks never started
    assert_eq!(
        task_status(&harness, release.id, TaskType::CreateTestSuite),
        TaskStatus::Pending
    );

    // Failure pauses need an explicit retry
    harness.tick(1).await;
    assert_eq!(*failing.calls.lock(), 1);
    assert!(matches!(
        state_machine.resume(release.id).await,
        Err(OrchestrationError::InvalidTransition { .. })
    ));

    harness.collaborators.register(
        CollaboratorRole::SourceControl,
        Arc::new(NoopCollaborator::named("github")),
    );
    let job = state_machine.retry_failed_tasks(release.id).await.unwrap();
    assert_eq!(job.cron_status, CronStatus::Running);
    assert_eq!(
        task_status(&harness, release.id, TaskType::ForkBranch),
        TaskStatus::Pending
    );

    harness.tick(1).await;
    let job = harness.cron_job(release.id).await;
    assert_eq!(job.stage1_status, StageStatus::Completed);
    assert_eq!(job.current_stage(), Some(Stage::Regression));
}

#[tokio::test]
async fn test_user_pause_and_resume() {
    let harness = TestHarness::new();
    let release = ReleaseBuilder::new().create(harness.store.as_ref()).await;
    let state_machine = harness.context.state_machine();

    // Cannot pause before the release has started
    assert!(matches!(
        state_machine.pause(release.id).await,
        Err(OrchestrationError::InvalidTransition { .. })
    ));

    harness.tick(1).await;
    let job = state_machine.pause(release.id).await.unwrap();
    assert_eq!(job.cron_status, CronStatus::Paused);
    assert_eq!(job.pause_type, PauseType::UserRequested);
    assert!(matches!(
        state_machine.pause(release.id).await,
        Err(OrchestrationError::InvalidTransition { .. })
    ));

    // Kickoff tasks stay untouched while paused
    harness.tick(2).await;
    assert!(harness
        .store
        .all_tasks(release.id)
        .iter()
        .all(|task| task.task_status == TaskStatus::Pending));

    let job = state_machine.resume(release.id).await.unwrap();
    assert_eq!(job.cron_status, CronStatus::Running);
    assert_eq!(job.pause_type, PauseType::None);

    harness.tick(1).await;
    assert_eq!(
        harness.cron_job(release.id).await.current_stage(),
        Some(Stage::Regression)
    );
}

#[tokio::test]
async fn test_operator_actions_respect_the_lock() {
    let harness = TestHarness::new();
    let release = ReleaseBuilder::new().create(harness.store.as_ref()).await;
    harness.tick(1).await;

    let other = LockManager::new(harness.store.clone());
    assert!(other.acquire(release.id, "other-instance", 300).await.unwrap());

    let err = harness
        .context
        .state_machine()
        .pause(release.id)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::LockContention { release_id } if release_id == release.id));

    let job = harness.cron_job(release.id).await;
    assert_eq!(job.cron_status, CronStatus::Running);
    assert_eq!(job.locked_by.as_deref(), Some("other-instance"));
}

#[tokio::test]
async fn test_archive_completes_immediately() {
    let harness = TestHarness::new();
    let release = ReleaseBuilder::new().create(harness.store.as_ref()).await;
    let state_machine = harness.context.state_machine();
    harness.tick(1).await;
    assert_eq!(harness.pollers.pollers_for_release(release.id).len(), 2);

    let job = state_machine.archive(release.id).await.unwrap();
    assert_eq!(job.cron_status, CronStatus::Completed);
    assert_eq!(job.stage4_status, StageStatus::Pending);

    let stored = harness.store.find_release(release.id).await.unwrap().unwrap();
    assert!(stored.archived);
    assert!(harness.pollers.pollers_for_release(release.id).is_empty());

    assert!(matches!(
        state_machine.archive(release.id).await,
        Err(OrchestrationError::InvalidTransition { .. })
    ));
    let summary = harness.context.tick_scheduler().run_tick().await;
    assert_eq!(summary.processed_count, 0);
}

#[tokio::test]
async fn test_manual_upload_release_waits_for_builds() {
    let harness = TestHarness::new();
    let release = ReleaseBuilder::new()
        .manual_upload()
        .create(harness.store.as_ref())
        .await;

    // Start, then every kickoff task but the build completes
    harness.tick(2).await;
    assert_eq!(
        task_status(&harness, release.id, TaskType::ForkBranch),
        TaskStatus::Completed
    );
    assert_eq!(
        task_status(&harness, release.id, TaskType::TriggerPreRegressionBuilds),
        TaskStatus::AwaitingCallback
    );

    // One platform is not enough
    harness
        .store
        .insert_upload(upload(release.id, UploadStage::PreRegression, Platform::Android))
        .await
        .unwrap();
    harness.tick(1).await;
    assert_eq!(
        harness.cron_job(release.id).await.current_stage(),
        Some(Stage::Kickoff)
    );

    harness
        .store
        .insert_upload(upload(release.id, UploadStage::PreRegression, Platform::Ios))
        .await
        .unwrap();
    harness.tick(1).await;
    assert_eq!(
        task_status(&harness, release.id, TaskType::TriggerPreRegressionBuilds),
        TaskStatus::Completed
    );
    assert_eq!(
        harness.cron_job(release.id).await.current_stage(),
        Some(Stage::Regression)
    );

    // Regression (no slots) completes, then pre-release waits on its builds
    harness.tick(2).await;
    assert_eq!(
        task_status(&harness, release.id, TaskType::TriggerTestFlightBuild),
        TaskStatus::AwaitingCallback
    );
    assert_eq!(
        task_status(&harness, release.id, TaskType::CreateAabBuild),
        TaskStatus::Pending
    );

    for platform in [Platform::Ios, Platform::Android] {
        harness
            .store
            .insert_upload(upload(release.id, UploadStage::PreRelease, platform))
            .await
            .unwrap();
    }
    harness.tick(1).await;
    assert_eq!(
        harness.cron_job(release.id).await.current_stage(),
        Some(Stage::Distribution)
    );

    let uploads = harness.store.uploads_for_release(release.id).await.unwrap();
    assert_eq!(uploads.len(), 4);
    assert!(uploads.iter().all(|u| u.used && u.used_by_task_id.is_some()));

    let testflight_task = harness
        .store
        .all_tasks(release.id)
        .into_iter()
        .find(|task| task.task_type == TaskType::TriggerTestFlightBuild)
        .unwrap();
    let ios_pre_release = uploads
        .iter()
        .find(|u| u.stage == UploadStage::PreRelease && u.platform == Platform::Ios)
        .unwrap();
    assert_eq!(ios_pre_release.used_by_task_id, Some(testflight_task.id));
}
