//! Task creation for stages and regression cycles.
//!
//! Which tasks exist is decided once, when the stage (or cycle) begins, from the
//! release's [`CronConfig`] toggles, its platforms and the slot's configuration.
//! Tasks are numbered in the order the executor must advance them.

use uuid::Uuid;

use crate::models::{CronConfig, Platform, RegressionSlotConfig, Release, ReleaseTask, TaskType};
use crate::state_machine::states::Stage;

fn build(release_id: Uuid, cycle_id: Option<Uuid>, types: Vec<TaskType>) -> Vec<ReleaseTask> {
    types
        .into_iter()
        .enumerate()
        .map(|(sequence, task_type)| ReleaseTask::new(release_id, task_type, cycle_id, sequence as i32))
        .collect()
}

pub fn kickoff_tasks(release: &Release, config: &CronConfig) -> Vec<ReleaseTask> {
    let mut types = Vec::new();
    if config.kickoff_reminder {
        types.push(TaskType::PreKickOffReminder);
    }
    types.push(TaskType::ForkBranch);
    if config.project_management {
        types.push(TaskType::CreateProjectManagementTicket);
    }
    if config.test_management {
        types.push(TaskType::CreateTestSuite);
    }
    if config.pre_regression_builds {
        types.push(TaskType::TriggerPreRegressionBuilds);
    }
    build(release.id, None, types)
}

/// Tasks for one regression cycle
pub fn regression_cycle_tasks(
    release: &Release,
    config: &CronConfig,
    slot: &RegressionSlotConfig,
    cycle_id: Uuid,
) -> Vec<ReleaseTask> {
    let mut types = Vec::new();
    if config.test_management {
        types.push(TaskType::ResetTestSuite);
    }
    types.push(TaskType::CreateRcTag);
    if config.release_notes && slot.post_release_notes {
        types.push(TaskType::CreateReleaseNotes);
    }
    if slot.regression_builds {
        types.push(TaskType::TriggerRegressionBuilds);
    }
    if slot.automation_builds {
        types.push(TaskType::TriggerAutomationRuns);
    }
    if slot.automation_runs {
        types.push(TaskType::AutomationRuns);
    }
    types.push(TaskType::SendRegressionBuildMessage);
    build(release.id, Some(cycle_id), types)
}

pub fn pre_release_tasks(release: &Release, config: &CronConfig) -> Vec<ReleaseTask> {
    let mut types = vec![TaskType::CreateReleaseTag];
    if config.release_notes {
        types.push(TaskType::CreateFinalReleaseNotes);
    }
    if config.test_flight_builds && release.platforms.contains(&Platform::Ios) {
        types.push(TaskType::TriggerTestFlightBuild);
    }
    if config.aab_builds && release.platforms.contains(&Platform::Android) {
        types.push(TaskType::CreateAabBuild);
    }
    types.push(TaskType::SendPreReleaseMessage);
    build(release.id, None, types)
}

/// Tasks created when `stage` begins. Regression tasks are created per cycle
/// instead, and distribution has none.
pub fn stage_tasks(release: &Release, config: &CronConfig, stage: Stage) -> Vec<ReleaseTask> {
    match stage {
        Stage::Kickoff => kickoff_tasks(release, config),
        Stage::PreRelease => pre_release_tasks(release, config),
        Stage::Regression | Stage::Distribution => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DistributionMode;
    use crate::version::ReleaseType;
    use chrono::Utc;

    fn release(platforms: Vec<Platform>) -> Release {
        let now = Utc::now();
        Release {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            version: "2.0.0".to_string(),
            release_type: ReleaseType::Major,
            platforms,
            distribution_mode: DistributionMode::CiBuild,
            kickoff_at: now,
            target_release_at: now,
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn types(tasks: &[ReleaseTask]) -> Vec<TaskType> {
        tasks.iter().map(|t| t.task_type).collect()
    }

    #[test]
    fn test_kickoff_respects_toggles() {
        let release = release(vec![Platform::Android]);
        let all = kickoff_tasks(&release, &CronConfig::default());
        assert_eq!(all.len(), 5);
        assert!(all.iter().enumerate().all(|(i, t)| t.sequence == i as i32));

        let minimal = CronConfig {
            kickoff_reminder: false,
            pre_regression_builds: false,
            project_management: false,
            test_management: false,
            ..CronConfig::default()
        };
        assert_eq!(types(&kickoff_tasks(&release, &minimal)), vec![TaskType::ForkBranch]);
    }

    #[test]
    fn test_regression_cycle_tasks_carry_cycle_id() {
        let release = release(vec![Platform::Android, Platform::Ios]);
        let cycle_id = Uuid::new_v4();
        let slot = RegressionSlotConfig {
            regression_builds: true,
            post_release_notes: false,
            automation_builds: true,
            automation_runs: true,
        };
        let tasks = regression_cycle_tasks(&release, &CronConfig::default(), &slot, cycle_id);

        assert!(tasks.iter().all(|t| t.cycle_id == Some(cycle_id)));
        assert!(tasks.iter().all(|t| t.stage == Stage::Regression));
        assert_eq!(
            types(&tasks),
            vec![
                TaskType::ResetTestSuite,
                TaskType::CreateRcTag,
                TaskType::TriggerRegressionBuilds,
                TaskType::TriggerAutomationRuns,
                TaskType::AutomationRuns,
                TaskType::SendRegressionBuildMessage,
            ]
        );
    }

    #[test]
    fn test_pre_release_builds_follow_platforms() {
        let android_only = release(vec![Platform::Android]);
        let tasks = pre_release_tasks(&android_only, &CronConfig::default());
        assert!(types(&tasks).contains(&TaskType::CreateAabBuild));
        assert!(!types(&tasks).contains(&TaskType::TriggerTestFlightBuild));

        assert!(stage_tasks(&android_only, &CronConfig::default(), Stage::Distribution).is_empty());
    }
}
