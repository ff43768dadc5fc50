//! # PostgreSQL Release Store
//!
//! `sqlx`-backed implementation of [`ReleaseStore`] and [`SubmissionStore`].
//!
//! Queries are built at runtime (no compile-time database connection needed).
//! Status enums are stored as their canonical upper-case names and the closed
//! payload types (`cron_config`, `stage_data`, `upcoming_regressions`,
//! `platforms`) as JSONB.
//!
//! ## Atomicity
//!
//! - Lock acquisition is a single `UPDATE ... WHERE lock_version = $expected`
//! - Lock release is a single `UPDATE ... WHERE locked_by = $owner`
//! - [`ReleaseStore::commit`] runs in one transaction; the cron job row is taken
//!   `FOR UPDATE` for the lock fence and every task/upload write carries its own
//!   `WHERE` guard, so a lost race rolls the whole changeset back

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{validate_new_release, ReleaseChangeset, ReleaseStore, SubmissionStore};
use crate::error::{OrchestrationError, Result};
use crate::models::{CronJob, Release, ReleaseTask, ReleaseUpload, Submission, UploadStage};
use crate::state_machine::states::Stage;

const CRON_JOB_COLUMNS: &str = r#"
    release_id, stage1_status, stage2_status, stage3_status, stage4_status,
    cron_status, pause_type, cron_config, upcoming_regressions,
    auto_transition_to_stage2, auto_transition_to_stage3,
    locked_by, locked_at, lock_timeout_seconds, lock_version, stage_data, updated_at
"#;

const TASK_COLUMNS: &str = r#"
    id, release_id, stage, task_type, task_status, cycle_id, failure_reason,
    external_ref, sequence, created_at, updated_at
"#;

const UPLOAD_COLUMNS: &str = r#"
    id, release_id, stage, platform, artifact_path, used, used_by_task_id,
    used_in_cycle_id, created_at
"#;

const SUBMISSION_COLUMNS: &str = r#"
    id, release_id, platform, status, rollout_percentage, phased_release,
    pause_reason, halt_severity, halt_reason, version, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct PgReleaseStore {
    pool: PgPool,
}

impl PgReleaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode_error(column: &str, reason: String) -> OrchestrationError {
    OrchestrationError::Database(sqlx::Error::Decode(
        format!("column {column}: {reason}").into(),
    ))
}

fn enum_column<T: FromStr<Err = String>>(row: &PgRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| decode_error(column, e))
}

fn optional_enum_column<T: FromStr<Err = String>>(row: &PgRow, column: &str) -> Result<Option<T>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| value.parse().map_err(|e| decode_error(column, e)))
        .transpose()
}

fn json_column<T: DeserializeOwned>(row: &PgRow, column: &str) -> Result<T> {
    let value: serde_json::Value = row.try_get(column)?;
    Ok(serde_json::from_value(value)?)
}

fn release_from_row(row: &PgRow) -> Result<Release> {
    Ok(Release {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        version: row.try_get("version")?,
        release_type: enum_column(row, "release_type")?,
        platforms: json_column(row, "platforms")?,
        distribution_mode: enum_column(row, "distribution_mode")?,
        kickoff_at: row.try_get("kickoff_at")?,
        target_release_at: row.try_get("target_release_at")?,
        archived: row.try_get("archived")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn cron_job_from_row(row: &PgRow) -> Result<CronJob> {
    Ok(CronJob {
        release_id: row.try_get("release_id")?,
        stage1_status: enum_column(row, "stage1_status")?,
        stage2_status: enum_column(row, "stage2_status")?,
        stage3_status: enum_column(row, "stage3_status")?,
        stage4_status: enum_column(row, "stage4_status")?,
        cron_status: enum_column(row, "cron_status")?,
        pause_type: enum_column(row, "pause_type")?,
        cron_config: json_column(row, "cron_config")?,
        upcoming_regressions: json_column(row, "upcoming_regressions")?,
        auto_transition_to_stage2: row.try_get("auto_transition_to_stage2")?,
        auto_transition_to_stage3: row.try_get("auto_transition_to_stage3")?,
        locked_by: row.try_get("locked_by")?,
        locked_at: row.try_get("locked_at")?,
        lock_timeout_seconds: row.try_get("lock_timeout_seconds")?,
        lock_version: row.try_get("lock_version")?,
        stage_data: json_column(row, "stage_data")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn task_from_row(row: &PgRow) -> Result<ReleaseTask> {
    Ok(ReleaseTask {
        id: row.try_get("id")?,
        release_id: row.try_get("release_id")?,
        stage: enum_column(row, "stage")?,
        task_type: enum_column(row, "task_type")?,
        task_status: enum_column(row, "task_status")?,
        cycle_id: row.try_get("cycle_id")?,
        failure_reason: row.try_get("failure_reason")?,
        external_ref: row.try_get("external_ref")?,
        sequence: row.try_get("sequence")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn upload_from_row(row: &PgRow) -> Result<ReleaseUpload> {
    Ok(ReleaseUpload {
        id: row.try_get("id")?,
        release_id: row.try_get("release_id")?,
        stage: enum_column(row, "stage")?,
        platform: enum_column(row, "platform")?,
        artifact_path: row.try_get("artifact_path")?,
        used: row.try_get("used")?,
        used_by_task_id: row.try_get("used_by_task_id")?,
        used_in_cycle_id: row.try_get("used_in_cycle_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn submission_from_row(row: &PgRow) -> Result<Submission> {
    Ok(Submission {
        id: row.try_get("id")?,
        release_id: row.try_get("release_id")?,
        platform: enum_column(row, "platform")?,
        status: enum_column(row, "status")?,
        rollout_percentage: row.try_get("rollout_percentage")?,
        phased_release: row.try_get("phased_release")?,
        pause_reason: row.try_get("pause_reason")?,
        halt_severity: optional_enum_column(row, "halt_severity")?,
        halt_reason: row.try_get("halt_reason")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn insert_task(tx: &mut Transaction<'_, Postgres>, task: &ReleaseTask) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO release_tasks (
            id, release_id, stage, task_type, task_status, cycle_id, failure_reason,
            external_ref, sequence, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(task.id)
    .bind(task.release_id)
    .bind(task.stage.to_string())
    .bind(task.task_type.to_string())
    .bind(task.task_status.to_string())
    .bind(task.cycle_id)
    .bind(&task.failure_reason)
    .bind(&task.external_ref)
    .bind(task.sequence)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn update_cron_job(tx: &mut Transaction<'_, Postgres>, job: &CronJob) -> Result<()> {
    // Lock columns are deliberately absent: only the lock manager writes them
    sqlx::query(
        r#"
        UPDATE release_cron_jobs SET
            stage1_status = $2, stage2_status = $3, stage3_status = $4, stage4_status = $5,
            cron_status = $6, pause_type = $7, cron_config = $8, upcoming_regressions = $9,
            auto_transition_to_stage2 = $10, auto_transition_to_stage3 = $11,
            stage_data = $12, updated_at = NOW()
        WHERE release_id = $1
        "#,
    )
    .bind(job.release_id)
    .bind(job.stage1_status.to_string())
    .bind(job.stage2_status.to_string())
    .bind(job.stage3_status.to_string())
    .bind(job.stage4_status.to_string())
    .bind(job.cron_status.to_string())
    .bind(job.pause_type.to_string())
    .bind(serde_json::to_value(job.cron_config)?)
    .bind(serde_json::to_value(&job.upcoming_regressions)?)
    .bind(job.auto_transition_to_stage2)
    .bind(job.auto_transition_to_stage3)
    .bind(serde_json::to_value(&job.stage_data)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl ReleaseStore for PgReleaseStore {
    #[instrument(skip(self, release, cron_job), fields(release_id = %release.id))]
    async fn create_release(&self, release: Release, cron_job: CronJob) -> Result<()> {
        validate_new_release(&release, &cron_job)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO releases (
                id, tenant_id, version, release_type, platforms, distribution_mode,
                kickoff_at, target_release_at, archived, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(release.id)
        .bind(release.tenant_id)
        .bind(&release.version)
        .bind(release.release_type.to_string())
        .bind(serde_json::to_value(&release.platforms)?)
        .bind(release.distribution_mode.to_string())
        .bind(release.kickoff_at)
        .bind(release.target_release_at)
        .bind(release.archived)
        .bind(release.created_at)
        .bind(release.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO release_cron_jobs (
                release_id, stage1_status, stage2_status, stage3_status, stage4_status,
                cron_status, pause_type, cron_config, upcoming_regressions,
                auto_transition_to_stage2, auto_transition_to_stage3,
                lock_timeout_seconds, stage_data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(cron_job.release_id)
        .bind(cron_job.stage1_status.to_string())
        .bind(cron_job.stage2_status.to_string())
        .bind(cron_job.stage3_status.to_string())
        .bind(cron_job.stage4_status.to_string())
        .bind(cron_job.cron_status.to_string())
        .bind(cron_job.pause_type.to_string())
        .bind(serde_json::to_value(cron_job.cron_config)?)
        .bind(serde_json::to_value(&cron_job.upcoming_regressions)?)
        .bind(cron_job.auto_transition_to_stage2)
        .bind(cron_job.auto_transition_to_stage3)
        .bind(cron_job.lock_timeout_seconds)
        .bind(serde_json::to_value(&cron_job.stage_data)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_release(&self, release_id: Uuid) -> Result<Option<Release>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, version, release_type, platforms,
                   distribution_mode,
                   kickoff_at, target_release_at, archived, created_at, updated_at
            FROM releases
            WHERE id = $1
            "#,
        )
        .bind(release_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(release_from_row).transpose()
    }

    async fn find_cron_job(&self, release_id: Uuid) -> Result<Option<CronJob>> {
        let query = format!("SELECT {CRON_JOB_COLUMNS} FROM release_cron_jobs WHERE release_id = $1");
        let row = sqlx::query(&query)
            .bind(release_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(cron_job_from_row).transpose()
    }

    async fn schedulable_release_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT c.release_id
            FROM release_cron_jobs c
            INNER JOIN releases r ON r.id = c.release_id
            WHERE c.cron_status = 'RUNNING'
               OR (c.cron_status = 'PENDING' AND r.kickoff_at <= $1)
            ORDER BY r.kickoff_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("release_id").map_err(OrchestrationError::from))
            .collect()
    }

    async fn tasks_for_stage(&self, release_id: Uuid, stage: Stage) -> Result<Vec<ReleaseTask>> {
        let query = format!(
            "SELECT {TASK_COLUMNS} FROM release_tasks WHERE release_id = $1 AND stage = $2 \
             ORDER BY sequence ASC, created_at ASC"
        );
        let rows = sqlx::query(&query)
            .bind(release_id)
            .bind(stage.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<ReleaseTask>> {
        let query = format!("SELECT {TASK_COLUMNS} FROM release_tasks WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn unused_uploads(
        &self,
        release_id: Uuid,
        stage: UploadStage,
    ) -> Result<Vec<ReleaseUpload>> {
        let query = format!(
            "SELECT {UPLOAD_COLUMNS} FROM release_uploads \
             WHERE release_id = $1 AND stage = $2 AND used = false \
             ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&query)
            .bind(release_id)
            .bind(stage.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(upload_from_row).collect()
    }

    async fn uploads_for_release(&self, release_id: Uuid) -> Result<Vec<ReleaseUpload>> {
        let query = format!(
            "SELECT {UPLOAD_COLUMNS} FROM release_uploads WHERE release_id = $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&query)
            .bind(release_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(upload_from_row).collect()
    }

    async fn insert_upload(&self, upload: ReleaseUpload) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO release_uploads (
                id, release_id, stage, platform, artifact_path, used,
                used_by_task_id, used_in_cycle_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(upload.id)
        .bind(upload.release_id)
        .bind(upload.stage.to_string())
        .bind(upload.platform.to_string())
        .bind(&upload.artifact_path)
        .bind(upload.used)
        .bind(upload.used_by_task_id)
        .bind(upload.used_in_cycle_id)
        .bind(upload.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn submissions_for_release(&self, release_id: Uuid) -> Result<Vec<Submission>> {
        let query = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM release_submissions WHERE release_id = $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&query)
            .bind(release_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(submission_from_row).collect()
    }

    #[instrument(skip(self), fields(release_id = %release_id, owner_id = %owner_id))]
    async fn compare_and_set_lock(
        &self,
        release_id: Uuid,
        expected_lock_version: i64,
        owner_id: &str,
        locked_at: DateTime<Utc>,
        timeout_seconds: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE release_cron_jobs
            SET locked_by = $3, locked_at = $4, lock_timeout_seconds = $5,
                lock_version = lock_version + 1
            WHERE release_id = $1 AND lock_version = $2
            "#,
        )
        .bind(release_id)
        .bind(expected_lock_version)
        .bind(owner_id)
        .bind(locked_at)
        .bind(timeout_seconds)
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() == 1;
        debug!(acquired, "Lock compare-and-set completed");
        Ok(acquired)
    }

    #[instrument(skip(self), fields(release_id = %release_id, owner_id = %owner_id))]
    async fn release_lock(&self, release_id: Uuid, owner_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE release_cron_jobs
            SET locked_by = NULL, locked_at = NULL, lock_version = lock_version + 1
            WHERE release_id = $1 AND locked_by = $2
            "#,
        )
        .bind(release_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, changeset), fields(release_id = %changeset.release_id))]
    async fn commit(&self, changeset: ReleaseChangeset) -> Result<()> {
        let release_id = changeset.release_id;
        let mut tx = self.pool.begin().await?;

        // Lock times are written with the application clock, so expiry is judged by it too
        let lock_row = sqlx::query(
            r#"
            SELECT locked_by,
                   COALESCE(locked_at + lock_timeout_seconds * INTERVAL '1 second' > $2, false)
                       AS lock_live
            FROM release_cron_jobs
            WHERE release_id = $1
            FOR UPDATE
            "#,
        )
        .bind(release_id)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| OrchestrationError::not_found("CronJob", release_id))?;

        if let Some(owner) = &changeset.lock_owner {
            let locked_by: Option<String> = lock_row.try_get("locked_by")?;
            let lock_live: bool = lock_row.try_get("lock_live")?;
            if !lock_live || locked_by.as_deref() != Some(owner.as_str()) {
                warn!(
                    owner = %owner,
                    locked_by = ?locked_by,
                    lock_live,
                    "Lock fence rejected changeset"
                );
                return Err(OrchestrationError::concurrent_modification(
                    "CronJob",
                    release_id,
                    format!("lock no longer held by {owner}"),
                ));
            }
        }

        for consumption in &changeset.upload_consumptions {
            let result = sqlx::query(
                r#"
                UPDATE release_uploads
                SET used = true, used_by_task_id = $2, used_in_cycle_id = $3
                WHERE id = $1 AND used = false
                "#,
            )
            .bind(consumption.upload_id)
            .bind(consumption.task_id)
            .bind(consumption.cycle_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() != 1 {
                return Err(OrchestrationError::concurrent_modification(
                    "ReleaseUpload",
                    consumption.upload_id,
                    "upload already used",
                ));
            }
        }

        for transition in &changeset.task_transitions {
            let result = sqlx::query(
                r#"
                UPDATE release_tasks
                SET task_status = $3,
                    failure_reason = COALESCE($4, failure_reason),
                    external_ref = COALESCE($5, external_ref),
                    updated_at = NOW()
                WHERE id = $1 AND task_status = $2
                "#,
            )
            .bind(transition.task_id)
            .bind(transition.from.to_string())
            .bind(transition.to.to_string())
            .bind(&transition.failure_reason)
            .bind(&transition.external_ref)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() != 1 {
                return Err(OrchestrationError::concurrent_modification(
                    "ReleaseTask",
                    transition.task_id,
                    format!("task no longer in status {}", transition.from),
                ));
            }
        }

        for task in &changeset.new_tasks {
            insert_task(&mut tx, task).await?;
        }

        if changeset.archive_release {
            sqlx::query("UPDATE releases SET archived = true, updated_at = NOW() WHERE id = $1")
                .bind(release_id)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(job) = &changeset.cron_job {
            update_cron_job(&mut tx, job).await?;
        }

        tx.commit().await?;
        debug!(
            tasks_created = changeset.new_tasks.len(),
            task_transitions = changeset.task_transitions.len(),
            uploads_consumed = changeset.upload_consumptions.len(),
            "Committed release changeset"
        );
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for PgReleaseStore {
    async fn insert_submission(&self, submission: Submission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO release_submissions (
                id, release_id, platform, status, rollout_percentage, phased_release,
                pause_reason, halt_severity, halt_reason, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(submission.id)
        .bind(submission.release_id)
        .bind(submission.platform.to_string())
        .bind(submission.status.to_string())
        .bind(submission.rollout_percentage)
        .bind(submission.phased_release)
        .bind(&submission.pause_reason)
        .bind(submission.halt_severity.map(|s| s.to_string()))
        .bind(&submission.halt_reason)
        .bind(submission.version)
        .bind(submission.created_at)
        .bind(submission.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_submission(&self, submission_id: Uuid) -> Result<Option<Submission>> {
        let query = format!("SELECT {SUBMISSION_COLUMNS} FROM release_submissions WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(submission_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(submission_from_row).transpose()
    }

    #[instrument(skip(self, submission), fields(submission_id = %submission.id))]
    async fn save_submission(
        &self,
        submission: Submission,
        expected_version: i64,
    ) -> Result<Submission> {
        let query = format!(
            r#"
            UPDATE release_submissions
            SET status = $3, rollout_percentage = $4, pause_reason = $5,
                halt_severity = $6, halt_reason = $7,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {SUBMISSION_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(submission.id)
            .bind(expected_version)
            .bind(submission.status.to_string())
            .bind(submission.rollout_percentage)
            .bind(&submission.pause_reason)
            .bind(submission.halt_severity.map(|s| s.to_string()))
            .bind(&submission.halt_reason)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => submission_from_row(&row),
            None => Err(OrchestrationError::concurrent_modification(
                "Submission",
                submission.id,
                format!("version {expected_version} is no longer current"),
            )),
        }
    }
}
