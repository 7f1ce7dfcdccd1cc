//! Job and job-step persistence, including the admission queue.
//!
//! Admission counts must be transactionally consistent with job inserts
//! (the scheduler derives no process-local counters), so [`admit_job`] and
//! [`promote_next_job`] run count + mutation inside a single transaction.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{JobRow, JobStatus, JobStepRow};
use crate::{DbError, DbPool};

const JOB_COLUMNS: &str =
    "id, workflow_id, status, started_at, finished_at, final_output, error_message";

async fn count_by_status<'e, E>(
    executor: E,
    workflow_id: Uuid,
    status: JobStatus,
) -> Result<i64, DbError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let count = sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM jobs WHERE workflow_id = ? AND status = ?"#,
    )
    .bind(workflow_id)
    .bind(status.as_str())
    .fetch_one(executor)
    .await?;

    Ok(count)
}

/// Number of jobs currently `Running` for a workflow.
pub async fn running_count(pool: &DbPool, workflow_id: Uuid) -> Result<i64, DbError> {
    count_by_status(pool, workflow_id, JobStatus::Running).await
}

/// Number of jobs currently `Pending` for a workflow.
pub async fn pending_count(pool: &DbPool, workflow_id: Uuid) -> Result<i64, DbError> {
    count_by_status(pool, workflow_id, JobStatus::Pending).await
}

/// Admit a new job for `workflow_id` under the per-workflow caps.
///
/// Inside one transaction: if fewer than `max_running` jobs are `Running`
/// the job is inserted directly as `Running`; otherwise, if fewer than
/// `max_pending` jobs are queued, it is inserted as `Pending`.  Returns
/// `Ok(None)` when both caps are reached (queue full) — nothing is inserted.
pub async fn admit_job(
    pool: &DbPool,
    workflow_id: Uuid,
    max_running: i64,
    max_pending: i64,
) -> Result<Option<JobRow>, DbError> {
    let mut tx = pool.begin().await?;

    let running = count_by_status(&mut *tx, workflow_id, JobStatus::Running).await?;
    let status = if running < max_running {
        JobStatus::Running
    } else {
        let pending = count_by_status(&mut *tx, workflow_id, JobStatus::Pending).await?;
        if pending < max_pending {
            JobStatus::Pending
        } else {
            tx.rollback().await?;
            return Ok(None);
        }
    };

    let row = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        INSERT INTO jobs (id, workflow_id, status, started_at)
        VALUES (?, ?, ?, ?)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(workflow_id)
    .bind(status.as_str())
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(row))
}

/// Promote the oldest `Pending` job of a workflow to `Running`, if the
/// running cap allows it.  Returns the promoted row, or `None` when the
/// cap is reached or the queue is empty.
pub async fn promote_next_job(
    pool: &DbPool,
    workflow_id: Uuid,
    max_running: i64,
) -> Result<Option<JobRow>, DbError> {
    let mut tx = pool.begin().await?;

    let running = count_by_status(&mut *tx, workflow_id, JobStatus::Running).await?;
    if running >= max_running {
        tx.rollback().await?;
        return Ok(None);
    }

    let next = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM jobs
        WHERE workflow_id = ? AND status = 'Pending'
        ORDER BY started_at ASC, id ASC
        LIMIT 1
        "#
    ))
    .bind(workflow_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(job) = next else {
        tx.rollback().await?;
        return Ok(None);
    };

    let row = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        UPDATE jobs SET status = 'Running', started_at = ?
        WHERE id = ?
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(Utc::now())
    .bind(job.id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(row))
}

/// Fetch a single job by its primary key.
pub async fn get_job(pool: &DbPool, id: Uuid) -> Result<JobRow, DbError> {
    sqlx::query_as::<_, JobRow>(&format!(r#"SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"#))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// All jobs of a workflow, newest first.
pub async fn list_jobs(pool: &DbPool, workflow_id: Uuid) -> Result<Vec<JobRow>, DbError> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM jobs
        WHERE workflow_id = ?
        ORDER BY started_at DESC, id DESC
        "#
    ))
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Mark a job `Running` and stamp `started_at`.
pub async fn mark_job_running(pool: &DbPool, id: Uuid) -> Result<(), DbError> {
    sqlx::query(r#"UPDATE jobs SET status = 'Running', started_at = ? WHERE id = ?"#)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Move a job into a terminal state and stamp `finished_at`.
pub async fn finish_job(
    pool: &DbPool,
    id: Uuid,
    status: JobStatus,
    final_output: Option<&str>,
    error_message: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = ?, finished_at = ?, final_output = ?, error_message = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(Utc::now())
    .bind(final_output)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert a `Running` step row at dispatch time, capturing the node's
/// config snapshot and (truncated) input.
pub async fn insert_job_step(
    pool: &DbPool,
    job_id: Uuid,
    node_id: Uuid,
    node_type: &str,
    input_text: &str,
    config_snapshot: &serde_json::Value,
) -> Result<JobStepRow, DbError> {
    let row = sqlx::query_as::<_, JobStepRow>(
        r#"
        INSERT INTO job_steps
            (id, job_id, node_id, node_type, status, started_at, input_text, config_snapshot)
        VALUES (?, ?, ?, ?, 'Running', ?, ?, ?)
        RETURNING id, job_id, node_id, node_type, status, started_at, finished_at,
                  input_text, output_text, error_message, config_snapshot
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(job_id)
    .bind(node_id)
    .bind(node_type)
    .bind(Utc::now())
    .bind(input_text)
    .bind(config_snapshot)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Finalize a step with its terminal status, output or error, and timing.
pub async fn finish_job_step(
    pool: &DbPool,
    step_id: Uuid,
    status: JobStatus,
    output_text: Option<&str>,
    error_message: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE job_steps
        SET status = ?, finished_at = ?, output_text = ?, error_message = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(Utc::now())
    .bind(output_text)
    .bind(error_message)
    .bind(step_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// A job together with its step audit trail.
pub async fn get_job_with_steps(
    pool: &DbPool,
    job_id: Uuid,
) -> Result<(JobRow, Vec<JobStepRow>), DbError> {
    let job = get_job(pool, job_id).await?;
    let steps = list_job_steps(pool, job_id).await?;
    Ok((job, steps))
}

/// All steps of a job in dispatch order.
pub async fn list_job_steps(pool: &DbPool, job_id: Uuid) -> Result<Vec<JobStepRow>, DbError> {
    let rows = sqlx::query_as::<_, JobStepRow>(
        r#"
        SELECT id, job_id, node_id, node_type, status, started_at, finished_at,
               input_text, output_text, error_message, config_snapshot
        FROM job_steps
        WHERE job_id = ?
        ORDER BY started_at ASC, id ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Sweep jobs left `Running` or `Pending` since before `cutoff` to `Failed`.
///
/// Used on coordinator restart: in-flight jobs are never resumed.
pub async fn sweep_stale_jobs(pool: &DbPool, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'Failed', finished_at = ?, error_message = 'interrupted'
        WHERE status IN ('Running', 'Pending') AND started_at < ?
        "#,
    )
    .bind(Utc::now())
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
