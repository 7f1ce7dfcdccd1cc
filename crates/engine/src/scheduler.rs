//! Job scheduler — per-workflow admission caps and FIFO promotion.
//!
//! Counters live only in the repository: admission reads and writes happen
//! in one transaction there, so concurrent submitters and coordinator
//! workers can never drift.

use chrono::{Duration, Utc};
use tracing::{error, info};
use uuid::Uuid;

use db::models::{JobRow, JobStatus};
use db::repository::{jobs, workflows};
use db::{DbError, DbPool};
use nodes::Services;

use crate::{EngineError, RunCoordinator};

/// Admission policy knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Jobs allowed in `Running` per workflow.
    pub max_running_per_workflow: i64,
    /// Jobs allowed in `Pending` per workflow (FIFO queue).
    pub max_pending_per_workflow: i64,
    /// Jobs older than this left in `Running`/`Pending` are swept to
    /// `Failed` on startup.
    pub stale_after: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_running_per_workflow: 2,
            max_pending_per_workflow: 20,
            stale_after: Duration::hours(1),
        }
    }
}

/// Admits, launches, and promotes jobs for all workflows.
///
/// Cloning is cheap (pool handle plus shared services); spawned workers
/// carry their own clone.
#[derive(Clone)]
pub struct JobScheduler {
    pool: DbPool,
    services: Services,
    config: SchedulerConfig,
}

impl JobScheduler {
    pub fn new(pool: DbPool, services: Services, config: SchedulerConfig) -> Self {
        Self {
            pool,
            services,
            config,
        }
    }

    /// Submit one run of `workflow_id`.
    ///
    /// Admits the job under the per-workflow caps: below the running cap it
    /// starts immediately on a background worker; below the pending cap it
    /// queues FIFO; otherwise the submit is refused with
    /// [`EngineError::QueueFull`].
    pub async fn submit(&self, workflow_id: Uuid) -> Result<JobRow, EngineError> {
        workflows::get_workflow(&self.pool, workflow_id)
            .await
            .map_err(|e| match e {
                DbError::NotFound => EngineError::NotFound(format!("workflow {workflow_id}")),
                other => EngineError::Database(other),
            })?;

        let admitted = jobs::admit_job(
            &self.pool,
            workflow_id,
            self.config.max_running_per_workflow,
            self.config.max_pending_per_workflow,
        )
        .await?;

        let job = admitted.ok_or(EngineError::QueueFull { workflow_id })?;

        if job.status == JobStatus::Running.as_str() {
            info!(job_id = %job.id, %workflow_id, "job admitted, starting");
            self.spawn_run(job.clone());
        } else {
            info!(job_id = %job.id, %workflow_id, "job queued");
        }

        Ok(job)
    }

    /// Sweep jobs stranded by an earlier coordinator crash.  In-flight jobs
    /// are never resumed; anything `Running` or `Pending` since before the
    /// staleness threshold is failed with `error_message = "interrupted"`.
    pub async fn sweep_stale(&self) -> Result<u64, EngineError> {
        let cutoff = Utc::now() - self.config.stale_after;
        let swept = jobs::sweep_stale_jobs(&self.pool, cutoff).await?;
        if swept > 0 {
            info!(swept, "swept interrupted jobs to Failed");
        }
        Ok(swept)
    }

    /// Launch the coordinator for an admitted job on a background worker,
    /// followed by a promotion pass for its workflow.
    fn spawn_run(&self, job: JobRow) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let coordinator =
                RunCoordinator::new(scheduler.pool.clone(), scheduler.services.clone());
            if let Err(e) = coordinator.run(job.id, "").await {
                error!(job_id = %job.id, "job run aborted: {e}");
            }
            scheduler.promote(job.workflow_id).await;
        });
    }

    /// Promote the oldest pending job of a workflow, if capacity allows.
    async fn promote(&self, workflow_id: Uuid) {
        match jobs::promote_next_job(
            &self.pool,
            workflow_id,
            self.config.max_running_per_workflow,
        )
        .await
        {
            Ok(Some(job)) => {
                info!(job_id = %job.id, %workflow_id, "promoted pending job");
                self.spawn_run(job);
            }
            Ok(None) => {}
            Err(e) => error!(%workflow_id, "promotion pass failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_pool, mock_services, wait_for_terminal};
    use serde_json::json;

    async fn workflow_with_formatter(pool: &DbPool) -> Uuid {
        let wf = workflows::create_workflow(pool, "caps").await.unwrap();
        workflows::create_node(pool, wf.id, "formatter", &json!({ "rules": [] }), 0)
            .await
            .unwrap();
        wf.id
    }

    #[tokio::test]
    async fn admission_enforces_running_and_pending_caps() {
        let pool = memory_pool().await;
        let workflow_id = workflow_with_formatter(&pool).await;
        let config = SchedulerConfig::default();

        // Fill the running cap.
        for _ in 0..config.max_running_per_workflow {
            let job = jobs::admit_job(&pool, workflow_id, 2, 20).await.unwrap().unwrap();
            assert_eq!(job.status, "Running");
        }

        // Fill the pending queue.
        for _ in 0..config.max_pending_per_workflow {
            let job = jobs::admit_job(&pool, workflow_id, 2, 20).await.unwrap().unwrap();
            assert_eq!(job.status, "Pending");
        }

        assert_eq!(jobs::running_count(&pool, workflow_id).await.unwrap(), 2);
        assert_eq!(jobs::pending_count(&pool, workflow_id).await.unwrap(), 20);

        // The 23rd submit is refused and inserts nothing.
        let refused = jobs::admit_job(&pool, workflow_id, 2, 20).await.unwrap();
        assert!(refused.is_none());
        assert_eq!(jobs::pending_count(&pool, workflow_id).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn promotion_is_fifo_and_respects_the_running_cap() {
        let pool = memory_pool().await;
        let workflow_id = workflow_with_formatter(&pool).await;

        let first = jobs::admit_job(&pool, workflow_id, 2, 20).await.unwrap().unwrap();
        let _second = jobs::admit_job(&pool, workflow_id, 2, 20).await.unwrap().unwrap();
        let queued_a = jobs::admit_job(&pool, workflow_id, 2, 20).await.unwrap().unwrap();
        let queued_b = jobs::admit_job(&pool, workflow_id, 2, 20).await.unwrap().unwrap();
        assert_eq!(queued_a.status, "Pending");

        // At capacity: nothing to promote.
        assert!(jobs::promote_next_job(&pool, workflow_id, 2).await.unwrap().is_none());

        // A slot frees up: the oldest pending job is promoted.
        jobs::finish_job(&pool, first.id, JobStatus::Succeeded, Some(""), None)
            .await
            .unwrap();
        let promoted = jobs::promote_next_job(&pool, workflow_id, 2).await.unwrap().unwrap();
        assert_eq!(promoted.id, queued_a.id);
        assert_eq!(promoted.status, "Running");

        // Back at capacity; queued_b stays pending.
        assert!(jobs::promote_next_job(&pool, workflow_id, 2).await.unwrap().is_none());
        let still_pending = jobs::get_job(&pool, queued_b.id).await.unwrap();
        assert_eq!(still_pending.status, "Pending");
    }

    #[tokio::test]
    async fn sweep_fails_interrupted_jobs_only() {
        let pool = memory_pool().await;
        let workflow_id = workflow_with_formatter(&pool).await;

        let running = jobs::admit_job(&pool, workflow_id, 1, 20).await.unwrap().unwrap();
        let pending = jobs::admit_job(&pool, workflow_id, 1, 20).await.unwrap().unwrap();
        let done = jobs::admit_job(&pool, workflow_id, 2, 20).await.unwrap().unwrap();
        jobs::finish_job(&pool, done.id, JobStatus::Succeeded, Some("out"), None)
            .await
            .unwrap();

        // Everything older than a cutoff in the future counts as stale.
        let cutoff = Utc::now() + Duration::seconds(5);
        let swept = jobs::sweep_stale_jobs(&pool, cutoff).await.unwrap();
        assert_eq!(swept, 2);

        for id in [running.id, pending.id] {
            let job = jobs::get_job(&pool, id).await.unwrap();
            assert_eq!(job.status, "Failed");
            assert_eq!(job.error_message.as_deref(), Some("interrupted"));
            assert!(job.finished_at.is_some());
        }
        let done = jobs::get_job(&pool, done.id).await.unwrap();
        assert_eq!(done.status, "Succeeded");
    }

    #[tokio::test]
    async fn submit_runs_a_job_to_completion() {
        let pool = memory_pool().await;
        let workflow_id = workflow_with_formatter(&pool).await;

        let scheduler =
            JobScheduler::new(pool.clone(), mock_services(), SchedulerConfig::default());

        let job = scheduler.submit(workflow_id).await.unwrap();
        assert_eq!(job.status, "Running");

        let finished = wait_for_terminal(&pool, job.id).await;
        assert_eq!(finished.status, "Succeeded");
        assert_eq!(finished.final_output.as_deref(), Some(""));
        assert!(finished.finished_at.is_some());
    }

    #[tokio::test]
    async fn submit_for_unknown_workflow_is_not_found() {
        let pool = memory_pool().await;
        let scheduler =
            JobScheduler::new(pool.clone(), mock_services(), SchedulerConfig::default());

        let err = scheduler.submit(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
