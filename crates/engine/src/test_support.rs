//! Shared fixtures for engine tests: an in-memory database, stubbed
//! executor services, and workflow-building helpers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use db::models::{JobRow, NodeRow};
use db::repository::{jobs, workflows};
use db::DbPool;
use nodes::mock::{MockFileStore, MockLlm};
use nodes::Services;

pub async fn memory_pool() -> DbPool {
    let pool = db::pool::create_pool("sqlite::memory:", 1)
        .await
        .expect("in-memory pool");
    db::pool::run_migrations(&pool).await.expect("migrations");
    pool
}

pub fn mock_services() -> Services {
    Services {
        llm: Arc::new(MockLlm::returning("")),
        files: Arc::new(MockFileStore::new()),
    }
}

pub async fn formatter_node(
    pool: &DbPool,
    workflow_id: Uuid,
    rules: &[&str],
    order_index: i64,
) -> NodeRow {
    workflows::create_node(
        pool,
        workflow_id,
        "formatter",
        &json!({ "rules": rules }),
        order_index,
    )
    .await
    .expect("create node")
}

pub async fn connect(pool: &DbPool, workflow_id: Uuid, from: Uuid, to: Uuid) {
    workflows::create_edge(pool, workflow_id, from, "output", to, "input", None)
        .await
        .expect("create edge");
}

pub async fn admitted_job(pool: &DbPool, workflow_id: Uuid) -> JobRow {
    jobs::admit_job(pool, workflow_id, 2, 20)
        .await
        .expect("admit")
        .expect("capacity available")
}

pub async fn wait_for_terminal(pool: &DbPool, job_id: Uuid) -> JobRow {
    for _ in 0..500 {
        let job = jobs::get_job(pool, job_id).await.expect("get job");
        if job.status == "Succeeded" || job.status == "Failed" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not reach a terminal state");
}
