//! End-to-end coordinator tests: real repository (in-memory SQLite), real
//! executors, stubbed LLM and file store.

use std::collections::HashMap;

use serde_json::json;
use uuid::Uuid;

use db::models::JobStepRow;
use db::repository::{jobs, workflows};
use db::DbPool;

use crate::coordinator::RunCoordinator;
use crate::test_support::{
    admitted_job, connect, formatter_node, memory_pool, mock_services,
};

async fn steps_by_node(pool: &DbPool, job_id: Uuid) -> HashMap<Uuid, JobStepRow> {
    jobs::list_job_steps(pool, job_id)
        .await
        .expect("list steps")
        .into_iter()
        .filter_map(|s| s.node_id.map(|id| (id, s)))
        .collect()
}

#[tokio::test]
async fn linear_chain_runs_in_order_and_lowercases_the_seed() {
    let pool = memory_pool().await;
    let wf = workflows::create_workflow(&pool, "linear").await.unwrap();

    let a = formatter_node(&pool, wf.id, &["uppercase"], 0).await;
    let b = formatter_node(&pool, wf.id, &["lowercase"], 1).await;
    connect(&pool, wf.id, a.id, b.id).await;

    let job = admitted_job(&pool, wf.id).await;
    RunCoordinator::new(pool.clone(), mock_services())
        .run(job.id, "Hello")
        .await
        .unwrap();

    let job = jobs::get_job(&pool, job.id).await.unwrap();
    assert_eq!(job.status, "Succeeded");
    assert_eq!(job.final_output.as_deref(), Some("hello"));
    assert!(job.finished_at.is_some());

    let steps = steps_by_node(&pool, job.id).await;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[&a.id].status, "Succeeded");
    assert_eq!(steps[&a.id].input_text.as_deref(), Some("Hello"));
    assert_eq!(steps[&a.id].output_text.as_deref(), Some("HELLO"));
    assert_eq!(steps[&b.id].input_text.as_deref(), Some("HELLO"));
    assert_eq!(steps[&b.id].output_text.as_deref(), Some("hello"));
}

#[tokio::test]
async fn diamond_joins_predecessor_outputs_in_node_id_order() {
    let pool = memory_pool().await;
    let wf = workflows::create_workflow(&pool, "diamond").await.unwrap();

    let a = formatter_node(&pool, wf.id, &["uppercase"], 0).await;
    let b = formatter_node(&pool, wf.id, &["uppercase"], 1).await;
    let c = formatter_node(&pool, wf.id, &["lowercase"], 2).await;
    let d = formatter_node(&pool, wf.id, &["uppercase"], 3).await;
    connect(&pool, wf.id, a.id, b.id).await;
    connect(&pool, wf.id, a.id, c.id).await;
    connect(&pool, wf.id, b.id, d.id).await;
    connect(&pool, wf.id, c.id, d.id).await;

    let job = admitted_job(&pool, wf.id).await;
    RunCoordinator::new(pool.clone(), mock_services())
        .run(job.id, "Hi")
        .await
        .unwrap();

    let job = jobs::get_job(&pool, job.id).await.unwrap();
    assert_eq!(job.status, "Succeeded");
    // Both middle outputs uppercase to the same text after the join.
    assert_eq!(job.final_output.as_deref(), Some("HI\n\nHI"));

    // D's input is the AND-join of B and C in ascending node-id order,
    // not completion order.
    let steps = steps_by_node(&pool, job.id).await;
    let expected = if b.id < c.id { "HI\n\nhi" } else { "hi\n\nHI" };
    assert_eq!(steps[&d.id].input_text.as_deref(), Some(expected));

    // Strict happens-before across batches: A finishes before B and C
    // start, which finish before D starts.
    let a_finished = steps[&a.id].finished_at.expect("a finished");
    for mid in [&b.id, &c.id] {
        assert!(a_finished <= steps[mid].started_at);
        assert!(steps[mid].finished_at.expect("mid finished") <= steps[&d.id].started_at);
    }
}

#[tokio::test]
async fn failing_peer_fails_fast_but_dispatched_siblings_are_persisted() {
    let pool = memory_pool().await;
    let wf = workflows::create_workflow(&pool, "fail-fast").await.unwrap();

    // Batch 0 is {a, bad}; c depends on a and must never run.
    let a = formatter_node(&pool, wf.id, &["uppercase"], 0).await;
    let bad = workflows::create_node(&pool, wf.id, "formatter", &json!({ "rules": ["explode"] }), 1)
        .await
        .unwrap();
    let c = formatter_node(&pool, wf.id, &["lowercase"], 2).await;
    connect(&pool, wf.id, a.id, c.id).await;

    let job = admitted_job(&pool, wf.id).await;
    RunCoordinator::new(pool.clone(), mock_services())
        .run(job.id, "boom")
        .await
        .unwrap();

    let job_row = jobs::get_job(&pool, job.id).await.unwrap();
    assert_eq!(job_row.status, "Failed");
    let error = job_row.error_message.expect("failure is attributed");
    assert!(error.starts_with(&bad.id.to_string()));

    let steps = steps_by_node(&pool, job.id).await;
    assert_eq!(steps.len(), 2, "the downstream node never dispatched");
    assert_eq!(steps[&a.id].status, "Succeeded");
    assert_eq!(steps[&bad.id].status, "Failed");
    assert!(steps[&bad.id].error_message.is_some());
    assert!(!steps.contains_key(&c.id));
}

#[tokio::test]
async fn config_snapshot_is_captured_at_dispatch() {
    let pool = memory_pool().await;
    let wf = workflows::create_workflow(&pool, "snapshot").await.unwrap();
    let node = formatter_node(&pool, wf.id, &["uppercase"], 0).await;

    let job = admitted_job(&pool, wf.id).await;
    RunCoordinator::new(pool.clone(), mock_services())
        .run(job.id, "x")
        .await
        .unwrap();

    let steps = steps_by_node(&pool, job.id).await;
    assert_eq!(
        steps[&node.id].config_snapshot,
        Some(json!({ "rules": ["uppercase"] }))
    );
    assert_eq!(steps[&node.id].node_type, "formatter");
}

#[tokio::test]
async fn zero_edge_workflows_run_linearly_and_chain_outputs() {
    let pool = memory_pool().await;
    let wf = workflows::create_workflow(&pool, "legacy").await.unwrap();

    // Insert out of order; order_index decides the schedule.
    let last = formatter_node(&pool, wf.id, &["uppercase"], 2).await;
    let first = formatter_node(&pool, wf.id, &["uppercase"], 0).await;
    let middle = formatter_node(&pool, wf.id, &["lowercase"], 1).await;

    let job = admitted_job(&pool, wf.id).await;
    RunCoordinator::new(pool.clone(), mock_services())
        .run(job.id, "AbC")
        .await
        .unwrap();

    let job_row = jobs::get_job(&pool, job.id).await.unwrap();
    assert_eq!(job_row.status, "Succeeded");
    // Chained: uppercase → lowercase → uppercase; the last node's output
    // is the final output.
    assert_eq!(job_row.final_output.as_deref(), Some("ABC"));

    let steps = steps_by_node(&pool, job.id).await;
    assert_eq!(steps[&first.id].input_text.as_deref(), Some("AbC"));
    assert_eq!(steps[&middle.id].input_text.as_deref(), Some("ABC"));
    assert_eq!(steps[&last.id].input_text.as_deref(), Some("abc"));
}

#[tokio::test]
async fn deterministic_workflows_reproduce_identical_output() {
    let pool = memory_pool().await;
    let wf = workflows::create_workflow(&pool, "repeat").await.unwrap();

    let a = formatter_node(&pool, wf.id, &["half_to_full"], 0).await;
    let b = formatter_node(&pool, wf.id, &["uppercase"], 1).await;
    let c = formatter_node(&pool, wf.id, &["full_to_half"], 2).await;
    connect(&pool, wf.id, a.id, b.id).await;
    connect(&pool, wf.id, a.id, c.id).await;

    let coordinator = RunCoordinator::new(pool.clone(), mock_services());
    let mut outputs = Vec::new();
    for _ in 0..2 {
        let job = admitted_job(&pool, wf.id).await;
        coordinator.run(job.id, "mix 42").await.unwrap();
        let job = jobs::get_job(&pool, job.id).await.unwrap();
        assert_eq!(job.status, "Succeeded");
        outputs.push(job.final_output.expect("succeeded jobs carry output"));
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[tokio::test]
async fn workflow_without_nodes_succeeds_with_empty_output() {
    let pool = memory_pool().await;
    let wf = workflows::create_workflow(&pool, "empty").await.unwrap();

    let job = admitted_job(&pool, wf.id).await;
    RunCoordinator::new(pool.clone(), mock_services())
        .run(job.id, "")
        .await
        .unwrap();

    let job = jobs::get_job(&pool, job.id).await.unwrap();
    assert_eq!(job.status, "Succeeded");
    assert_eq!(job.final_output.as_deref(), Some(""));
}
