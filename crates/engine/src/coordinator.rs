//! Run coordinator — executes one admitted job.
//!
//! Drives the graph service's batches in order, fans each batch out to the
//! node executors concurrently, aggregates predecessor outputs for joins,
//! and persists a step record per dispatched node.  A failed step fails the
//! job fast: in-batch peers run to completion and are persisted, later
//! batches never start.

use std::collections::HashMap;
use std::str::FromStr;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use db::models::{EdgeRow, JobStatus, NodeRow};
use db::repository::{jobs, workflows};
use db::DbPool;
use nodes::{NodeError, NodeType, Services};

use crate::{graph, EngineError};

/// Stored step texts are truncated to this many bytes (at a char boundary).
const MAX_STORED_TEXT: usize = 64 * 1024;

/// Separator between aggregated predecessor outputs and between sink
/// outputs in `final_output`.
const JOIN_SEPARATOR: &str = "\n\n";

/// A node's identity and config, frozen at the instant the run started.
/// Later edits to the workflow are invisible to an in-flight job.
struct NodeSnapshot {
    id: Uuid,
    node_type: String,
    config: serde_json::Value,
}

/// Stateless orchestrator that runs a single job.
pub struct RunCoordinator {
    pool: DbPool,
    services: Services,
}

impl RunCoordinator {
    pub fn new(pool: DbPool, services: Services) -> Self {
        Self { pool, services }
    }

    /// Run the job to a terminal state.
    ///
    /// `seed_input` is handed to nodes without predecessors (the empty
    /// string for API-submitted runs).  Step and job outcomes are persisted
    /// as the run progresses; the returned error only reports persistence
    /// failures that prevented the run from being recorded at all.
    #[instrument(skip(self, seed_input), fields(job_id = %job_id))]
    pub async fn run(&self, job_id: Uuid, seed_input: &str) -> Result<(), EngineError> {
        let job = jobs::get_job(&self.pool, job_id).await?;
        jobs::mark_job_running(&self.pool, job_id).await?;

        let node_rows = workflows::list_nodes(&self.pool, job.workflow_id).await?;
        let edges = workflows::list_edges(&self.pool, job.workflow_id).await?;
        let snapshots = snapshot_nodes(&node_rows);

        let batches = match graph::topological_batches(&node_rows, &edges) {
            Ok(batches) => batches,
            Err(e) => {
                warn!("job failed during graph validation: {e}");
                jobs::finish_job(&self.pool, job_id, JobStatus::Failed, None, Some(&e.to_string()))
                    .await?;
                return Ok(());
            }
        };

        info!(
            batches = batches.len(),
            nodes = node_rows.len(),
            "graph validated, executing"
        );

        // Legacy linear mode (no edges): each node consumes its
        // predecessor-by-position's output and the last node's output is
        // the job's final output.
        let linear = edges.is_empty();

        let mut outputs: HashMap<Uuid, String> = HashMap::new();
        let mut carried = seed_input.to_string();

        for batch in &batches {
            let dispatched = batch.iter().filter_map(|node_id| {
                let Some(snapshot) = snapshots.get(node_id) else {
                    return None;
                };
                let input = if linear {
                    carried.clone()
                } else {
                    resolve_input(*node_id, &edges, &outputs, seed_input)
                };
                Some(self.execute_step(job_id, snapshot, input))
            });

            let results = join_all(dispatched).await;

            // Persisting happens inside execute_step, so every dispatched
            // peer is recorded before the job is failed.
            let mut failure: Option<(Uuid, String)> = None;
            for (node_id, result) in results {
                match result {
                    Ok(output) => {
                        if linear {
                            carried = output.clone();
                        }
                        outputs.insert(node_id, output);
                    }
                    Err(message) => {
                        if failure.is_none() {
                            failure = Some((node_id, message));
                        }
                    }
                }
            }

            if let Some((node_id, message)) = failure {
                let error_message = format!("{node_id}: {message}");
                warn!("job failed: {error_message}");
                jobs::finish_job(
                    &self.pool,
                    job_id,
                    JobStatus::Failed,
                    None,
                    Some(&error_message),
                )
                .await?;
                return Ok(());
            }
        }

        let final_output = if linear {
            carried
        } else {
            let sinks = graph::sink_nodes(&node_rows, &edges);
            let parts: Vec<&str> = sinks
                .iter()
                .filter_map(|id| outputs.get(id).map(String::as_str))
                .collect();
            parts.join(JOIN_SEPARATOR)
        };

        jobs::finish_job(
            &self.pool,
            job_id,
            JobStatus::Succeeded,
            Some(&final_output),
            None,
        )
        .await?;
        info!("job succeeded");
        Ok(())
    }

    /// Execute one node: record a `Running` step at dispatch, run the
    /// executor, and finalize the step with its outcome.
    async fn execute_step(
        &self,
        job_id: Uuid,
        snapshot: &NodeSnapshot,
        input_text: String,
    ) -> (Uuid, Result<String, String>) {
        let step = match jobs::insert_job_step(
            &self.pool,
            job_id,
            snapshot.id,
            &snapshot.node_type,
            truncate_for_storage(&input_text),
            &snapshot.config,
        )
        .await
        {
            Ok(step) => step,
            Err(e) => return (snapshot.id, Err(format!("failed to record step: {e}"))),
        };

        let result = self.run_node(snapshot, &input_text).await;

        let finalize = match &result {
            Ok(output) => {
                jobs::finish_job_step(
                    &self.pool,
                    step.id,
                    JobStatus::Succeeded,
                    Some(truncate_for_storage(output)),
                    None,
                )
                .await
            }
            Err(e) => {
                jobs::finish_job_step(
                    &self.pool,
                    step.id,
                    JobStatus::Failed,
                    None,
                    Some(&e.to_string()),
                )
                .await
            }
        };
        if let Err(e) = finalize {
            warn!(node_id = %snapshot.id, "failed to finalize step record: {e}");
        }

        (snapshot.id, result.map_err(|e| e.to_string()))
    }

    async fn run_node(&self, snapshot: &NodeSnapshot, input_text: &str) -> Result<String, NodeError> {
        let node_type =
            NodeType::from_str(&snapshot.node_type).map_err(NodeError::Validation)?;
        if !node_type.is_deterministic() {
            debug!(node_id = %snapshot.id, node_type = %node_type, "dispatching non-deterministic node");
        }
        nodes::execute(node_type, &snapshot.config, input_text, &self.services).await
    }
}

fn snapshot_nodes(node_rows: &[NodeRow]) -> HashMap<Uuid, NodeSnapshot> {
    node_rows
        .iter()
        .map(|n| {
            (
                n.id,
                NodeSnapshot {
                    id: n.id,
                    node_type: n.node_type.clone(),
                    config: n.config.clone(),
                },
            )
        })
        .collect()
}

/// AND-join input resolution: predecessor outputs concatenated in node-id
/// order; nodes without predecessors receive the seed text.
fn resolve_input(
    node_id: Uuid,
    edges: &[EdgeRow],
    outputs: &HashMap<Uuid, String>,
    seed_input: &str,
) -> String {
    let preds = graph::predecessors(node_id, edges);
    if preds.is_empty() {
        return seed_input.to_string();
    }
    let parts: Vec<&str> = preds
        .iter()
        .filter_map(|p| outputs.get(p).map(String::as_str))
        .filter(|s| !s.is_empty())
        .collect();
    parts.join(JOIN_SEPARATOR)
}

fn truncate_for_storage(text: &str) -> &str {
    if text.len() <= MAX_STORED_TEXT {
        return text;
    }
    let mut end = MAX_STORED_TEXT;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(MAX_STORED_TEXT); // 2 bytes per char
        let stored = truncate_for_storage(&text);
        assert!(stored.len() <= MAX_STORED_TEXT);
        assert!(text.starts_with(stored));

        let short = "hello";
        assert_eq!(truncate_for_storage(short), short);
    }

    #[test]
    fn join_resolution_skips_empty_outputs_and_sorts_by_id() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let c = Uuid::from_u128(3);
        let edges = vec![test_edge(b, c), test_edge(a, c)];

        let mut outputs = HashMap::new();
        outputs.insert(a, "from a".to_string());
        outputs.insert(b, String::new());

        assert_eq!(resolve_input(c, &edges, &outputs, "seed"), "from a");

        outputs.insert(b, "from b".to_string());
        assert_eq!(resolve_input(c, &edges, &outputs, "seed"), "from a\n\nfrom b");

        // No predecessors: the seed flows in.
        assert_eq!(resolve_input(a, &edges, &outputs, "seed"), "seed");
    }

    fn test_edge(from: Uuid, to: Uuid) -> EdgeRow {
        EdgeRow {
            id: Uuid::new_v4(),
            workflow_id: Uuid::nil(),
            from_node_id: from,
            from_port: "output".into(),
            to_node_id: to,
            to_port: "input".into(),
            condition: None,
            created_at: chrono::Utc::now(),
        }
    }
}
