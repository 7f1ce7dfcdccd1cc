//! Graph service — DAG validation and topological batching.
//!
//! Validation runs before an edge insert is persisted or a job starts;
//! batching drives the run coordinator.  Everything here is O(V + E) and
//! deterministic: batches, predecessors, and sinks are always returned in
//! ascending node-id order so input aggregation and final-output assembly
//! never depend on completion order.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use uuid::Uuid;

use db::models::{EdgeRow, NodeRow};

use crate::EngineError;

/// Validate edges against the node set.
///
/// # Errors
/// - [`EngineError::UnknownNodeReference`] if an edge references a missing node.
/// - [`EngineError::DuplicateEdge`] if two edges share endpoints and ports.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic; the error
///   carries a witness path.
pub fn validate_dag(nodes: &[NodeRow], edges: &[EdgeRow]) -> Result<(), EngineError> {
    let node_set: HashSet<Uuid> = nodes.iter().map(|n| n.id).collect();

    for edge in edges {
        if !node_set.contains(&edge.from_node_id) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.from_node_id,
                side: "from",
            });
        }
        if !node_set.contains(&edge.to_node_id) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.to_node_id,
                side: "to",
            });
        }
    }

    let mut seen: HashSet<(Uuid, &str, Uuid, &str)> = HashSet::new();
    for edge in edges {
        let key = (
            edge.from_node_id,
            edge.from_port.as_str(),
            edge.to_node_id,
            edge.to_port.as_str(),
        );
        if !seen.insert(key) {
            return Err(EngineError::DuplicateEdge {
                from_node_id: edge.from_node_id,
                to_node_id: edge.to_node_id,
            });
        }
    }

    // Acyclicity falls out of batching: Kahn's algorithm releases every
    // node exactly when the graph has no cycle.
    kahn_batches(nodes, edges).map(|_| ())
}

/// Ordered list of batches; each batch is a set of node ids whose upstream
/// dependencies all appear in strictly earlier batches, sorted by node id.
///
/// A workflow with zero edges falls back to the legacy linear schedule:
/// one node per batch, ordered by `order_index` then creation time.
pub fn topological_batches(
    nodes: &[NodeRow],
    edges: &[EdgeRow],
) -> Result<Vec<Vec<Uuid>>, EngineError> {
    if edges.is_empty() {
        return Ok(linear_schedule(nodes));
    }
    kahn_batches(nodes, edges)
}

/// Direct upstream dependencies of a node, ascending and deduplicated.
pub fn predecessors(node_id: Uuid, edges: &[EdgeRow]) -> Vec<Uuid> {
    let mut preds: Vec<Uuid> = edges
        .iter()
        .filter(|e| e.to_node_id == node_id)
        .map(|e| e.from_node_id)
        .collect();
    preds.sort_unstable();
    preds.dedup();
    preds
}

/// Nodes with no outgoing edges, ascending.  Their outputs form the job's
/// `final_output`.
pub fn sink_nodes(nodes: &[NodeRow], edges: &[EdgeRow]) -> Vec<Uuid> {
    let sources: HashSet<Uuid> = edges.iter().map(|e| e.from_node_id).collect();
    let mut sinks: Vec<Uuid> = nodes
        .iter()
        .map(|n| n.id)
        .filter(|id| !sources.contains(id))
        .collect();
    sinks.sort_unstable();
    sinks
}

fn linear_schedule(nodes: &[NodeRow]) -> Vec<Vec<Uuid>> {
    let mut ordered: Vec<&NodeRow> = nodes.iter().collect();
    ordered.sort_by(|a, b| {
        (a.order_index, a.created_at, a.id).cmp(&(b.order_index, b.created_at, b.id))
    });
    ordered.into_iter().map(|n| vec![n.id]).collect()
}

fn kahn_batches(nodes: &[NodeRow], edges: &[EdgeRow]) -> Result<Vec<Vec<Uuid>>, EngineError> {
    let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    let mut in_degree: HashMap<Uuid, usize> = HashMap::new();

    for node in nodes {
        adjacency.entry(node.id).or_default();
        in_degree.entry(node.id).or_insert(0);
    }
    for edge in edges {
        adjacency
            .entry(edge.from_node_id)
            .or_default()
            .push(edge.to_node_id);
        *in_degree.entry(edge.to_node_id).or_insert(0) += 1;
    }

    let mut ready: VecDeque<Uuid> = {
        let mut roots: Vec<Uuid> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        roots.sort_unstable();
        roots.into()
    };

    let mut batches: Vec<Vec<Uuid>> = Vec::new();
    let mut released = 0usize;

    while !ready.is_empty() {
        let mut batch: Vec<Uuid> = ready.drain(..).collect();
        batch.sort_unstable();

        let mut next: Vec<Uuid> = Vec::new();
        for node_id in &batch {
            released += 1;
            if let Some(successors) = adjacency.get(node_id) {
                for successor in successors {
                    let degree = in_degree.entry(*successor).or_insert(0);
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*successor);
                    }
                }
            }
        }

        batches.push(batch);
        ready = next.into();
    }

    // Any node left unreleased sits on or below a cycle.
    if released != nodes.len() {
        let remaining: BTreeSet<Uuid> = in_degree
            .iter()
            .filter(|(_, &d)| d > 0)
            .map(|(&id, _)| id)
            .collect();
        return Err(EngineError::CycleDetected {
            witness: cycle_witness(&remaining, edges),
        });
    }

    Ok(batches)
}

/// Walk predecessors among the unreleased nodes until one repeats; every
/// unreleased node has at least one unreleased predecessor, so the walk
/// always closes a cycle.
fn cycle_witness(remaining: &BTreeSet<Uuid>, edges: &[EdgeRow]) -> String {
    let mut reverse: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for edge in edges {
        reverse
            .entry(edge.to_node_id)
            .or_default()
            .push(edge.from_node_id);
    }

    let Some(&start) = remaining.iter().next() else {
        return "no witness available".to_string();
    };

    let mut path: Vec<Uuid> = Vec::new();
    let mut seen: HashMap<Uuid, usize> = HashMap::new();
    let mut current = start;

    loop {
        if let Some(&first) = seen.get(&current) {
            // path[first..] holds the cycle in predecessor order; reverse it
            // to print along edge direction.
            let mut cycle: Vec<Uuid> = path[first..].to_vec();
            cycle.reverse();
            let closing = *cycle.first().unwrap_or(&current);
            cycle.push(closing);
            return cycle
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>()
                .join(" -> ");
        }

        seen.insert(current, path.len());
        path.push(current);

        match reverse
            .get(&current)
            .and_then(|preds| preds.iter().find(|p| remaining.contains(p)))
        {
            Some(&pred) => current = pred,
            None => return format!("involving node {current}"),
        }
    }
}
