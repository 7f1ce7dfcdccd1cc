//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the engine (graph validation + scheduling).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference { node_id: Uuid, side: &'static str },

    /// Two edges share both endpoints and both ports.
    #[error("duplicate edge from '{from_node_id}' to '{to_node_id}' with identical ports")]
    DuplicateEdge {
        from_node_id: Uuid,
        to_node_id: Uuid,
    },

    /// The edge set is not acyclic; `witness` names one offending path.
    #[error("workflow graph contains a cycle: {witness}")]
    CycleDetected { witness: String },

    // ------ Scheduling errors ------

    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Admission refused: both the running and pending caps are reached.
    #[error("job queue full for workflow {workflow_id}")]
    QueueFull { workflow_id: Uuid },

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
