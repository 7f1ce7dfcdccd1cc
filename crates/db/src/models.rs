//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Graph and execution logic lives in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow row.  Nodes and edges live in their own tables.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// nodes
// ---------------------------------------------------------------------------

/// A persisted workflow node.
///
/// `node_type` is stored as TEXT; the typed schema check happens in the
/// `nodes` crate.  `order_index` is the tiebreaker for the legacy linear
/// schedule used when a workflow has no edges.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub node_type: String,
    pub config: serde_json::Value,
    pub order_index: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// edges
// ---------------------------------------------------------------------------

/// A directed dependency between two nodes of the same workflow.
///
/// `condition` is reserved for conditional routing and ignored by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EdgeRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub from_node_id: Uuid,
    pub from_port: String,
    pub to_node_id: Uuid,
    pub to_port: String,
    pub condition: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// jobs / job_steps
// ---------------------------------------------------------------------------

/// Status shared by jobs and job steps.
///
/// Transitions are monotone: `Pending → Running → {Succeeded, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Running" => Ok(Self::Running),
            "Succeeded" => Ok(Self::Succeeded),
            "Failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One execution attempt of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub final_output: Option<String>,
    pub error_message: Option<String>,
}

/// One node's execution record within a job.
///
/// `node_type` and `config_snapshot` are denormalized so the audit trail
/// stays reproducible even if the node is later edited or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobStepRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub node_id: Option<Uuid>,
    pub node_type: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub input_text: Option<String>,
    pub output_text: Option<String>,
    pub error_message: Option<String>,
    pub config_snapshot: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// uploaded_files
// ---------------------------------------------------------------------------

/// Metadata for an uploaded PDF.  The blob itself lives on disk at `path`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UploadedFileRow {
    pub id: Uuid,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub path: String,
    pub created_at: DateTime<Utc>,
}
