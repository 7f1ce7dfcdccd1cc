//! Request handlers, one module per resource.

pub mod edges;
pub mod files;
pub mod runs;
pub mod workflows;

use uuid::Uuid;

use db::models::WorkflowRow;
use db::{DbError, DbPool};

use crate::error::ApiError;

/// Parse a path id.  Malformed ids map to 404: an id that cannot exist is
/// indistinguishable from one that does not.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("{what} not found")))
}

/// Resolve a workflow path segment or fail with 404.
pub(crate) async fn load_workflow(pool: &DbPool, raw_id: &str) -> Result<WorkflowRow, ApiError> {
    let id = parse_id(raw_id, "Workflow")?;
    db::repository::workflows::get_workflow(pool, id)
        .await
        .map_err(|e| match e {
            DbError::NotFound => ApiError::NotFound("Workflow not found".to_string()),
            other => other.into(),
        })
}
