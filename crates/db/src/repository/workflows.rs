//! Workflow, node, and edge persistence.

use chrono::Utc;
use uuid::Uuid;

use crate::models::{EdgeRow, NodeRow, WorkflowRow};
use crate::{DbError, DbPool};

/// Insert a new workflow.
pub async fn create_workflow(pool: &DbPool, name: &str) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"
        INSERT INTO workflows (id, name, created_at)
        VALUES (?, ?, ?)
        RETURNING id, name, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &DbPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    sqlx::query_as::<_, WorkflowRow>(
        r#"SELECT id, name, created_at FROM workflows WHERE id = ?"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Insert a node into a workflow.
///
/// The caller is responsible for having validated `config` against the
/// node type's schema.
pub async fn create_node(
    pool: &DbPool,
    workflow_id: Uuid,
    node_type: &str,
    config: &serde_json::Value,
    order_index: i64,
) -> Result<NodeRow, DbError> {
    let row = sqlx::query_as::<_, NodeRow>(
        r#"
        INSERT INTO nodes (id, workflow_id, node_type, config, order_index, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id, workflow_id, node_type, config, order_index, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(workflow_id)
    .bind(node_type)
    .bind(config)
    .bind(order_index)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// All nodes of a workflow, ordered by `order_index` then creation time.
pub async fn list_nodes(pool: &DbPool, workflow_id: Uuid) -> Result<Vec<NodeRow>, DbError> {
    let rows = sqlx::query_as::<_, NodeRow>(
        r#"
        SELECT id, workflow_id, node_type, config, order_index, created_at
        FROM nodes
        WHERE workflow_id = ?
        ORDER BY order_index ASC, created_at ASC
        "#,
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Number of nodes currently in a workflow (used to assign `order_index`).
pub async fn node_count(pool: &DbPool, workflow_id: Uuid) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM nodes WHERE workflow_id = ?"#,
    )
    .bind(workflow_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Insert an edge between two nodes of a workflow.
///
/// Graph validation (endpoints, duplicates, acyclicity) happens in the
/// engine crate *before* this insert, so a rejected edge never touches
/// the table.
pub async fn create_edge(
    pool: &DbPool,
    workflow_id: Uuid,
    from_node_id: Uuid,
    from_port: &str,
    to_node_id: Uuid,
    to_port: &str,
    condition: Option<&str>,
) -> Result<EdgeRow, DbError> {
    let row = sqlx::query_as::<_, EdgeRow>(
        r#"
        INSERT INTO edges (id, workflow_id, from_node_id, from_port, to_node_id, to_port, condition, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id, workflow_id, from_node_id, from_port, to_node_id, to_port, condition, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(workflow_id)
    .bind(from_node_id)
    .bind(from_port)
    .bind(to_node_id)
    .bind(to_port)
    .bind(condition)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// All edges of a workflow.
pub async fn list_edges(pool: &DbPool, workflow_id: Uuid) -> Result<Vec<EdgeRow>, DbError> {
    let rows = sqlx::query_as::<_, EdgeRow>(
        r#"
        SELECT id, workflow_id, from_node_id, from_port, to_node_id, to_port, condition, created_at
        FROM edges
        WHERE workflow_id = ?
        ORDER BY created_at ASC
        "#,
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
