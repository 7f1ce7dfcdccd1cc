use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use db::models::EdgeRow;
use db::repository::workflows as wf_repo;
use engine::graph;

use crate::error::ApiError;
use crate::handlers::load_workflow;
use crate::AppState;

const DEFAULT_FROM_PORT: &str = "output";
const DEFAULT_TO_PORT: &str = "input";

#[derive(Deserialize)]
pub struct AddEdgeRequest {
    pub from_node_id: Uuid,
    pub to_node_id: Uuid,
    #[serde(default)]
    pub from_port: Option<String>,
    #[serde(default)]
    pub to_port: Option<String>,
    /// Reserved for conditional routing; stored but ignored by the engine.
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Serialize)]
pub struct AddEdgeResponse {
    pub message: String,
    pub edge_id: Uuid,
}

pub async fn create(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<AddEdgeRequest>,
) -> Result<Json<AddEdgeResponse>, ApiError> {
    let workflow = load_workflow(&state.pool, &id).await?;

    let nodes = wf_repo::list_nodes(&state.pool, workflow.id).await?;
    let mut edges = wf_repo::list_edges(&state.pool, workflow.id).await?;

    let from_port = payload
        .from_port
        .unwrap_or_else(|| DEFAULT_FROM_PORT.to_string());
    let to_port = payload.to_port.unwrap_or_else(|| DEFAULT_TO_PORT.to_string());

    // Validate against the edge set as it would look after the insert; a
    // rejected edge never reaches the table.
    edges.push(EdgeRow {
        id: Uuid::new_v4(),
        workflow_id: workflow.id,
        from_node_id: payload.from_node_id,
        from_port: from_port.clone(),
        to_node_id: payload.to_node_id,
        to_port: to_port.clone(),
        condition: payload.condition.clone(),
        created_at: Utc::now(),
    });
    graph::validate_dag(&nodes, &edges)?;

    let edge = wf_repo::create_edge(
        &state.pool,
        workflow.id,
        payload.from_node_id,
        &from_port,
        payload.to_node_id,
        &to_port,
        payload.condition.as_deref(),
    )
    .await?;

    Ok(Json(AddEdgeResponse {
        message: "Edge added".to_string(),
        edge_id: edge.id,
    }))
}

#[derive(Serialize)]
pub struct EdgesResponse {
    pub edges: Vec<EdgeRow>,
}

pub async fn list(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<EdgesResponse>, ApiError> {
    let workflow = load_workflow(&state.pool, &id).await?;
    let edges = wf_repo::list_edges(&state.pool, workflow.id).await?;
    Ok(Json(EdgesResponse { edges }))
}
