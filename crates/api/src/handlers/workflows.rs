use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use db::repository::workflows as wf_repo;
use nodes::{NodeConfig, NodeType};

use crate::error::ApiError;
use crate::handlers::load_workflow;
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
}

#[derive(Serialize)]
pub struct CreateWorkflowResponse {
    pub id: Uuid,
    pub name: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<CreateWorkflowResponse>, ApiError> {
    let row = wf_repo::create_workflow(&state.pool, &payload.name).await?;
    Ok(Json(CreateWorkflowResponse {
        id: row.id,
        name: row.name,
    }))
}

#[derive(Serialize)]
pub struct NodeView {
    pub id: Uuid,
    pub node_type: String,
    pub config: Value,
    pub order_index: i64,
}

#[derive(Serialize)]
pub struct WorkflowDetailResponse {
    pub id: Uuid,
    pub name: String,
    pub nodes: Vec<NodeView>,
}

pub async fn get(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowDetailResponse>, ApiError> {
    let workflow = load_workflow(&state.pool, &id).await?;
    let nodes = wf_repo::list_nodes(&state.pool, workflow.id).await?;

    Ok(Json(WorkflowDetailResponse {
        id: workflow.id,
        name: workflow.name,
        nodes: nodes
            .into_iter()
            .map(|n| NodeView {
                id: n.id,
                node_type: n.node_type,
                config: n.config,
                order_index: n.order_index,
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
pub struct AddNodeRequest {
    pub node_type: String,
    pub config: Value,
}

#[derive(Serialize)]
pub struct AddNodeResponse {
    pub message: String,
    pub node_id: Uuid,
}

pub async fn add_node(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<AddNodeRequest>,
) -> Result<Json<AddNodeResponse>, ApiError> {
    let workflow = load_workflow(&state.pool, &id).await?;

    let node_type: NodeType = payload.node_type.parse().map_err(ApiError::Validation)?;
    // Schema check up front; the snapshot is validated again at dispatch.
    NodeConfig::parse(node_type, &payload.config)?;

    let order_index = wf_repo::node_count(&state.pool, workflow.id).await?;
    let node = wf_repo::create_node(
        &state.pool,
        workflow.id,
        node_type.as_str(),
        &payload.config,
        order_index,
    )
    .await?;

    Ok(Json(AddNodeResponse {
        message: "Node added".to_string(),
        node_id: node.id,
    }))
}
