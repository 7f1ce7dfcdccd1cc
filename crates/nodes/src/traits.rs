//! The `NodeExecutor` trait and the capability bundle handed to executors.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::NodeType;
use crate::error::NodeError;
use crate::llm::LlmClient;

/// Capabilities every executor may consume.  Executors hold no state of
/// their own; everything they need arrives through this bundle.
#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn LlmClient>,
    pub files: Arc<dyn FileStore>,
}

/// An uploaded file's metadata together with its bytes.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub bytes: Vec<u8>,
}

/// Read-only access to uploaded file blobs.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Load metadata and content for `file_id`.
    async fn load(&self, file_id: Uuid) -> Result<StoredFile, NodeError>;
}

/// The core node trait.
///
/// `config_snapshot` is the raw config captured at dispatch time; each
/// implementation re-validates it against its own schema before acting.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        config_snapshot: &serde_json::Value,
        input_text: &str,
        services: &Services,
    ) -> Result<String, NodeError>;
}

/// Resolve the executor for a node type.
pub fn executor_for(node_type: NodeType) -> &'static dyn NodeExecutor {
    match node_type {
        NodeType::ExtractText => &crate::extract::ExtractTextNode,
        NodeType::GenerativeAi => &crate::generative::GenerativeAiNode,
        NodeType::Formatter => &crate::formatter::FormatterNode,
        NodeType::Agent => &crate::agent::AgentNode,
    }
}

/// Execute one node: resolve its executor and run it against the snapshot.
pub async fn execute(
    node_type: NodeType,
    config_snapshot: &serde_json::Value,
    input_text: &str,
    services: &Services,
) -> Result<String, NodeError> {
    executor_for(node_type)
        .execute(config_snapshot, input_text, services)
        .await
}
