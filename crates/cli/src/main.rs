//! `docflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    — start the API server and job scheduler.
//! - `migrate`  — run pending database migrations.
//! - `validate` — validate a workflow definition JSON file.

use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use db::models::{EdgeRow, NodeRow};
use engine::{DiskFileStore, JobScheduler, SchedulerConfig};
use nodes::llm::HttpLlmClient;
use nodes::{NodeConfig, NodeType, Services};

#[derive(Parser)]
#[command(
    name = "docflow",
    about = "DAG engine for text-processing workflows",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server and the in-process job scheduler.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
        #[arg(long, env = "DATABASE_URL", default_value = "sqlite://docflow.db?mode=rwc")]
        database_url: String,
        #[arg(long, env = "UPLOAD_DIR", default_value = "uploads")]
        upload_dir: String,
        /// Jobs stuck in Running/Pending longer than this many seconds are
        /// failed with "interrupted" at startup.
        #[arg(long, env = "STALE_JOB_SECONDS", default_value_t = 3600)]
        stale_job_seconds: i64,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL", default_value = "sqlite://docflow.db?mode=rwc")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file and print its schedule.
    Validate {
        /// Path to the workflow JSON file ({"nodes": [...], "edges": [...]}).
        path: std::path::PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            bind,
            database_url,
            upload_dir,
            stale_job_seconds,
        } => {
            info!("Starting API server on {bind}");
            let pool = db::pool::create_pool(&database_url, 10)
                .await
                .expect("failed to connect to database");
            db::pool::run_migrations(&pool)
                .await
                .expect("migration failed");

            let files = Arc::new(DiskFileStore::new(pool.clone(), upload_dir));
            let services = Services {
                llm: Arc::new(HttpLlmClient::from_env()),
                files: files.clone(),
            };

            let scheduler = JobScheduler::new(
                pool.clone(),
                services,
                SchedulerConfig {
                    stale_after: chrono::Duration::seconds(stale_job_seconds),
                    ..SchedulerConfig::default()
                },
            );
            scheduler
                .sweep_stale()
                .await
                .expect("failed to sweep interrupted jobs");

            let state = api::AppState {
                pool,
                scheduler,
                files,
            };
            api::serve(&bind, state).await.expect("server error");
        }

        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .expect("failed to connect to database");
            db::pool::run_migrations(&pool)
                .await
                .expect("migration failed");
            info!("Migrations applied successfully");
        }

        Command::Validate { path } => {
            let content = std::fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("cannot read file {}: {e}", path.display()));
            let definition: Definition = serde_json::from_str(&content)
                .unwrap_or_else(|e| panic!("invalid JSON: {e}"));

            match validate_definition(&definition) {
                Ok(batches) => {
                    println!("Workflow is valid. Schedule:");
                    for (i, batch) in batches.iter().enumerate() {
                        let ids: Vec<String> = batch.iter().map(Uuid::to_string).collect();
                        println!("  batch {i}: {}", ids.join(", "));
                    }
                }
                Err(e) => {
                    eprintln!("Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// `validate` subcommand input format
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Definition {
    nodes: Vec<DefinitionNode>,
    #[serde(default)]
    edges: Vec<DefinitionEdge>,
}

#[derive(Deserialize)]
struct DefinitionNode {
    id: Uuid,
    node_type: String,
    config: serde_json::Value,
    #[serde(default)]
    order_index: i64,
}

#[derive(Deserialize)]
struct DefinitionEdge {
    from_node_id: Uuid,
    to_node_id: Uuid,
    #[serde(default = "default_from_port")]
    from_port: String,
    #[serde(default = "default_to_port")]
    to_port: String,
}

fn default_from_port() -> String {
    "output".to_string()
}

fn default_to_port() -> String {
    "input".to_string()
}

fn validate_definition(definition: &Definition) -> Result<Vec<Vec<Uuid>>, String> {
    let now = Utc::now();

    for node in &definition.nodes {
        let node_type: NodeType = node.node_type.parse()?;
        NodeConfig::parse(node_type, &node.config)
            .map_err(|e| format!("node {}: {e}", node.id))?;
    }

    let nodes: Vec<NodeRow> = definition
        .nodes
        .iter()
        .map(|n| NodeRow {
            id: n.id,
            workflow_id: Uuid::nil(),
            node_type: n.node_type.clone(),
            config: n.config.clone(),
            order_index: n.order_index,
            created_at: now,
        })
        .collect();
    let edges: Vec<EdgeRow> = definition
        .edges
        .iter()
        .map(|e| EdgeRow {
            id: Uuid::new_v4(),
            workflow_id: Uuid::nil(),
            from_node_id: e.from_node_id,
            from_port: e.from_port.clone(),
            to_node_id: e.to_node_id,
            to_port: e.to_port.clone(),
            condition: None,
            created_at: now,
        })
        .collect();

    engine::graph::validate_dag(&nodes, &edges).map_err(|e| e.to_string())?;
    engine::graph::topological_batches(&nodes, &edges).map_err(|e| e.to_string())
}
