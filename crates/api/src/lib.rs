//! `api` crate — HTTP REST surface.
//!
//! Exposes:
//!   POST   /workflows
//!   GET    /workflows/:id
//!   POST   /workflows/:id/nodes
//!   GET    /workflows/:id/edges
//!   POST   /workflows/:id/edges
//!   POST   /workflows/:id/run
//!   GET    /workflows/:id/runs
//!   GET    /jobs/:job_id
//!   POST   /files

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use db::DbPool;
use engine::{DiskFileStore, JobScheduler};
use nodes::extract::MAX_PDF_BYTES;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub scheduler: JobScheduler,
    pub files: Arc<DiskFileStore>,
}

/// Build the router.  Split from [`serve`] so tests can drive it directly.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/workflows", post(handlers::workflows::create))
        .route("/workflows/:id", get(handlers::workflows::get))
        .route("/workflows/:id/nodes", post(handlers::workflows::add_node))
        .route(
            "/workflows/:id/edges",
            get(handlers::edges::list).post(handlers::edges::create),
        )
        .route("/workflows/:id/run", post(handlers::runs::submit))
        .route("/workflows/:id/runs", get(handlers::runs::list))
        .route("/jobs/:job_id", get(handlers::runs::get_job))
        .route("/files", post(handlers::files::upload))
        // Leave headroom over the PDF cap so the 10 MiB policy error is
        // reported by validation, not by the body limit.
        .layer(DefaultBodyLimit::max(MAX_PDF_BYTES + 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);
    axum::serve(listener, app(state)).await
}
