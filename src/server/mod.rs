//! HTTP surface over the job orchestrator and the graph store.
//!
//! Jobs are submitted with `POST /indexing*` and answered with `202 {jobId}`;
//! progress is read by polling `/indexing/:id/status` or by following the
//! server-sent events on `/indexing/:id/events`.

pub mod error;
pub mod routes;

use axum::extract::FromRef;
use axum::routing::{delete, get, post};
use axum::Router;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::jobs::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Index requests may name directories on this host
    pub allow_local_paths: bool,
}

impl FromRef<AppState> for Orchestrator {
    fn from_ref(state: &AppState) -> Self {
        state.orchestrator.clone()
    }
}

pub fn router(orchestrator: Orchestrator, config: &ServerConfig) -> Router {
    if config.allow_local_paths {
        warn!("Local repository paths are accepted over HTTP");
    }
    let state = AppState {
        orchestrator,
        allow_local_paths: config.allow_local_paths,
    };
    Router::new()
        .route("/indexing", post(routes::start_index))
        .route("/indexing/incremental", post(routes::start_incremental))
        .route("/indexing/force", post(routes::start_force))
        .route("/indexing/jobs", get(routes::list_jobs))
        .route("/indexing/frameworks", get(routes::list_frameworks))
        .route("/indexing/meta/:repo_id", get(routes::repo_meta))
        .route("/indexing/:id", delete(routes::cancel_job))
        .route("/indexing/:id/status", get(routes::job_status))
        .route("/indexing/:id/events", get(routes::job_events))
        .route("/graph/repos", get(routes::list_repos))
        .route("/graph/:repo_id", get(routes::repo_graph))
        .route("/metrics", get(routes::metrics))
        .with_state(state)
}

/// Serve until ctrl-c
pub async fn serve(app: Router, host: &str, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
            }
        })
        .await?;
    Ok(())
}
