//! HTTP surface of the archiver.
//!
//! ## Endpoints
//!
//! - `GET /jobs` - list jobs (`limit`, `offset`, `status`)
//! - `POST /jobs` - record a job for a new registration and start archiving it
//! - `GET /jobs/{id}` - job with per-target status, errors and stats
//! - `POST /jobs/{id}/start` - queue archival of an existing job
//! - `POST /jobs/{id}/rerun` - operator re-run of a finished job
//! - `POST /jobs/{id}/targets/{addon}/callback` - finalize a copy accepted with 202

mod handlers;

use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::core::Orchestrator;

/// Shared state for the web server
#[derive(Clone)]
pub struct WebState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/jobs", get(handlers::list_jobs).post(handlers::create_job))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/start", post(handlers::start_job))
        .route("/jobs/{id}/rerun", post(handlers::rerun_job))
        .route(
            "/jobs/{id}/targets/{addon}/callback",
            post(handlers::archive_callback),
        )
        .with_state(state)
}

pub struct WebServer {
    bind_addr: SocketAddr,
    state: WebState,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebServer {
    pub fn new(orchestrator: Arc<Orchestrator>, bind_addr: SocketAddr) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            bind_addr,
            state: WebState { orchestrator },
            shutdown_tx,
        }
    }

    /// Start the web server. Runs until shutdown() is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "Archiver API listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
