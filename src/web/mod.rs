//! Web module - the browser front end
//!
//! - `GET /`, `GET /index`: upload form
//! - `POST /_upload`: save the credentials file, run a trial, show the log
//! - `GET /_kill`: run cleanup.sh for the last trial of this session, then
//!   forget the session
//! - `GET /health`: liveness check
//!
//! The web module does NOT:
//! - Run any external program itself (see `trial`)
//! - Persist sessions; they live in memory until the server stops

mod handlers;
mod pages;
mod session;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tracing::info;

use crate::config::Config;
use crate::runner::Runner;
use crate::trial::TrialRunner;
use session::SessionStore;

pub struct AppState {
    pub trials: TrialRunner,
    pub upload_folder: PathBuf,
    pub max_upload_bytes: usize,
    pub sessions: SessionStore,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        trials: TrialRunner,
        upload_folder: PathBuf,
        max_upload_bytes: usize,
        max_sessions: usize,
    ) -> Self {
        Self {
            trials,
            upload_folder,
            max_upload_bytes,
            sessions: SessionStore::new(max_sessions),
        }
    }
}

pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.max_upload_bytes;

    Router::new()
        .route("/", get(handlers::index))
        .route("/index", get(handlers::index))
        .route(
            "/_upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/_kill", get(handlers::kill))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Start the web server and run until Ctrl+C
pub async fn serve(config: &Config, runner: Arc<dyn Runner>) -> Result<()> {
    let trials = TrialRunner::new(runner, config.trial.clone());
    let state = Arc::new(AppState::new(
        trials,
        config.upload_folder.clone(),
        config.max_upload_bytes,
        config.max_sessions,
    ));
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Auto-Checker listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}
