//! HTTP surface: liveness, bridge counters, and a read-only mount of the
//! photo directory. All endpoints are unauthenticated, as the deployments
//! front this with their own reverse proxy.

use crate::config::ApiConfig;
use crate::dispatcher::{BridgeStats, StatsSnapshot};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub stats: Arc<BridgeStats>,
    pub service_name: String,
}

/// Create the API router
pub fn create_router(state: AppState, photos_dir: PathBuf) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(bridge_status))
        .nest_service("/fotos", ServeDir::new(photos_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness endpoint
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name,
    }))
}

/// Bridge counters for operators and test harnesses
async fn bridge_status(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

/// Start the API server
pub async fn start_api_server(
    state: AppState,
    photos_dir: PathBuf,
    config: &ApiConfig,
) -> Result<()> {
    let router = create_router(state, photos_dir);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting bridge API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind API address")?;

    axum::serve(listener, router).await.context("API server error")?;

    Ok(())
}
