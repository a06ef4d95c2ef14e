use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use axum::{
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use super::state::ServerState;
use super::{log_requests, ServerConfig};
use crate::agents::AgentDirectory;
use crate::audit::{AuditLogger, AuditSink};
use crate::gateway::gateway_handler;
use crate::gateway::registry::ModuleRegistry;
use crate::gateway::session::SessionStore;
use crate::store::DataStore;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: String,
    pub modules: Vec<String>,
    pub active_sessions: usize,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let mut modules: Vec<String> = state.modules.keys().cloned().collect();
    modules.sort();

    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        modules,
        active_sessions: state.sessions.count(),
    };
    Json(stats)
}

/// Assemble the server state shared by every request handler.
pub fn build_state(
    config: ServerConfig,
    data_store: Arc<dyn DataStore>,
    agent_directory: Arc<dyn AgentDirectory>,
    audit_sink: Arc<dyn AuditSink>,
    modules: HashMap<String, Arc<ModuleRegistry>>,
) -> ServerState {
    ServerState {
        config,
        start_time: Instant::now(),
        data_store,
        agent_directory,
        audit: Arc::new(AuditLogger::new(audit_sink)),
        sessions: Arc::new(SessionStore::new()),
        modules: Arc::new(modules),
    }
}

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/v1/agent/{module}", post(gateway_handler))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

pub async fn run_server(state: ServerState) -> Result<()> {
    let port = state.config.port;
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Agent gateway listening on port {}", port);
    axum::serve(listener, router).await?;
    Ok(())
}
