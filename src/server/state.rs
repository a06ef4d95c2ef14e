use axum::extract::FromRef;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;
use crate::agents::AgentDirectory;
use crate::audit::AuditLogger;
use crate::gateway::registry::ModuleRegistry;
use crate::gateway::session::SessionStore;
use crate::store::DataStore;

pub type GuardedDataStore = Arc<dyn DataStore>;
pub type GuardedAgentDirectory = Arc<dyn AgentDirectory>;
pub type GuardedAuditLogger = Arc<AuditLogger>;
pub type GuardedSessionStore = Arc<SessionStore>;
pub type GuardedModules = Arc<HashMap<String, Arc<ModuleRegistry>>>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub data_store: GuardedDataStore,
    pub agent_directory: GuardedAgentDirectory,
    pub audit: GuardedAuditLogger,
    pub sessions: GuardedSessionStore,
    pub modules: GuardedModules,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedDataStore {
    fn from_ref(input: &ServerState) -> Self {
        input.data_store.clone()
    }
}

impl FromRef<ServerState> for GuardedAgentDirectory {
    fn from_ref(input: &ServerState) -> Self {
        input.agent_directory.clone()
    }
}

impl FromRef<ServerState> for GuardedAuditLogger {
    fn from_ref(input: &ServerState) -> Self {
        input.audit.clone()
    }
}

impl FromRef<ServerState> for GuardedSessionStore {
    fn from_ref(input: &ServerState) -> Self {
        input.sessions.clone()
    }
}

impl FromRef<ServerState> for GuardedModules {
    fn from_ref(input: &ServerState) -> Self {
        input.modules.clone()
    }
}
