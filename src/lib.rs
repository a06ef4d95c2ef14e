//! CRM Agent Gateway Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod agents;
pub mod audit;
pub mod config;
pub mod gateway;
pub mod modules;
pub mod server;
pub mod store;

// Re-export commonly used types for convenience
pub use agents::{Agent, AgentDirectory, ModuleAccess};
pub use audit::{AuditEntry, AuditLogger, AuditOutcome, AuditSink};
pub use gateway::{GatewayError, ModuleRegistry, RpcRequest, RpcResponse, SessionStore};
pub use server::{build_router, build_state, run_server, RequestsLoggingLevel, ServerConfig};
pub use store::{DataStore, Filter, Row, SqliteGatewayStore, StoreError};
