//! Agent Tool Gateway
//!
//! A JSON-RPC 2.0 endpoint that lets autonomous AI agents discover and
//! invoke a bounded set of data operations against a domain's records, under
//! per-agent, per-tool permission control, with mandatory audit logging.
//!
//! ## Architecture
//!
//! - Transport: one JSON-RPC message per `POST /v1/agent/{module}` body,
//!   session correlation via the `Mcp-Session-Id` header
//! - Discovery (`tools/list`, `resources/list`, `prompts/list`): unrestricted,
//!   served from the static per-module capability catalog
//! - Invocation (`tools/call`): fail-closed permission gate against the
//!   calling agent's permission record, one audit entry per attempt
//!
//! One generic engine serves every module; modules plug in as a
//! [`registry::ModuleRegistry`] built in [`crate::modules`].

pub mod context;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod session;

pub use handler::gateway_handler;
pub use protocol::{GatewayError, RpcRequest, RpcResponse};
pub use registry::ModuleRegistry;
pub use session::SessionStore;
