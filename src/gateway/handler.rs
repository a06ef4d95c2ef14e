//! Gateway HTTP handler and method dispatcher.
//!
//! One JSON-RPC message per POST body. A body that cannot be decoded into an
//! envelope fails at the transport level (HTTP 400 with a parse-error
//! envelope); every other outcome — unknown method, permission denial,
//! validation failure, store failure — returns HTTP 200 with either `result`
//! or `error` populated. Nothing escapes the dispatcher.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::{debug, warn};

use super::context::ToolContext;
use super::protocol::{
    methods, GatewayError, InitializeParams, InitializeResult, PromptsListResult,
    ResourcesListResult, ResourcesReadParams, ResourcesReadResult, RpcRequest, RpcResponse,
    ServerCapabilities, ServerInfo, ToolCallResult, ToolsCallParams, ToolsListResult,
    GATEWAY_PROTOCOL_VERSION, SESSION_ID_HEADER,
};
use super::registry::ModuleRegistry;
use crate::audit::{AuditEntry, AuditOutcome};
use crate::server::state::ServerState;

/// POST /v1/agent/{module}
pub async fn gateway_handler(
    State(state): State<ServerState>,
    Path(module): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let header_session_id = headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok());
    let session_id = state.sessions.resolve(header_session_id);

    let registry = match state.modules.get(&module) {
        Some(registry) => registry.clone(),
        None => {
            return respond(
                StatusCode::NOT_FOUND,
                &session_id,
                RpcResponse::error(
                    None,
                    GatewayError::NotFound(format!("Unknown module: {}", module)),
                ),
            );
        }
    };

    // Transport-level failures: the body never becomes an envelope.
    let raw: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            return respond(
                StatusCode::BAD_REQUEST,
                &session_id,
                RpcResponse::error(None, GatewayError::ParseError(e.to_string())),
            );
        }
    };
    let request: RpcRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => {
            return respond(
                StatusCode::BAD_REQUEST,
                &session_id,
                RpcResponse::error(None, GatewayError::InvalidRequest(e.to_string())),
            );
        }
    };

    let response = dispatch_request(&state, &registry, &session_id, request).await;
    respond(StatusCode::OK, &session_id, response)
}

fn respond(status: StatusCode, session_id: &str, response: RpcResponse) -> Response {
    let mut http_response = (status, Json(response)).into_response();
    if let Ok(value) = HeaderValue::from_str(session_id) {
        http_response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    http_response
}

/// Route one decoded request. Always produces exactly one response; all
/// failures from this point down are protocol-level error objects.
pub async fn dispatch_request(
    state: &ServerState,
    registry: &Arc<ModuleRegistry>,
    session_id: &str,
    request: RpcRequest,
) -> RpcResponse {
    let request_id = request.id.clone();
    debug!(
        "[{}] {} (session {})",
        registry.server_name(),
        request.method,
        session_id
    );

    let result = match request.method.as_str() {
        methods::INITIALIZE => handle_initialize(state, registry, session_id, &request),
        methods::TOOLS_LIST => handle_tools_list(registry),
        methods::TOOLS_CALL => handle_tools_call(state, registry, &request).await,
        methods::RESOURCES_LIST => handle_resources_list(registry),
        methods::RESOURCES_READ => handle_resources_read(state, registry, &request).await,
        methods::PROMPTS_LIST => handle_prompts_list(registry),
        other => Err(GatewayError::MethodNotFound(other.to_string())),
    };

    match result {
        Ok(value) => RpcResponse::success(request_id, value),
        Err(error) => RpcResponse::error(request_id, error),
    }
}

fn handle_initialize(
    state: &ServerState,
    registry: &ModuleRegistry,
    session_id: &str,
    request: &RpcRequest,
) -> Result<Value, GatewayError> {
    let params: InitializeParams = request
        .params
        .clone()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| GatewayError::InvalidParams(e.to_string()))?
        .unwrap_or_default();

    state.sessions.initialize(session_id, params.agent_id);

    let result = InitializeResult {
        protocol_version: GATEWAY_PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities {
            tools: serde_json::json!({}),
            resources: serde_json::json!({}),
            prompts: serde_json::json!({}),
        },
        server_info: ServerInfo {
            name: registry.server_name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    };

    serde_json::to_value(result).map_err(|e| GatewayError::InternalError(e.to_string()))
}

fn handle_tools_list(registry: &ModuleRegistry) -> Result<Value, GatewayError> {
    let result = ToolsListResult {
        tools: registry.tool_definitions(),
    };
    serde_json::to_value(result).map_err(|e| GatewayError::InternalError(e.to_string()))
}

fn handle_resources_list(registry: &ModuleRegistry) -> Result<Value, GatewayError> {
    let result = ResourcesListResult {
        resources: registry.resource_definitions(),
    };
    serde_json::to_value(result).map_err(|e| GatewayError::InternalError(e.to_string()))
}

fn handle_prompts_list(registry: &ModuleRegistry) -> Result<Value, GatewayError> {
    let result = PromptsListResult {
        prompts: registry.prompt_definitions(),
    };
    serde_json::to_value(result).map_err(|e| GatewayError::InternalError(e.to_string()))
}

async fn handle_resources_read(
    state: &ServerState,
    registry: &ModuleRegistry,
    request: &RpcRequest,
) -> Result<Value, GatewayError> {
    let params: ResourcesReadParams = request
        .params
        .clone()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| GatewayError::InvalidParams(e.to_string()))?
        .ok_or_else(|| GatewayError::InvalidParams("Missing params".to_string()))?;

    let ctx = ToolContext::new(state.data_store.clone());

    // Unknown URIs fall back to the module's unfiltered scan rather than
    // erroring.
    let contents = match registry.find_resource(&params.uri) {
        Some(resource) => (resource.handler)(ctx, params.uri).await?,
        None => match registry.fallback_resource() {
            Some(handler) => {
                debug!(
                    "[{}] resources/read fallback for uri {}",
                    registry.server_name(),
                    params.uri
                );
                handler(ctx, params.uri).await?
            }
            None => return Err(GatewayError::NotFound(format!("Resource: {}", params.uri))),
        },
    };

    let result = ResourcesReadResult { contents };
    serde_json::to_value(result).map_err(|e| GatewayError::InternalError(e.to_string()))
}

async fn handle_tools_call(
    state: &ServerState,
    registry: &ModuleRegistry,
    request: &RpcRequest,
) -> Result<Value, GatewayError> {
    let params: ToolsCallParams = request
        .params
        .clone()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| GatewayError::InvalidParams(e.to_string()))?
        .ok_or_else(|| GatewayError::InvalidParams("Missing params".to_string()))?;

    let tool = registry
        .get_tool(&params.name)
        .ok_or_else(|| GatewayError::MethodNotFound(format!("Unknown tool: {}", params.name)))?;

    let arguments = params.arguments.unwrap_or_else(|| serde_json::json!({}));
    let agent_id = arguments
        .get("agent_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            GatewayError::InvalidParams(
                "tools/call arguments must include 'agent_id'".to_string(),
            )
        })?;
    let user_context = arguments
        .get("phone_number")
        .and_then(Value::as_str)
        .map(str::to_string);

    let module = registry.server_name();

    // Fail closed: no agent record, no execution. From here on every branch
    // writes exactly one audit entry.
    let agent = match state.agent_directory.get_agent(&agent_id) {
        Ok(Some(agent)) => agent,
        Ok(None) => {
            state.audit.record(
                AuditEntry::new(&agent_id, "unknown", module, &params.name, AuditOutcome::Error)
                    .with_user_context(user_context)
                    .with_details(serde_json::json!({ "error": "agent not found" })),
            );
            return Err(GatewayError::NotFound(format!("Agent: {}", agent_id)));
        }
        Err(e) => {
            state.audit.record(
                AuditEntry::new(&agent_id, "unknown", module, &params.name, AuditOutcome::Error)
                    .with_user_context(user_context)
                    .with_details(serde_json::json!({ "error": e.to_string() })),
            );
            return Err(GatewayError::Store(e.to_string()));
        }
    };

    let access = match state.agent_directory.get_permissions(&agent_id) {
        Ok(mut permissions) => permissions.remove(module).unwrap_or_default(),
        Err(e) => {
            state.audit.record(
                AuditEntry::new(&agent.agent_id, &agent.name, module, &params.name, AuditOutcome::Error)
                    .with_user_context(user_context)
                    .with_details(serde_json::json!({ "error": e.to_string() })),
            );
            return Err(GatewayError::Store(e.to_string()));
        }
    };

    if !access.allows(&params.name) {
        warn!(
            "Agent {} denied tool {} on {}",
            agent.agent_id, params.name, module
        );
        state.audit.record(
            AuditEntry::new(&agent.agent_id, &agent.name, module, &params.name, AuditOutcome::Denied)
                .with_user_context(user_context)
                .with_details(serde_json::json!({ "tool": params.name })),
        );
        let denied = ToolCallResult::failure(format!(
            "Permission denied: agent '{}' may not call '{}' on {}",
            agent.agent_id, params.name, module
        ));
        return serde_json::to_value(denied)
            .map_err(|e| GatewayError::InternalError(e.to_string()));
    }

    let ctx = ToolContext::new(state.data_store.clone());
    match (tool.handler)(ctx, arguments.clone()).await {
        Ok(reply) => {
            state.audit.record(
                AuditEntry::new(&agent.agent_id, &agent.name, module, &params.name, AuditOutcome::Success)
                    .with_user_context(user_context)
                    .with_details(reply.audit),
            );
            let result = ToolCallResult::json(&reply.payload)
                .map_err(|e| GatewayError::InternalError(e.to_string()))?;
            serde_json::to_value(result).map_err(|e| GatewayError::InternalError(e.to_string()))
        }
        Err(e) => {
            state.audit.record(
                AuditEntry::new(&agent.agent_id, &agent.name, module, &params.name, AuditOutcome::Error)
                    .with_user_context(user_context)
                    .with_details(serde_json::json!({
                        "error": e.message(),
                        "arguments": arguments,
                    })),
            );
            Err(e)
        }
    }
}
