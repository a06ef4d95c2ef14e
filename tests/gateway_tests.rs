//! End-to-end dispatch tests for the agent gateway.
//!
//! These exercise the full path — envelope decoding, session handling, the
//! permission gate, tool execution, and audit logging — over an in-memory
//! SQLite store.

use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::{json, Value};

use crm_agent_gateway::audit::{AuditOutcome, AuditSink};
use crm_agent_gateway::gateway::handler::{dispatch_request, gateway_handler};
use crm_agent_gateway::gateway::protocol::SESSION_ID_HEADER;
use crm_agent_gateway::gateway::{RpcRequest, RpcResponse};
use crm_agent_gateway::modules::build_registries;
use crm_agent_gateway::server::state::ServerState;
use crm_agent_gateway::server::{build_state, ServerConfig};
use crm_agent_gateway::store::{DataStore, Filter, Row, SqliteGatewayStore};

// ============================================================================
// Helpers
// ============================================================================

fn test_state() -> (ServerState, Arc<SqliteGatewayStore>) {
    let store = Arc::new(SqliteGatewayStore::in_memory().unwrap());
    store.seed_default_pipeline().unwrap();
    let state = build_state(
        ServerConfig::default(),
        store.clone(),
        store.clone(),
        store.clone(),
        build_registries(),
    );
    (state, store)
}

fn seed_agent(store: &SqliteGatewayStore, agent_id: &str, name: &str, module: &str, tools: &[&str]) {
    let mut agent = Row::new();
    agent.insert("agent_id".to_string(), json!(agent_id));
    agent.insert("name".to_string(), json!(name));
    store.insert("agents", &agent).unwrap();

    let mut permissions = Row::new();
    permissions.insert("agent_id".to_string(), json!(agent_id));
    permissions.insert("module".to_string(), json!(module));
    permissions.insert("enabled".to_string(), json!(1));
    permissions.insert("tools".to_string(), json!(tools));
    store.insert("agent_permissions", &permissions).unwrap();
}

async fn dispatch(state: &ServerState, module: &str, session_id: &str, body: Value) -> RpcResponse {
    let registry = state.modules.get(module).expect("module exists").clone();
    let request: RpcRequest = serde_json::from_value(body).unwrap();
    dispatch_request(state, &registry, session_id, request).await
}

async fn call_tool(
    state: &ServerState,
    module: &str,
    tool: &str,
    arguments: Value,
) -> RpcResponse {
    dispatch(
        state,
        module,
        "test-session",
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": tool, "arguments": arguments }
        }),
    )
    .await
}

/// Decode the JSON a tool handler put into the text content of its result.
fn tool_payload(response: &RpcResponse) -> Value {
    let result = response.result.as_ref().expect("tool result");
    let text = result["content"][0]["text"].as_str().expect("text content");
    serde_json::from_str(text).unwrap()
}

// ============================================================================
// Initialize and session correlation over HTTP
// ============================================================================

#[tokio::test]
async fn initialize_generates_session_and_reports_server_info() {
    let (state, _store) = test_state();

    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": { "agentId": "agent-1" }
    })
    .to_string();

    let response = gateway_handler(
        State(state.clone()),
        Path("leads-server".to_string()),
        HeaderMap::new(),
        body,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response
        .headers()
        .get(SESSION_ID_HEADER)
        .expect("session header present")
        .to_str()
        .unwrap()
        .to_string();
    assert!(!session_id.is_empty());

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let decoded: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(decoded["result"]["serverInfo"]["name"], "leads-server");

    let session = state.sessions.get(&session_id).unwrap();
    assert!(session.initialized);
    assert_eq!(session.agent_id.as_deref(), Some("agent-1"));
}

#[tokio::test]
async fn provided_session_header_is_echoed_back() {
    let (state, _store) = test_state();

    let mut headers = HeaderMap::new();
    headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("my-session"));

    let response = gateway_handler(
        State(state.clone()),
        Path("leads-server".to_string()),
        headers,
        json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }).to_string(),
    )
    .await;

    assert_eq!(
        response.headers().get(SESSION_ID_HEADER).unwrap(),
        "my-session"
    );
}

// ============================================================================
// Session isolation
// ============================================================================

#[tokio::test]
async fn sessions_do_not_leak_into_each_other() {
    let (state, _store) = test_state();

    let s1 = state.sessions.resolve(None);
    let s2 = state.sessions.resolve(None);

    dispatch(
        &state,
        "leads-server",
        &s1,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "agentId": "agent-one" }
        }),
    )
    .await;

    let session1 = state.sessions.get(&s1).unwrap();
    let session2 = state.sessions.get(&s2).unwrap();
    assert!(session1.initialized);
    assert_eq!(session1.agent_id.as_deref(), Some("agent-one"));
    assert!(!session2.initialized);
    assert!(session2.agent_id.is_none());
}

// ============================================================================
// Response well-formedness
// ============================================================================

#[tokio::test]
async fn unknown_method_yields_method_not_found() {
    let (state, _store) = test_state();

    let response = dispatch(
        &state,
        "leads-server",
        "s",
        json!({ "jsonrpc": "2.0", "id": 7, "method": "bogus/method" }),
    )
    .await;

    assert!(response.result.is_none());
    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("bogus/method"));
}

#[tokio::test]
async fn exactly_one_of_result_or_error_and_id_is_echoed() {
    let (state, _store) = test_state();

    let ok = dispatch(
        &state,
        "leads-server",
        "s",
        json!({ "jsonrpc": "2.0", "id": "req-1", "method": "tools/list" }),
    )
    .await;
    assert!(ok.result.is_some() && ok.error.is_none());
    let encoded = serde_json::to_value(&ok).unwrap();
    assert_eq!(encoded["id"], "req-1");

    let err = dispatch(
        &state,
        "leads-server",
        "s",
        json!({ "jsonrpc": "2.0", "id": "req-2", "method": "nope" }),
    )
    .await;
    assert!(err.result.is_none() && err.error.is_some());
    let encoded = serde_json::to_value(&err).unwrap();
    assert_eq!(encoded["id"], "req-2");
}

#[tokio::test]
async fn missing_request_id_is_serialized_as_null() {
    let (state, _store) = test_state();

    let response = dispatch(
        &state,
        "leads-server",
        "s",
        json!({ "jsonrpc": "2.0", "method": "tools/list" }),
    )
    .await;

    let encoded = serde_json::to_value(&response).unwrap();
    assert!(encoded.get("id").unwrap().is_null());
}

// ============================================================================
// Transport-level failures
// ============================================================================

#[tokio::test]
async fn unparseable_body_is_a_transport_error() {
    let (state, _store) = test_state();

    let response = gateway_handler(
        State(state.clone()),
        Path("leads-server".to_string()),
        HeaderMap::new(),
        "{not json".to_string(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let decoded: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(decoded["error"]["code"], -32700);
}

#[tokio::test]
async fn non_envelope_json_is_a_transport_error() {
    let (state, _store) = test_state();

    let response = gateway_handler(
        State(state.clone()),
        Path("leads-server".to_string()),
        HeaderMap::new(),
        json!({ "no_method": true }).to_string(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let decoded: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(decoded["error"]["code"], -32600);
}

#[tokio::test]
async fn unknown_module_is_not_found() {
    let (state, _store) = test_state();

    let response = gateway_handler(
        State(state.clone()),
        Path("payroll-server".to_string()),
        HeaderMap::new(),
        json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }).to_string(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn discovery_is_unrestricted_and_catalog_complete() {
    let (state, _store) = test_state();

    let tools = dispatch(
        &state,
        "leads-server",
        "s",
        json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }),
    )
    .await;
    let names: Vec<&str> = tools.result.as_ref().unwrap()["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec![
            "create_lead",
            "delete_lead",
            "get_lead",
            "get_lead_statistics",
            "get_leads",
            "update_lead"
        ]
    );

    let resources = dispatch(
        &state,
        "leads-server",
        "s",
        json!({ "jsonrpc": "2.0", "id": 2, "method": "resources/list" }),
    )
    .await;
    assert_eq!(
        resources.result.as_ref().unwrap()["resources"]
            .as_array()
            .unwrap()
            .len(),
        3
    );

    let prompts = dispatch(
        &state,
        "leads-server",
        "s",
        json!({ "jsonrpc": "2.0", "id": 3, "method": "prompts/list" }),
    )
    .await;
    assert_eq!(
        prompts.result.as_ref().unwrap()["prompts"]
            .as_array()
            .unwrap()
            .len(),
        2
    );
}

// ============================================================================
// Fail-closed permission gate
// ============================================================================

#[tokio::test]
async fn denied_tool_is_audited_and_nothing_is_written() {
    let (state, store) = test_state();
    seed_agent(&store, "agent-1", "Booking Bot", "leads-server", &["get_leads"]);

    let response = call_tool(
        &state,
        "leads-server",
        "create_lead",
        json!({ "agent_id": "agent-1", "name": "Ada" }),
    )
    .await;

    // Denial is a tool-level failure, not a protocol error.
    assert!(response.error.is_none());
    let result = response.result.as_ref().unwrap();
    assert_eq!(result["isError"], true);

    // No row inserted.
    assert!(store.select("leads", &[]).unwrap().is_empty());

    // Exactly one audit entry, result=Denied.
    let entries = store.recent(10).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].result, AuditOutcome::Denied);
    assert_eq!(entries[0].agent_id, "agent-1");
    assert_eq!(entries[0].agent_name, "Booking Bot");
    assert_eq!(entries[0].module, "leads-server");
    assert_eq!(entries[0].action, "create_lead");
}

#[tokio::test]
async fn agent_without_any_permission_record_is_denied() {
    let (state, store) = test_state();
    // Agent exists but has no permission rows at all.
    let mut agent = Row::new();
    agent.insert("agent_id".to_string(), json!("agent-2"));
    agent.insert("name".to_string(), json!("Unprivileged"));
    store.insert("agents", &agent).unwrap();

    let response = call_tool(
        &state,
        "leads-server",
        "get_leads",
        json!({ "agent_id": "agent-2" }),
    )
    .await;

    assert_eq!(response.result.as_ref().unwrap()["isError"], true);
    let entries = store.recent(10).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].result, AuditOutcome::Denied);
}

#[tokio::test]
async fn unknown_agent_fails_closed_with_not_found() {
    let (state, store) = test_state();

    let response = call_tool(
        &state,
        "leads-server",
        "get_leads",
        json!({ "agent_id": "ghost" }),
    )
    .await;

    let error = response.error.unwrap();
    assert_eq!(error.code, -32001);
    assert!(error.message.contains("ghost"));

    let entries = store.recent(10).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].result, AuditOutcome::Error);
    assert_eq!(entries[0].agent_name, "unknown");
}

#[tokio::test]
async fn missing_agent_id_is_invalid_params() {
    let (state, store) = test_state();

    let response = call_tool(&state, "leads-server", "get_leads", json!({})).await;

    let error = response.error.unwrap();
    assert_eq!(error.code, -32602);
    // Pre-gate failure: nothing to attribute, no audit entry.
    assert!(store.recent(10).unwrap().is_empty());
}

// ============================================================================
// Audit completeness (granted / denied / erroring)
// ============================================================================

#[tokio::test]
async fn every_invocation_branch_writes_exactly_one_audit_entry() {
    let (state, store) = test_state();
    seed_agent(
        &store,
        "agent-1",
        "Booking Bot",
        "leads-server",
        &["get_leads", "create_lead", "update_lead"],
    );

    // Granted.
    call_tool(
        &state,
        "leads-server",
        "create_lead",
        json!({ "agent_id": "agent-1", "name": "Ada", "phone_number": "+15550001111" }),
    )
    .await;
    // Denied.
    call_tool(
        &state,
        "leads-server",
        "delete_lead",
        json!({ "agent_id": "agent-1", "lead_id": "whatever" }),
    )
    .await;
    // Erroring (update of a lead that does not exist).
    call_tool(
        &state,
        "leads-server",
        "update_lead",
        json!({ "agent_id": "agent-1", "lead_id": "missing", "name": "X" }),
    )
    .await;

    let entries = store.recent(10).unwrap();
    assert_eq!(entries.len(), 3);
    // Newest first.
    assert_eq!(entries[0].result, AuditOutcome::Error);
    assert_eq!(entries[1].result, AuditOutcome::Denied);
    assert_eq!(entries[2].result, AuditOutcome::Success);
    assert_eq!(
        entries[2].user_context.as_deref(),
        Some("+15550001111"),
        "phone_number is recorded as audit attribution"
    );
    // The error entry carries the attempted arguments.
    let details = entries[0].details.as_ref().unwrap();
    assert_eq!(details["arguments"]["lead_id"], "missing");
}

// ============================================================================
// Stage legality
// ============================================================================

fn seed_four_stage_pipeline(store: &SqliteGatewayStore) {
    let mut pipeline = Row::new();
    pipeline.insert("pipeline_id".to_string(), json!("sales"));
    pipeline.insert("name".to_string(), json!("Sales"));
    store.insert("pipelines", &pipeline).unwrap();

    for (position, name) in ["New", "Contacted", "Won", "Lost"].iter().enumerate() {
        let mut stage = Row::new();
        stage.insert("pipeline_id".to_string(), json!("sales"));
        stage.insert("name".to_string(), json!(name));
        stage.insert("position".to_string(), json!(position));
        store.insert("pipeline_stages", &stage).unwrap();
    }
}

#[tokio::test]
async fn stage_update_is_normalized_to_canonical_casing() {
    let (state, store) = test_state();
    seed_four_stage_pipeline(&store);
    seed_agent(
        &store,
        "agent-1",
        "Bot",
        "leads-server",
        &["create_lead", "update_lead"],
    );

    let created = call_tool(
        &state,
        "leads-server",
        "create_lead",
        json!({ "agent_id": "agent-1", "name": "Ada", "pipeline_id": "sales" }),
    )
    .await;
    let lead_id = tool_payload(&created)["lead"]["lead_id"]
        .as_str()
        .unwrap()
        .to_string();

    let updated = call_tool(
        &state,
        "leads-server",
        "update_lead",
        json!({ "agent_id": "agent-1", "lead_id": lead_id, "stage": "won" }),
    )
    .await;
    assert!(updated.error.is_none());
    assert_eq!(tool_payload(&updated)["lead"]["stage"], "Won");

    let rows = store
        .select("leads", &[Filter::eq("lead_id", lead_id.as_str())])
        .unwrap();
    assert_eq!(rows[0]["stage"], "Won");
}

#[tokio::test]
async fn illegal_stage_is_rejected_with_the_valid_names() {
    let (state, store) = test_state();
    seed_four_stage_pipeline(&store);
    seed_agent(
        &store,
        "agent-1",
        "Bot",
        "leads-server",
        &["create_lead", "update_lead"],
    );

    let created = call_tool(
        &state,
        "leads-server",
        "create_lead",
        json!({ "agent_id": "agent-1", "name": "Ada", "pipeline_id": "sales" }),
    )
    .await;
    let lead_id = tool_payload(&created)["lead"]["lead_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = call_tool(
        &state,
        "leads-server",
        "update_lead",
        json!({ "agent_id": "agent-1", "lead_id": lead_id, "stage": "Negotiating" }),
    )
    .await;

    let error = response.error.unwrap();
    assert_eq!(error.code, -32002);
    for stage in ["New", "Contacted", "Won", "Lost"] {
        assert!(error.message.contains(stage));
    }

    // No row mutated.
    let rows = store
        .select("leads", &[Filter::eq("lead_id", lead_id.as_str())])
        .unwrap();
    assert_eq!(rows[0]["stage"], "New");
}

// ============================================================================
// Statistics resource
// ============================================================================

#[tokio::test]
async fn statistics_resource_groups_by_stage() {
    let (state, store) = test_state();
    seed_agent(&store, "agent-1", "Bot", "leads-server", &["create_lead"]);

    for i in 0..6 {
        call_tool(
            &state,
            "leads-server",
            "create_lead",
            json!({ "agent_id": "agent-1", "name": format!("new-{}", i), "stage": "New" }),
        )
        .await;
    }
    for i in 0..4 {
        call_tool(
            &state,
            "leads-server",
            "create_lead",
            json!({ "agent_id": "agent-1", "name": format!("won-{}", i), "stage": "Won" }),
        )
        .await;
    }

    let response = dispatch(
        &state,
        "leads-server",
        "s",
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "resources/read",
            "params": { "uri": "leads://statistics" }
        }),
    )
    .await;

    let contents = &response.result.as_ref().unwrap()["contents"][0];
    let stats: Value = serde_json::from_str(contents["text"].as_str().unwrap()).unwrap();
    assert_eq!(stats["total"], 10);
    assert_eq!(stats["by_stage"]["New"], 6);
    assert_eq!(stats["by_stage"]["Won"], 4);
}

#[tokio::test]
async fn unknown_resource_uri_falls_back_to_unfiltered_scan() {
    let (state, store) = test_state();
    seed_agent(&store, "agent-1", "Bot", "leads-server", &["create_lead"]);
    call_tool(
        &state,
        "leads-server",
        "create_lead",
        json!({ "agent_id": "agent-1", "name": "Ada" }),
    )
    .await;

    let response = dispatch(
        &state,
        "leads-server",
        "s",
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "resources/read",
            "params": { "uri": "leads://no-such-partition" }
        }),
    )
    .await;

    assert!(response.error.is_none());
    let contents = &response.result.as_ref().unwrap()["contents"][0];
    let decoded: Value = serde_json::from_str(contents["text"].as_str().unwrap()).unwrap();
    assert_eq!(decoded["count"], 1);
}

// ============================================================================
// Cross-module behavior
// ============================================================================

#[tokio::test]
async fn permissions_are_scoped_per_module() {
    let (state, store) = test_state();
    // Granted on leads-server only.
    seed_agent(&store, "agent-1", "Bot", "leads-server", &["get_leads"]);

    let leads = call_tool(
        &state,
        "leads-server",
        "get_leads",
        json!({ "agent_id": "agent-1" }),
    )
    .await;
    assert!(leads.error.is_none());
    assert_ne!(leads.result.as_ref().unwrap()["isError"], true);

    let products = call_tool(
        &state,
        "products-server",
        "get_products",
        json!({ "agent_id": "agent-1" }),
    )
    .await;
    assert_eq!(products.result.as_ref().unwrap()["isError"], true);
}

#[tokio::test]
async fn one_session_can_act_for_different_agents() {
    let (state, store) = test_state();
    seed_agent(&store, "agent-a", "Bot A", "leads-server", &["get_leads"]);
    seed_agent(&store, "agent-b", "Bot B", "leads-server", &["get_leads"]);

    // Same session id; authorization keys off the per-call agent_id.
    for agent in ["agent-a", "agent-b"] {
        let response = call_tool(
            &state,
            "leads-server",
            "get_leads",
            json!({ "agent_id": agent }),
        )
        .await;
        assert!(response.error.is_none());
    }

    let entries = store.recent(10).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].agent_id, "agent-b");
    assert_eq!(entries[1].agent_id, "agent-a");
}
