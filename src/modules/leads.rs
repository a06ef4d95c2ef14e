//! Leads module ("leads-server").
//!
//! CRUD over sales leads plus pipeline-aware stage validation: a `stage`
//! written onto a lead must belong to the stage catalog of the lead's
//! pipeline, case-insensitively, and is persisted with the catalog's
//! canonical casing.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::stats::{average, count_by, sum};
use crate::gateway::context::ToolContext;
use crate::gateway::protocol::{GatewayError, PromptArgument, PromptDefinition, ResourceContent};
use crate::gateway::registry::{
    ModuleRegistry, ResourceBuilder, ResourceResult, ToolBuilder, ToolReply, ToolResult,
};
use crate::store::{DataStore, Filter, Row};

pub const SERVER_NAME: &str = "leads-server";

const DEFAULT_PIPELINE: &str = "default";

/// Build the leads-server registry: tools, resources, prompts.
pub fn build_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new(SERVER_NAME);

    registry.register_tool(get_leads_tool());
    registry.register_tool(get_lead_tool());
    registry.register_tool(create_lead_tool());
    registry.register_tool(update_lead_tool());
    registry.register_tool(delete_lead_tool());
    registry.register_tool(get_lead_statistics_tool());

    registry.register_resource(
        ResourceBuilder::new("leads://all", "All Leads")
            .description("Every lead in the pipeline, unfiltered")
            .mime_type("application/json")
            .build(all_leads_handler),
    );
    registry.register_resource(
        ResourceBuilder::new("leads://new", "New Leads")
            .description("Leads still in the New stage")
            .mime_type("application/json")
            .build(new_leads_handler),
    );
    registry.register_resource(
        ResourceBuilder::new("leads://statistics", "Lead Statistics")
            .description("Grouped counts and value aggregates over all leads")
            .mime_type("application/json")
            .build(statistics_handler),
    );
    registry.set_fallback_resource(std::sync::Arc::new(|ctx, uri| {
        Box::pin(all_leads_handler(ctx, uri))
    }));

    registry.register_prompt(PromptDefinition {
        name: "qualify_lead".to_string(),
        description: "Assess a lead's fit and urgency from its recorded details".to_string(),
        arguments: vec![PromptArgument {
            name: "lead_id".to_string(),
            description: "Business identifier of the lead to qualify".to_string(),
            required: true,
        }],
    });
    registry.register_prompt(PromptDefinition {
        name: "pipeline_review".to_string(),
        description: "Summarize pipeline health: stage distribution, stale leads, total value"
            .to_string(),
        arguments: vec![PromptArgument {
            name: "pipeline_id".to_string(),
            description: "Pipeline to review (defaults to the default pipeline)".to_string(),
            required: false,
        }],
    });

    registry
}

// ============================================================================
// Stage validation
// ============================================================================

/// The ordered stage names of a pipeline, canonical casing.
fn load_stage_catalog(
    store: &dyn DataStore,
    pipeline_id: &str,
) -> Result<Vec<String>, GatewayError> {
    let rows = store.select(
        "pipeline_stages",
        &[Filter::eq("pipeline_id", pipeline_id)],
    )?;

    let mut stages: Vec<(i64, String)> = rows
        .iter()
        .filter_map(|row| {
            let position = row.get("position").and_then(Value::as_i64)?;
            let name = row.get("name").and_then(Value::as_str)?;
            Some((position, name.to_string()))
        })
        .collect();
    stages.sort_by_key(|(position, _)| *position);

    if stages.is_empty() {
        return Err(GatewayError::Validation(format!(
            "Unknown pipeline: {}",
            pipeline_id
        )));
    }
    Ok(stages.into_iter().map(|(_, name)| name).collect())
}

/// Case-insensitively resolve `requested` against the pipeline's stage
/// catalog, returning the canonical casing. Rejects with the full list of
/// valid names so an automated caller can self-correct.
fn validate_stage(
    store: &dyn DataStore,
    pipeline_id: &str,
    requested: &str,
) -> Result<String, GatewayError> {
    let catalog = load_stage_catalog(store, pipeline_id)?;
    catalog
        .iter()
        .find(|stage| stage.eq_ignore_ascii_case(requested))
        .cloned()
        .ok_or_else(|| {
            GatewayError::Validation(format!(
                "Invalid stage '{}' for pipeline '{}'. Valid stages: {}",
                requested,
                pipeline_id,
                catalog.join(", ")
            ))
        })
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Strip the storage primary key before a row goes over the wire; callers
/// only ever see the business identifier.
fn public_row(mut row: Row) -> Value {
    row.remove("id");
    Value::Object(row)
}

fn fetch_lead(store: &dyn DataStore, lead_id: &str) -> Result<Row, GatewayError> {
    let mut rows = store.select("leads", &[Filter::eq("lead_id", lead_id)])?;
    if rows.is_empty() {
        return Err(GatewayError::NotFound(format!("Lead: {}", lead_id)));
    }
    Ok(rows.remove(0))
}

fn lead_statistics(rows: &[Row]) -> Value {
    json!({
        "total": rows.len(),
        "by_stage": count_by(rows, "stage"),
        "by_source": count_by(rows, "source"),
        "total_value": sum(rows, "value"),
        "average_value": average(rows, "value"),
    })
}

// ============================================================================
// get_leads
// ============================================================================

#[derive(Debug, Deserialize)]
struct GetLeadsParams {
    #[serde(default)]
    stage: Option<String>,
}

fn get_leads_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("get_leads")
        .description("List leads, optionally filtered by stage")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                },
                "stage": {
                    "type": "string",
                    "description": "Only return leads currently in this stage"
                }
            },
            "required": ["agent_id"]
        }))
        .build(get_leads_handler)
}

async fn get_leads_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: GetLeadsParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

    let filters = match &params.stage {
        Some(stage) => vec![Filter::eq("stage", stage.as_str())],
        None => Vec::new(),
    };
    let rows = ctx.data_store.select("leads", &filters)?;
    let count = rows.len();
    let leads: Vec<Value> = rows.into_iter().map(public_row).collect();

    Ok(ToolReply::new(
        json!({ "leads": leads, "count": count }),
        json!({ "count": count, "stage_filter": params.stage }),
    ))
}

// ============================================================================
// get_lead
// ============================================================================

#[derive(Debug, Deserialize)]
struct GetLeadParams {
    lead_id: String,
}

fn get_lead_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("get_lead")
        .description("Fetch one lead by its business identifier")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                },
                "lead_id": {
                    "type": "string",
                    "description": "Business identifier of the lead"
                }
            },
            "required": ["agent_id", "lead_id"]
        }))
        .build(get_lead_handler)
}

async fn get_lead_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: GetLeadParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

    let row = fetch_lead(ctx.data_store.as_ref(), &params.lead_id)?;

    Ok(ToolReply::new(
        json!({ "lead": public_row(row) }),
        json!({ "lead_id": params.lead_id }),
    ))
}

// ============================================================================
// create_lead
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateLeadParams {
    name: String,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    pipeline_id: Option<String>,
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    notes: Option<String>,
}

fn create_lead_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("create_lead")
        .description(
            "Create a new lead. The stage, when given, must belong to the target pipeline",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                },
                "name": {
                    "type": "string",
                    "description": "Lead's display name"
                },
                "phone": { "type": "string" },
                "email": { "type": "string" },
                "source": {
                    "type": "string",
                    "description": "Where the lead came from (website, referral, ...)"
                },
                "pipeline_id": {
                    "type": "string",
                    "description": "Target pipeline (defaults to 'default')"
                },
                "stage": {
                    "type": "string",
                    "description": "Initial stage (defaults to the pipeline's first stage)"
                },
                "value": {
                    "type": "number",
                    "description": "Estimated deal value"
                },
                "notes": { "type": "string" }
            },
            "required": ["agent_id", "name"]
        }))
        .build(create_lead_handler)
}

async fn create_lead_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: CreateLeadParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

    let store = ctx.data_store.as_ref();
    let pipeline_id = params
        .pipeline_id
        .unwrap_or_else(|| DEFAULT_PIPELINE.to_string());
    let stage = match &params.stage {
        Some(requested) => validate_stage(store, &pipeline_id, requested)?,
        None => load_stage_catalog(store, &pipeline_id)?
            .into_iter()
            .next()
            .expect("stage catalog is never empty"),
    };

    let lead_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    let mut row = Row::new();
    row.insert("lead_id".to_string(), json!(lead_id));
    row.insert("name".to_string(), json!(params.name));
    row.insert("phone".to_string(), json!(params.phone));
    row.insert("email".to_string(), json!(params.email));
    row.insert("source".to_string(), json!(params.source));
    row.insert("pipeline_id".to_string(), json!(pipeline_id));
    row.insert("stage".to_string(), json!(stage));
    row.insert("value".to_string(), json!(params.value));
    row.insert("notes".to_string(), json!(params.notes));
    row.insert("created_at".to_string(), json!(now));
    row.insert("updated_at".to_string(), json!(now));
    store.insert("leads", &row)?;

    let created = fetch_lead(store, &lead_id)?;

    Ok(ToolReply::new(
        json!({ "lead": public_row(created) }),
        json!({ "lead_id": lead_id, "name": params.name, "stage": stage }),
    ))
}

// ============================================================================
// update_lead
// ============================================================================

#[derive(Debug, Deserialize)]
struct UpdateLeadParams {
    lead_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    notes: Option<String>,
}

fn update_lead_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("update_lead")
        .description(
            "Update a lead's fields. A stage change is validated against the lead's pipeline",
        )
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                },
                "lead_id": {
                    "type": "string",
                    "description": "Business identifier of the lead to update"
                },
                "name": { "type": "string" },
                "phone": { "type": "string" },
                "email": { "type": "string" },
                "source": { "type": "string" },
                "stage": {
                    "type": "string",
                    "description": "New stage; must belong to the lead's pipeline"
                },
                "value": { "type": "number" },
                "notes": { "type": "string" }
            },
            "required": ["agent_id", "lead_id"]
        }))
        .build(update_lead_handler)
}

async fn update_lead_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: UpdateLeadParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

    let store = ctx.data_store.as_ref();
    let existing = fetch_lead(store, &params.lead_id)?;

    let mut changes = Row::new();
    if let Some(name) = params.name {
        changes.insert("name".to_string(), json!(name));
    }
    if let Some(phone) = params.phone {
        changes.insert("phone".to_string(), json!(phone));
    }
    if let Some(email) = params.email {
        changes.insert("email".to_string(), json!(email));
    }
    if let Some(source) = params.source {
        changes.insert("source".to_string(), json!(source));
    }
    if let Some(requested_stage) = params.stage {
        // Validate against the lead's current pipeline; persist the
        // catalog's canonical casing.
        let pipeline_id = existing
            .get("pipeline_id")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PIPELINE);
        let canonical = validate_stage(store, pipeline_id, &requested_stage)?;
        changes.insert("stage".to_string(), json!(canonical));
    }
    if let Some(value) = params.value {
        changes.insert("value".to_string(), json!(value));
    }
    if let Some(notes) = params.notes {
        changes.insert("notes".to_string(), json!(notes));
    }

    if changes.is_empty() {
        return Err(GatewayError::InvalidParams(
            "No fields to update".to_string(),
        ));
    }

    let touched: Vec<String> = changes.keys().cloned().collect();
    changes.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
    store.update("leads", &[Filter::eq("lead_id", params.lead_id.as_str())], &changes)?;

    let updated = fetch_lead(store, &params.lead_id)?;

    Ok(ToolReply::new(
        json!({ "lead": public_row(updated) }),
        json!({ "lead_id": params.lead_id, "fields": touched }),
    ))
}

// ============================================================================
// delete_lead
// ============================================================================

#[derive(Debug, Deserialize)]
struct DeleteLeadParams {
    lead_id: String,
}

fn delete_lead_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("delete_lead")
        .description("Delete a lead by its business identifier")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                },
                "lead_id": {
                    "type": "string",
                    "description": "Business identifier of the lead to delete"
                }
            },
            "required": ["agent_id", "lead_id"]
        }))
        .build(delete_lead_handler)
}

async fn delete_lead_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: DeleteLeadParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

    let store = ctx.data_store.as_ref();
    fetch_lead(store, &params.lead_id)?;
    let deleted = store.delete("leads", &[Filter::eq("lead_id", params.lead_id.as_str())])?;

    Ok(ToolReply::new(
        json!({ "success": true, "lead_id": params.lead_id }),
        json!({ "lead_id": params.lead_id, "deleted": deleted }),
    ))
}

// ============================================================================
// get_lead_statistics
// ============================================================================

fn get_lead_statistics_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("get_lead_statistics")
        .description("Grouped lead counts by stage and source, plus value aggregates")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                }
            },
            "required": ["agent_id"]
        }))
        .build(get_lead_statistics_handler)
}

async fn get_lead_statistics_handler(ctx: ToolContext, _params: Value) -> ToolResult {
    let rows = ctx.data_store.select("leads", &[])?;
    let statistics = lead_statistics(&rows);

    Ok(ToolReply::new(
        statistics,
        json!({ "total": rows.len() }),
    ))
}

// ============================================================================
// Resources
// ============================================================================

fn rows_to_resource(uri: String, payload: Value) -> Vec<ResourceContent> {
    vec![ResourceContent::Text {
        uri,
        mime_type: Some("application/json".to_string()),
        text: serde_json::to_string_pretty(&payload).unwrap_or_default(),
    }]
}

async fn all_leads_handler(ctx: ToolContext, uri: String) -> ResourceResult {
    let rows = ctx.data_store.select("leads", &[])?;
    let count = rows.len();
    let leads: Vec<Value> = rows.into_iter().map(public_row).collect();
    Ok(rows_to_resource(
        uri,
        json!({ "leads": leads, "count": count }),
    ))
}

async fn new_leads_handler(ctx: ToolContext, uri: String) -> ResourceResult {
    let rows = ctx
        .data_store
        .select("leads", &[Filter::eq("stage", "New")])?;
    let count = rows.len();
    let leads: Vec<Value> = rows.into_iter().map(public_row).collect();
    Ok(rows_to_resource(
        uri,
        json!({ "leads": leads, "count": count }),
    ))
}

async fn statistics_handler(ctx: ToolContext, uri: String) -> ResourceResult {
    let rows = ctx.data_store.select("leads", &[])?;
    Ok(rows_to_resource(uri, lead_statistics(&rows)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteGatewayStore;
    use std::sync::Arc;

    fn test_context() -> ToolContext {
        let store = SqliteGatewayStore::in_memory().unwrap();
        store.seed_default_pipeline().unwrap();
        ToolContext::new(Arc::new(store))
    }

    async fn create_lead(ctx: &ToolContext, name: &str, stage: Option<&str>) -> String {
        let mut params = json!({ "name": name });
        if let Some(stage) = stage {
            params["stage"] = json!(stage);
        }
        let reply = create_lead_handler(ctx.clone(), params).await.unwrap();
        reply.payload["lead"]["lead_id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn create_lead_defaults_to_first_stage() {
        let ctx = test_context();
        let reply = create_lead_handler(ctx.clone(), json!({ "name": "Ada" }))
            .await
            .unwrap();
        assert_eq!(reply.payload["lead"]["stage"], "New");
        assert_eq!(reply.payload["lead"]["pipeline_id"], "default");
        assert!(reply.payload["lead"].get("id").is_none());
    }

    #[tokio::test]
    async fn create_lead_normalizes_stage_casing() {
        let ctx = test_context();
        let reply = create_lead_handler(
            ctx.clone(),
            json!({ "name": "Ada", "stage": "contacted" }),
        )
        .await
        .unwrap();
        assert_eq!(reply.payload["lead"]["stage"], "Contacted");
    }

    #[tokio::test]
    async fn update_lead_rejects_stage_outside_pipeline() {
        let ctx = test_context();
        let lead_id = create_lead(&ctx, "Ada", None).await;

        let err = update_lead_handler(
            ctx.clone(),
            json!({ "lead_id": lead_id, "stage": "Negotiating" }),
        )
        .await
        .unwrap_err();

        match err {
            GatewayError::Validation(msg) => {
                assert!(msg.contains("Negotiating"));
                for stage in ["New", "Contacted", "Qualified", "Won", "Lost"] {
                    assert!(msg.contains(stage), "message should list {}", stage);
                }
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        // Nothing was mutated.
        let rows = ctx.data_store.select("leads", &[]).unwrap();
        assert_eq!(rows[0]["stage"], "New");
    }

    #[tokio::test]
    async fn update_lead_persists_canonical_stage_casing() {
        let ctx = test_context();
        let lead_id = create_lead(&ctx, "Ada", None).await;

        let reply = update_lead_handler(
            ctx.clone(),
            json!({ "lead_id": lead_id, "stage": "won" }),
        )
        .await
        .unwrap();
        assert_eq!(reply.payload["lead"]["stage"], "Won");

        let rows = ctx.data_store.select("leads", &[]).unwrap();
        assert_eq!(rows[0]["stage"], "Won");
    }

    #[tokio::test]
    async fn update_unknown_lead_is_not_found() {
        let ctx = test_context();
        let err = update_lead_handler(
            ctx.clone(),
            json!({ "lead_id": "missing", "name": "X" }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_lead_removes_the_row() {
        let ctx = test_context();
        let lead_id = create_lead(&ctx, "Ada", None).await;

        let reply = delete_lead_handler(ctx.clone(), json!({ "lead_id": lead_id }))
            .await
            .unwrap();
        assert_eq!(reply.payload["success"], true);
        assert!(ctx.data_store.select("leads", &[]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_leads_filters_by_stage() {
        let ctx = test_context();
        create_lead(&ctx, "Ada", Some("New")).await;
        create_lead(&ctx, "Grace", Some("Won")).await;

        let reply = get_leads_handler(ctx.clone(), json!({ "stage": "Won" }))
            .await
            .unwrap();
        assert_eq!(reply.payload["count"], 1);
        assert_eq!(reply.payload["leads"][0]["name"], "Grace");
    }

    #[tokio::test]
    async fn statistics_group_by_stage() {
        let ctx = test_context();
        for _ in 0..6 {
            create_lead(&ctx, "n", Some("New")).await;
        }
        for _ in 0..4 {
            create_lead(&ctx, "w", Some("Won")).await;
        }

        let reply = get_lead_statistics_handler(ctx.clone(), json!({}))
            .await
            .unwrap();
        assert_eq!(reply.payload["total"], 10);
        assert_eq!(reply.payload["by_stage"]["New"], 6);
        assert_eq!(reply.payload["by_stage"]["Won"], 4);
    }

    #[tokio::test]
    async fn statistics_resource_matches_tool_output() {
        let ctx = test_context();
        create_lead(&ctx, "Ada", None).await;

        let contents = statistics_handler(ctx.clone(), "leads://statistics".to_string())
            .await
            .unwrap();
        let ResourceContent::Text { text, .. } = &contents[0];
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["total"], 1);
        assert_eq!(parsed["by_stage"]["New"], 1);
    }

    #[test]
    fn registry_exposes_expected_catalog() {
        let registry = build_registry();
        assert_eq!(registry.server_name(), SERVER_NAME);
        assert_eq!(registry.tool_count(), 6);
        assert_eq!(registry.resource_count(), 3);
        assert!(registry.get_tool("update_lead").is_some());
        assert!(registry.find_resource("leads://statistics").is_some());
        assert!(registry.fallback_resource().is_some());
    }
}
