//! Appointments module ("appointments-server").
//!
//! Scheduling CRUD. The `status` field is constrained to a fixed set; the
//! check is case-insensitive and the stored value is canonical.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::stats::count_by;
use crate::gateway::context::ToolContext;
use crate::gateway::protocol::{GatewayError, PromptArgument, PromptDefinition, ResourceContent};
use crate::gateway::registry::{
    ModuleRegistry, ResourceBuilder, ResourceResult, ToolBuilder, ToolReply, ToolResult,
};
use crate::store::{DataStore, Filter, Row};

pub const SERVER_NAME: &str = "appointments-server";

const STATUSES: &[&str] = &["scheduled", "completed", "cancelled", "no_show"];
const DEFAULT_STATUS: &str = "scheduled";

pub fn build_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new(SERVER_NAME);

    registry.register_tool(get_appointments_tool());
    registry.register_tool(create_appointment_tool());
    registry.register_tool(update_appointment_tool());
    registry.register_tool(delete_appointment_tool());
    registry.register_tool(get_appointment_statistics_tool());

    registry.register_resource(
        ResourceBuilder::new("appointments://all", "All Appointments")
            .description("Every appointment, unfiltered")
            .mime_type("application/json")
            .build(all_appointments_handler),
    );
    registry.register_resource(
        ResourceBuilder::new("appointments://upcoming", "Upcoming Appointments")
            .description("Appointments still in the scheduled status")
            .mime_type("application/json")
            .build(upcoming_appointments_handler),
    );
    registry.register_resource(
        ResourceBuilder::new("appointments://statistics", "Appointment Statistics")
            .description("Grouped appointment counts by status")
            .mime_type("application/json")
            .build(statistics_handler),
    );
    registry.set_fallback_resource(std::sync::Arc::new(|ctx, uri| {
        Box::pin(all_appointments_handler(ctx, uri))
    }));

    registry.register_prompt(PromptDefinition {
        name: "schedule_followup".to_string(),
        description: "Draft a follow-up appointment proposal for a lead".to_string(),
        arguments: vec![PromptArgument {
            name: "lead_id".to_string(),
            description: "Lead the follow-up is for".to_string(),
            required: true,
        }],
    });

    registry
}

/// Case-insensitively resolve a requested status to its canonical form.
fn validate_status(requested: &str) -> Result<String, GatewayError> {
    STATUSES
        .iter()
        .find(|status| status.eq_ignore_ascii_case(requested))
        .map(|status| status.to_string())
        .ok_or_else(|| {
            GatewayError::Validation(format!(
                "Invalid status '{}'. Valid statuses: {}",
                requested,
                STATUSES.join(", ")
            ))
        })
}

fn public_row(mut row: Row) -> Value {
    row.remove("id");
    Value::Object(row)
}

fn fetch_appointment(store: &dyn DataStore, appointment_id: &str) -> Result<Row, GatewayError> {
    let mut rows = store.select(
        "appointments",
        &[Filter::eq("appointment_id", appointment_id)],
    )?;
    if rows.is_empty() {
        return Err(GatewayError::NotFound(format!(
            "Appointment: {}",
            appointment_id
        )));
    }
    Ok(rows.remove(0))
}

// ============================================================================
// get_appointments
// ============================================================================

#[derive(Debug, Deserialize)]
struct GetAppointmentsParams {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    lead_id: Option<String>,
}

fn get_appointments_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("get_appointments")
        .description("List appointments, optionally filtered by status or lead")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                },
                "status": {
                    "type": "string",
                    "enum": STATUSES,
                    "description": "Only return appointments with this status"
                },
                "lead_id": {
                    "type": "string",
                    "description": "Only return appointments for this lead"
                }
            },
            "required": ["agent_id"]
        }))
        .build(get_appointments_handler)
}

async fn get_appointments_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: GetAppointmentsParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

    let mut filters = Vec::new();
    if let Some(status) = &params.status {
        filters.push(Filter::eq("status", validate_status(status)?));
    }
    if let Some(lead_id) = &params.lead_id {
        filters.push(Filter::eq("lead_id", lead_id.as_str()));
    }

    let rows = ctx.data_store.select("appointments", &filters)?;
    let count = rows.len();
    let appointments: Vec<Value> = rows.into_iter().map(public_row).collect();

    Ok(ToolReply::new(
        json!({ "appointments": appointments, "count": count }),
        json!({ "count": count, "status_filter": params.status }),
    ))
}

// ============================================================================
// create_appointment
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateAppointmentParams {
    title: String,
    scheduled_at: String,
    #[serde(default)]
    lead_id: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

fn create_appointment_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("create_appointment")
        .description("Create an appointment; it starts in the scheduled status")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                },
                "title": {
                    "type": "string",
                    "description": "Short description of the appointment"
                },
                "scheduled_at": {
                    "type": "string",
                    "description": "RFC3339 timestamp of the appointment"
                },
                "lead_id": {
                    "type": "string",
                    "description": "Lead this appointment is for"
                },
                "notes": { "type": "string" }
            },
            "required": ["agent_id", "title", "scheduled_at"]
        }))
        .build(create_appointment_handler)
}

async fn create_appointment_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: CreateAppointmentParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

    let store = ctx.data_store.as_ref();
    let appointment_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    let mut row = Row::new();
    row.insert("appointment_id".to_string(), json!(appointment_id));
    row.insert("lead_id".to_string(), json!(params.lead_id));
    row.insert("title".to_string(), json!(params.title));
    row.insert("scheduled_at".to_string(), json!(params.scheduled_at));
    row.insert("status".to_string(), json!(DEFAULT_STATUS));
    row.insert("notes".to_string(), json!(params.notes));
    row.insert("created_at".to_string(), json!(now));
    row.insert("updated_at".to_string(), json!(now));
    store.insert("appointments", &row)?;

    let created = fetch_appointment(store, &appointment_id)?;

    Ok(ToolReply::new(
        json!({ "appointment": public_row(created) }),
        json!({ "appointment_id": appointment_id, "title": params.title }),
    ))
}

// ============================================================================
// update_appointment
// ============================================================================

#[derive(Debug, Deserialize)]
struct UpdateAppointmentParams {
    appointment_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    scheduled_at: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

fn update_appointment_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("update_appointment")
        .description("Update an appointment's fields, including its status")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                },
                "appointment_id": {
                    "type": "string",
                    "description": "Business identifier of the appointment"
                },
                "title": { "type": "string" },
                "scheduled_at": {
                    "type": "string",
                    "description": "New RFC3339 timestamp"
                },
                "status": {
                    "type": "string",
                    "enum": STATUSES
                },
                "notes": { "type": "string" }
            },
            "required": ["agent_id", "appointment_id"]
        }))
        .build(update_appointment_handler)
}

async fn update_appointment_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: UpdateAppointmentParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

    let store = ctx.data_store.as_ref();
    fetch_appointment(store, &params.appointment_id)?;

    let mut changes = Row::new();
    if let Some(title) = params.title {
        changes.insert("title".to_string(), json!(title));
    }
    if let Some(scheduled_at) = params.scheduled_at {
        changes.insert("scheduled_at".to_string(), json!(scheduled_at));
    }
    if let Some(status) = params.status {
        changes.insert("status".to_string(), json!(validate_status(&status)?));
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
    store.update(
        "appointments",
        &[Filter::eq("appointment_id", params.appointment_id.as_str())],
        &changes,
    )?;

    let updated = fetch_appointment(store, &params.appointment_id)?;

    Ok(ToolReply::new(
        json!({ "appointment": public_row(updated) }),
        json!({ "appointment_id": params.appointment_id, "fields": touched }),
    ))
}

// ============================================================================
// delete_appointment
// ============================================================================

#[derive(Debug, Deserialize)]
struct DeleteAppointmentParams {
    appointment_id: String,
}

fn delete_appointment_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("delete_appointment")
        .description("Delete an appointment by its business identifier")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Identifier of the calling agent"
                },
                "appointment_id": {
                    "type": "string",
                    "description": "Business identifier of the appointment to delete"
                }
            },
            "required": ["agent_id", "appointment_id"]
        }))
        .build(delete_appointment_handler)
}

async fn delete_appointment_handler(ctx: ToolContext, params: Value) -> ToolResult {
    let params: DeleteAppointmentParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;

    let store = ctx.data_store.as_ref();
    fetch_appointment(store, &params.appointment_id)?;
    let deleted = store.delete(
        "appointments",
        &[Filter::eq("appointment_id", params.appointment_id.as_str())],
    )?;

    Ok(ToolReply::new(
        json!({ "success": true, "appointment_id": params.appointment_id }),
        json!({ "appointment_id": params.appointment_id, "deleted": deleted }),
    ))
}

// ============================================================================
// get_appointment_statistics
// ============================================================================

fn get_appointment_statistics_tool() -> crate::gateway::registry::RegisteredTool {
    ToolBuilder::new("get_appointment_statistics")
        .description("Grouped appointment counts by status")
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
        .build(get_appointment_statistics_handler)
}

fn appointment_statistics(rows: &[Row]) -> Value {
    let by_status = count_by(rows, "status");
    let upcoming = by_status
        .get(DEFAULT_STATUS)
        .and_then(Value::as_u64)
        .unwrap_or(0);
    json!({
        "total": rows.len(),
        "by_status": by_status,
        "upcoming": upcoming,
    })
}

async fn get_appointment_statistics_handler(ctx: ToolContext, _params: Value) -> ToolResult {
    let rows = ctx.data_store.select("appointments", &[])?;
    let statistics = appointment_statistics(&rows);

    Ok(ToolReply::new(statistics, json!({ "total": rows.len() })))
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

async fn all_appointments_handler(ctx: ToolContext, uri: String) -> ResourceResult {
    let rows = ctx.data_store.select("appointments", &[])?;
    let count = rows.len();
    let appointments: Vec<Value> = rows.into_iter().map(public_row).collect();
    Ok(rows_to_resource(
        uri,
        json!({ "appointments": appointments, "count": count }),
    ))
}

async fn upcoming_appointments_handler(ctx: ToolContext, uri: String) -> ResourceResult {
    let rows = ctx
        .data_store
        .select("appointments", &[Filter::eq("status", DEFAULT_STATUS)])?;
    let count = rows.len();
    let appointments: Vec<Value> = rows.into_iter().map(public_row).collect();
    Ok(rows_to_resource(
        uri,
        json!({ "appointments": appointments, "count": count }),
    ))
}

async fn statistics_handler(ctx: ToolContext, uri: String) -> ResourceResult {
    let rows = ctx.data_store.select("appointments", &[])?;
    Ok(rows_to_resource(uri, appointment_statistics(&rows)))
}
