//! SQLite schema for the gateway database.
//!
//! One database file holds the domain tables the modules operate on, the
//! agent directory and permission records the gate reads, and the append-only
//! audit log.

use super::versioned_schema::{Column, SqlType, Table, VersionedSchema};
use crate::gateway_column;

// =============================================================================
// Version 1
// =============================================================================

/// Leads worked by agents. `lead_id` is the business identifier exposed over
/// the wire; `id` is storage-only.
const LEADS_TABLE_V1: Table = Table {
    name: "leads",
    columns: &[
        gateway_column!("id", &SqlType::Integer, is_primary_key = true),
        gateway_column!("lead_id", &SqlType::Text, non_null = true, is_unique = true),
        gateway_column!("name", &SqlType::Text, non_null = true),
        gateway_column!("phone", &SqlType::Text),
        gateway_column!("email", &SqlType::Text),
        gateway_column!("source", &SqlType::Text),
        gateway_column!("pipeline_id", &SqlType::Text, non_null = true),
        gateway_column!("stage", &SqlType::Text, non_null = true),
        gateway_column!("value", &SqlType::Real),
        gateway_column!("notes", &SqlType::Text),
        gateway_column!("created_at", &SqlType::Text, non_null = true),
        gateway_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_leads_lead_id", "lead_id"),
        ("idx_leads_stage", "stage"),
        ("idx_leads_pipeline", "pipeline_id"),
    ],
};

const APPOINTMENTS_TABLE_V1: Table = Table {
    name: "appointments",
    columns: &[
        gateway_column!("id", &SqlType::Integer, is_primary_key = true),
        gateway_column!(
            "appointment_id",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        gateway_column!("lead_id", &SqlType::Text),
        gateway_column!("title", &SqlType::Text, non_null = true),
        gateway_column!("scheduled_at", &SqlType::Text, non_null = true),
        gateway_column!("status", &SqlType::Text, non_null = true),
        gateway_column!("notes", &SqlType::Text),
        gateway_column!("created_at", &SqlType::Text, non_null = true),
        gateway_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_appointments_appointment_id", "appointment_id"),
        ("idx_appointments_status", "status"),
        ("idx_appointments_scheduled_at", "scheduled_at"),
    ],
};

const PRODUCTS_TABLE_V1: Table = Table {
    name: "products",
    columns: &[
        gateway_column!("id", &SqlType::Integer, is_primary_key = true),
        gateway_column!(
            "product_id",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        gateway_column!("name", &SqlType::Text, non_null = true),
        gateway_column!("category", &SqlType::Text),
        gateway_column!("sku", &SqlType::Text),
        gateway_column!("price", &SqlType::Real, non_null = true),
        gateway_column!("stock", &SqlType::Integer, default_value = Some("0")),
        gateway_column!("description", &SqlType::Text),
        gateway_column!("created_at", &SqlType::Text, non_null = true),
        gateway_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_products_product_id", "product_id"),
        ("idx_products_category", "category"),
    ],
};

const PIPELINES_TABLE_V1: Table = Table {
    name: "pipelines",
    columns: &[
        gateway_column!("id", &SqlType::Integer, is_primary_key = true),
        gateway_column!(
            "pipeline_id",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        gateway_column!("name", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

/// Stage catalog: the legal `stage` values for each pipeline, ordered by
/// `position`. The stored casing is canonical.
const PIPELINE_STAGES_TABLE_V1: Table = Table {
    name: "pipeline_stages",
    columns: &[
        gateway_column!("id", &SqlType::Integer, is_primary_key = true),
        gateway_column!("pipeline_id", &SqlType::Text, non_null = true),
        gateway_column!("name", &SqlType::Text, non_null = true),
        gateway_column!("position", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_pipeline_stages_pipeline", "pipeline_id, position")],
};

const AGENTS_TABLE_V1: Table = Table {
    name: "agents",
    columns: &[
        gateway_column!("id", &SqlType::Integer, is_primary_key = true),
        gateway_column!(
            "agent_id",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        gateway_column!("name", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

/// Per-agent, per-module tool grants. `tools` is a JSON array of tool names,
/// order preserved. Administered outside the gateway; read-only here.
const AGENT_PERMISSIONS_TABLE_V1: Table = Table {
    name: "agent_permissions",
    columns: &[
        gateway_column!("id", &SqlType::Integer, is_primary_key = true),
        gateway_column!("agent_id", &SqlType::Text, non_null = true),
        gateway_column!("module", &SqlType::Text, non_null = true),
        gateway_column!("enabled", &SqlType::Integer, default_value = Some("0")),
        gateway_column!("tools", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_agent_permissions_agent", "agent_id, module")],
};

/// Append-only invocation log. Never updated or deleted by the gateway.
const AUDIT_LOG_TABLE_V1: Table = Table {
    name: "audit_log",
    columns: &[
        gateway_column!("id", &SqlType::Integer, is_primary_key = true),
        gateway_column!("agent_id", &SqlType::Text, non_null = true),
        gateway_column!("agent_name", &SqlType::Text, non_null = true),
        gateway_column!("module", &SqlType::Text, non_null = true),
        gateway_column!("action", &SqlType::Text, non_null = true),
        gateway_column!("result", &SqlType::Text, non_null = true),
        gateway_column!("user_context", &SqlType::Text),
        gateway_column!("details", &SqlType::Text),
        gateway_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_audit_log_agent", "agent_id, created_at"),
        ("idx_audit_log_module", "module, created_at"),
    ],
};

pub const GATEWAY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        LEADS_TABLE_V1,
        APPOINTMENTS_TABLE_V1,
        PRODUCTS_TABLE_V1,
        PIPELINES_TABLE_V1,
        PIPELINE_STAGES_TABLE_V1,
        AGENTS_TABLE_V1,
        AGENT_PERMISSIONS_TABLE_V1,
        AUDIT_LOG_TABLE_V1,
    ],
    migration: None,
}];

/// The tables reachable through the generic [`crate::store::DataStore`]
/// interface. Identifier validation checks against this list before any SQL
/// is interpolated.
pub fn current_tables() -> &'static [Table] {
    GATEWAY_VERSIONED_SCHEMAS
        .last()
        .expect("at least one schema version")
        .tables
}
