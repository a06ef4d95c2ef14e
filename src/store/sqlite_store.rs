//! SQLite-backed gateway store.
//!
//! One connection serves the three store-facing traits: the generic
//! [`DataStore`] used by module handlers, the [`AgentDirectory`] the
//! permission gate reads, and the append-only [`AuditSink`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, params_from_iter, types::ValueRef, Connection, OptionalExtension};
use serde_json::Value;
use tracing::info;

use super::schema::{current_tables, GATEWAY_VERSIONED_SCHEMAS};
use super::versioned_schema::{Table, BASE_DB_VERSION};
use super::{DataStore, Filter, Row, StoreError};
use crate::agents::{Agent, AgentDirectory, ModuleAccess};
use crate::audit::{AuditEntry, AuditOutcome, AuditSink, StoredAuditEntry};

pub struct SqliteGatewayStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGatewayStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open gateway database")?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        if is_new_db {
            info!("Creating new gateway database at {:?}", path);
            GATEWAY_VERSIONED_SCHEMAS.last().unwrap().create(&conn)?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION as i64;

            if db_version < 1 {
                anyhow::bail!(
                    "Gateway database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let current_schema_version = GATEWAY_VERSIONED_SCHEMAS.last().unwrap().version as i64;

            let version_index = GATEWAY_VERSIONED_SCHEMAS
                .iter()
                .position(|s| s.version == db_version as usize)
                .with_context(|| format!("Unknown gateway database version {}", db_version))?;
            GATEWAY_VERSIONED_SCHEMAS[version_index]
                .validate(&conn)
                .with_context(|| {
                    format!(
                        "Gateway database schema validation failed for version {}",
                        db_version
                    )
                })?;

            if db_version < current_schema_version {
                info!(
                    "Migrating gateway database from version {} to {}",
                    db_version, current_schema_version
                );
                Self::migrate_if_needed(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        GATEWAY_VERSIONED_SCHEMAS.last().unwrap().create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut latest_from = from_version;
        for schema in GATEWAY_VERSIONED_SCHEMAS.iter() {
            if schema.version > from_version {
                info!(
                    "Running gateway database migration from version {} to {}",
                    latest_from, schema.version
                );
                if let Some(migration_fn) = schema.migration {
                    migration_fn(&tx).with_context(|| {
                        format!("Failed to run migration to version {}", schema.version)
                    })?;
                }
                latest_from = schema.version;
            }
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Seed the default pipeline and its stage catalog on an empty database,
    /// so stage validation has something to validate against.
    pub fn seed_default_pipeline(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM pipelines", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(());
        }

        info!("Seeding default sales pipeline");
        conn.execute(
            "INSERT INTO pipelines (pipeline_id, name) VALUES (?1, ?2)",
            params!["default", "Default Sales Pipeline"],
        )?;
        for (position, stage) in ["New", "Contacted", "Qualified", "Won", "Lost"]
            .iter()
            .enumerate()
        {
            conn.execute(
                "INSERT INTO pipeline_stages (pipeline_id, name, position) VALUES (?1, ?2, ?3)",
                params!["default", stage, position as i64],
            )?;
        }
        Ok(())
    }

    fn table_def(table: &str) -> Result<&'static Table, StoreError> {
        current_tables()
            .iter()
            .find(|t| t.name == table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    fn check_column(table_def: &Table, column: &str) -> Result<(), StoreError> {
        if table_def.column_names().any(|c| c == column) {
            Ok(())
        } else {
            Err(StoreError::UnknownColumn {
                table: table_def.name.to_string(),
                column: column.to_string(),
            })
        }
    }

    fn where_clause(
        table_def: &Table,
        filters: &[Filter],
        first_param: usize,
    ) -> Result<(String, Vec<rusqlite::types::Value>), StoreError> {
        if filters.is_empty() {
            return Ok((String::new(), Vec::new()));
        }
        let mut clauses = Vec::with_capacity(filters.len());
        let mut values = Vec::with_capacity(filters.len());
        for (i, filter) in filters.iter().enumerate() {
            Self::check_column(table_def, &filter.column)?;
            clauses.push(format!("{} = ?{}", filter.column, first_param + i));
            values.push(json_to_sql(&filter.value));
        }
        Ok((format!(" WHERE {}", clauses.join(" AND ")), values))
    }
}

/// Bind a JSON value as a SQLite value. Arrays and objects are stored as
/// JSON text.
fn json_to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as SqlValue;
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

impl DataStore for SqliteGatewayStore {
    fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError> {
        let table_def = Self::table_def(table)?;
        let (where_sql, values) = Self::where_clause(table_def, filters, 1)?;

        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT * FROM {}{} ORDER BY id ASC", table, where_sql);
        let mut stmt = conn.prepare(&sql)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let mut map = Row::new();
                for (i, name) in column_names.iter().enumerate() {
                    map.insert(name.clone(), sql_to_json(row.get_ref(i)?));
                }
                Ok(map)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    fn insert(&self, table: &str, row: &Row) -> Result<i64, StoreError> {
        let table_def = Self::table_def(table)?;

        let mut columns = Vec::with_capacity(row.len());
        let mut placeholders = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (i, (column, value)) in row.iter().enumerate() {
            Self::check_column(table_def, column)?;
            columns.push(column.as_str());
            placeholders.push(format!("?{}", i + 1));
            values.push(json_to_sql(value));
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders.join(", ")
            ),
            params_from_iter(values.iter()),
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update(&self, table: &str, filters: &[Filter], changes: &Row) -> Result<usize, StoreError> {
        if changes.is_empty() {
            return Ok(0);
        }
        let table_def = Self::table_def(table)?;

        let mut set_clauses = Vec::with_capacity(changes.len());
        let mut values = Vec::with_capacity(changes.len() + filters.len());
        for (i, (column, value)) in changes.iter().enumerate() {
            Self::check_column(table_def, column)?;
            set_clauses.push(format!("{} = ?{}", column, i + 1));
            values.push(json_to_sql(value));
        }
        let (where_sql, filter_values) =
            Self::where_clause(table_def, filters, changes.len() + 1)?;
        values.extend(filter_values);

        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            &format!("UPDATE {} SET {}{}", table, set_clauses.join(", "), where_sql),
            params_from_iter(values.iter()),
        )?;
        Ok(count)
    }

    fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, StoreError> {
        let table_def = Self::table_def(table)?;
        let (where_sql, values) = Self::where_clause(table_def, filters, 1)?;

        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            &format!("DELETE FROM {}{}", table, where_sql),
            params_from_iter(values.iter()),
        )?;
        Ok(count)
    }
}

impl AgentDirectory for SqliteGatewayStore {
    fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        let conn = self.conn.lock().unwrap();
        let agent = conn
            .query_row(
                "SELECT agent_id, name FROM agents WHERE agent_id = ?1",
                params![agent_id],
                |row| {
                    Ok(Agent {
                        agent_id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(agent)
    }

    fn get_permissions(&self, agent_id: &str) -> Result<HashMap<String, ModuleAccess>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT module, enabled, tools FROM agent_permissions WHERE agent_id = ?1",
        )?;

        let records = stmt
            .query_map(params![agent_id], |row| {
                let module: String = row.get(0)?;
                let enabled: i64 = row.get(1)?;
                let tools_json: String = row.get(2)?;
                Ok((module, enabled != 0, tools_json))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut permissions = HashMap::new();
        for (module, enabled, tools_json) in records {
            let tools: Vec<String> = serde_json::from_str(&tools_json)
                .with_context(|| format!("Malformed tools list for module {}", module))?;
            permissions.insert(module, ModuleAccess { enabled, tools });
        }
        Ok(permissions)
    }
}

impl AuditSink for SqliteGatewayStore {
    fn append(&self, entry: &AuditEntry) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let details = entry.details.as_ref().map(|d| d.to_string());

        conn.execute(
            "INSERT INTO audit_log (agent_id, agent_name, module, action, result, user_context, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.agent_id,
                entry.agent_name,
                entry.module,
                entry.action,
                entry.result.as_str(),
                entry.user_context,
                details,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent(&self, limit: usize) -> Result<Vec<StoredAuditEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, agent_name, module, action, result, user_context, details, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;

        let entries = stmt
            .query_map(params![limit as i64], |row| {
                let result_str: String = row.get(5)?;
                let details_str: Option<String> = row.get(7)?;
                Ok(StoredAuditEntry {
                    id: row.get(0)?,
                    agent_id: row.get(1)?,
                    agent_name: row.get(2)?,
                    module: row.get(3)?,
                    action: row.get(4)?,
                    result: AuditOutcome::parse(&result_str).unwrap_or(AuditOutcome::Error),
                    user_context: row.get(6)?,
                    details: details_str.and_then(|s| serde_json::from_str(&s).ok()),
                    created_at: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }
}
