//! Audit logging for tool invocations.
//!
//! Every `tools/call` that reaches the agent lookup produces exactly one
//! entry, whether it was granted, denied, or errored. Writes are best-effort:
//! a failed append is logged and the response proceeds (the audit write and
//! the business mutation are independent store calls, not one transaction).

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::error;

/// Outcome recorded for one invocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Error,
    Denied,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOutcome::Success => "Success",
            AuditOutcome::Error => "Error",
            AuditOutcome::Denied => "Denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Success" => Some(AuditOutcome::Success),
            "Error" => Some(AuditOutcome::Error),
            "Denied" => Some(AuditOutcome::Denied),
            _ => None,
        }
    }
}

/// One invocation attempt, ready to append. `created_at` is stamped by the
/// sink at insert time.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub agent_id: String,
    pub agent_name: String,
    pub module: String,
    pub action: String,
    pub result: AuditOutcome,
    pub user_context: Option<String>,
    pub details: Option<Value>,
}

impl AuditEntry {
    pub fn new(
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        module: impl Into<String>,
        action: impl Into<String>,
        result: AuditOutcome,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            module: module.into(),
            action: action.into(),
            result,
            user_context: None,
            details: None,
        }
    }

    pub fn with_user_context(mut self, user_context: Option<String>) -> Self {
        self.user_context = user_context;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// An entry as read back from the log.
#[derive(Debug, Clone)]
pub struct StoredAuditEntry {
    pub id: i64,
    pub agent_id: String,
    pub agent_name: String,
    pub module: String,
    pub action: String,
    pub result: AuditOutcome,
    pub user_context: Option<String>,
    pub details: Option<Value>,
    pub created_at: String,
}

/// Append-only audit sink. The gateway never updates or deletes entries.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> Result<i64>;

    /// Most recent entries, newest first. Read side for operability only.
    fn recent(&self, limit: usize) -> Result<Vec<StoredAuditEntry>>;
}

/// Best-effort writer used by the dispatcher.
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Append the entry, swallowing sink failures after logging them.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.sink.append(&entry) {
            error!(
                "Failed to write audit entry for agent {} action {}: {}",
                entry.agent_id, entry.action, e
            );
        }
    }
}
