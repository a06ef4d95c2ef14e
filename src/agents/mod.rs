//! Agent directory and permission records.
//!
//! Agents are the autonomous callers of the gateway. Their permission records
//! map a module server name (e.g. "leads-server") to the set of tool names
//! the agent may invoke there. The records are administered outside the
//! gateway; this module only reads them.

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A registered agent. The name is used for audit-log attribution only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub agent_id: String,
    pub name: String,
}

/// Per-module grant: which tools an agent may call on one module server.
///
/// A tool name absent from `tools` is denied, whatever the catalog declares.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleAccess {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub tools: Vec<String>,
}

impl ModuleAccess {
    pub fn allows(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|t| t == tool_name)
    }
}

/// Read-only access to the agent directory and permission records.
pub trait AgentDirectory: Send + Sync {
    fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>>;

    /// The agent's full permission record, keyed by module server name.
    /// Modules without a sub-record are implicitly `{ enabled: false,
    /// tools: [] }`.
    fn get_permissions(&self, agent_id: &str) -> Result<HashMap<String, ModuleAccess>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_access_membership() {
        let access = ModuleAccess {
            enabled: true,
            tools: vec!["get_leads".to_string(), "create_lead".to_string()],
        };
        assert!(access.allows("get_leads"));
        assert!(!access.allows("delete_lead"));
    }

    #[test]
    fn default_access_denies_everything() {
        let access = ModuleAccess::default();
        assert!(!access.allows("get_leads"));
        assert!(!access.enabled);
    }

    #[test]
    fn module_access_decodes_from_json() {
        let access: ModuleAccess =
            serde_json::from_str(r#"{"enabled":true,"tools":["get_leads"]}"#).unwrap();
        assert!(access.enabled);
        assert_eq!(access.tools, vec!["get_leads"]);
    }

    #[test]
    fn module_access_decodes_with_missing_fields() {
        let access: ModuleAccess = serde_json::from_str("{}").unwrap();
        assert!(!access.enabled);
        assert!(access.tools.is_empty());
    }
}
