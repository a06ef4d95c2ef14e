//! Domain modules plugged into the gateway engine.
//!
//! Each module contributes a [`ModuleRegistry`] (capability catalog + tool
//! handlers); the engine serves all of them from the same dispatcher under
//! their server names.

pub mod appointments;
pub mod leads;
pub mod products;
pub mod stats;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::gateway::registry::ModuleRegistry;

/// Build every module registry, keyed by server name.
pub fn build_registries() -> HashMap<String, Arc<ModuleRegistry>> {
    let mut modules = HashMap::new();
    for registry in [
        leads::build_registry(),
        appointments::build_registry(),
        products::build_registry(),
    ] {
        info!(
            "Registered module {} with {} tools and {} resources",
            registry.server_name(),
            registry.tool_count(),
            registry.resource_count()
        );
        modules.insert(registry.server_name().to_string(), Arc::new(registry));
    }
    modules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_modules_are_registered() {
        let modules = build_registries();
        assert_eq!(modules.len(), 3);
        assert!(modules.contains_key("leads-server"));
        assert!(modules.contains_key("appointments-server"));
        assert!(modules.contains_key("products-server"));
    }
}
