//! Global plugin-type registry, ported from `PluginRegistry` /
//! `@plugin(type)` of the source system. Third-party plugin crates
//! register their factory at startup instead of relying on import-time
//! decoration, since Rust has no runtime module auto-discovery.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::types::PluginFactory;

static REGISTRY: Lazy<Mutex<HashMap<String, PluginFactory>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Registers a plugin type. Re-registering the same type overwrites the
/// previous factory (matches the source's "last registration wins, with
/// a warning" behavior, minus the warning since callers control this
/// explicitly rather than via decorator side effects).
pub fn register(plugin_type: impl Into<String>, factory: PluginFactory) {
    let plugin_type = plugin_type.into();
    let mut registry = REGISTRY.lock().expect("plugin registry mutex poisoned");
    if registry.contains_key(&plugin_type) {
        tracing::warn!(plugin_type = %plugin_type, "overriding existing plugin registration");
    }
    registry.insert(plugin_type, factory);
}

pub fn unregister(plugin_type: &str) -> bool {
    REGISTRY
        .lock()
        .expect("plugin registry mutex poisoned")
        .remove(plugin_type)
        .is_some()
}

pub fn get(plugin_type: &str) -> Option<PluginFactory> {
    REGISTRY.lock().expect("plugin registry mutex poisoned").get(plugin_type).cloned()
}

pub fn is_registered(plugin_type: &str) -> bool {
    REGISTRY.lock().expect("plugin registry mutex poisoned").contains_key(plugin_type)
}

pub fn list() -> Vec<String> {
    REGISTRY.lock().expect("plugin registry mutex poisoned").keys().cloned().collect()
}

#[cfg(test)]
pub fn clear() {
    REGISTRY.lock().expect("plugin registry mutex poisoned").clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Plugin;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Noop;

    #[async_trait]
    impl Plugin for Noop {
        fn validate_config(&self, config: &Value) -> crate::error::Result<Value> {
            Ok(config.clone())
        }
        async fn initialize(&mut self, _agent: &auris_core::types::Agent, _config: Value) -> crate::error::Result<()> {
            Ok(())
        }
        async fn start(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
        async fn stop(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
        fn is_running(&self) -> bool {
            false
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        clear();
        register("noop", std::sync::Arc::new(|| Box::new(Noop) as Box<dyn Plugin>));
        assert!(is_registered("noop"));
        assert!(get("noop").is_some());
        assert_eq!(list(), vec!["noop".to_string()]);
    }

    #[test]
    fn unregistering_removes_the_type() {
        clear();
        register("noop", std::sync::Arc::new(|| Box::new(Noop) as Box<dyn Plugin>));
        assert!(unregister("noop"));
        assert!(!is_registered("noop"));
    }

    #[test]
    fn unknown_type_has_no_factory() {
        clear();
        assert!(get("totally_unknown").is_none());
    }
}
