//! Per-plugin-type sensitive field registry, ported from
//! `PluginEncryption.SENSITIVE_FIELDS` in the source system. Mutable so
//! third-party plugin types can register their own fields at startup.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use once_cell::sync::Lazy;

static REGISTRY: Lazy<Mutex<HashMap<String, HashSet<String>>>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("discord".to_string(), set(&["bot_token"]));
    m.insert("n8n".to_string(), set(&["webhook_url"]));
    m.insert(
        "slack".to_string(),
        set(&["bot_token", "signing_secret", "app_token"]),
    );
    m.insert("telegram".to_string(), set(&["bot_token"]));
    m.insert("whatsapp".to_string(), set(&["api_key", "phone_number"]));
    m.insert(
        "api".to_string(),
        set(&["api_key", "api_secret", "oauth_token"]),
    );
    Mutex::new(m)
});

fn set(fields: &[&str]) -> HashSet<String> {
    fields.iter().map(|s| s.to_string()).collect()
}

/// Fields for `plugin_type` that should be encrypted before storage.
/// Returns an empty set for unregistered plugin types.
pub fn sensitive_fields_for(plugin_type: &str) -> HashSet<String> {
    REGISTRY
        .lock()
        .expect("registry mutex poisoned")
        .get(plugin_type)
        .cloned()
        .unwrap_or_default()
}

/// Registers additional sensitive fields for a plugin type, merging with
/// any existing entry rather than replacing it.
pub fn register_sensitive_fields(plugin_type: &str, fields: &[&str]) {
    let mut registry = REGISTRY.lock().expect("registry mutex poisoned");
    registry
        .entry(plugin_type.to_string())
        .or_default()
        .extend(fields.iter().map(|s| s.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_plugin_types_have_their_documented_fields() {
        let fields = sensitive_fields_for("slack");
        assert!(fields.contains("bot_token"));
        assert!(fields.contains("signing_secret"));
        assert!(fields.contains("app_token"));
    }

    #[test]
    fn unknown_plugin_type_has_no_sensitive_fields() {
        assert!(sensitive_fields_for("totally_unknown_plugin").is_empty());
    }

    #[test]
    fn registering_new_fields_merges_with_existing_entry() {
        register_sensitive_fields("discord", &["webhook_secret"]);
        let fields = sensitive_fields_for("discord");
        assert!(fields.contains("bot_token"));
        assert!(fields.contains("webhook_secret"));
    }
}
