use async_trait::async_trait;
use auris_core::types::Agent;
use serde_json::Value;

use crate::error::Result;

/// Lifecycle contract every plugin implements: `validate_config` normalizes
/// raw JSON config, `initialize`/`start` bring the plugin up, `stop` tears
/// it down. `on_message`/`on_response` are optional fan-out hooks the
/// manager calls for every session event; plugins that don't care about
/// them keep the default no-op.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn validate_config(&self, config: &Value) -> Result<Value>;

    async fn initialize(&mut self, agent: &Agent, config: Value) -> Result<()>;

    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    async fn on_message(&self, _session_id: &str, _text: &str, _metadata: &Value) {}

    async fn on_response(&self, _session_id: &str, _text: &str, _metadata: &Value) {}

    fn is_running(&self) -> bool;
}

/// Constructs a fresh, uninitialized plugin instance. Registered once per
/// plugin type; the manager calls it every time an agent enables that type.
pub type PluginFactory = std::sync::Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;
