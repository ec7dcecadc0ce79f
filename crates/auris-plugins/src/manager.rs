use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use auris_core::ids::AgentId;
use auris_core::types::Agent;
use auris_vault::Vault;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::registry;
use crate::resource_monitor::{ResourceMonitor, ResourceMonitorConfig};
use crate::types::Plugin;

/// One entry per active (agent, plugin_type) pair; `initialize`/`start`/
/// `stop` need `&mut self`, so the instance lives behind its own lock
/// rather than the outer map's.
type ActivePlugin = Arc<Mutex<Box<dyn Plugin>>>;
type ActiveTable = Arc<DashMap<AgentId, DashMap<String, ActivePlugin>>>;

/// Manages plugin lifecycle for every agent (C10), grounded on
/// `PluginManager`: `initialize_agent_plugins`/`stop_agent_plugins` own
/// the active-plugin table, `dispatch_message`/`dispatch_response` fan out
/// with per-plugin failure isolation, and a `ResourceMonitor` kills any
/// plugin that sustains resource violations.
pub struct PluginManager {
    active: ActiveTable,
    vault: Arc<Vault>,
    dispatch_timeout: Duration,
    monitor: Arc<ResourceMonitor>,
}

impl PluginManager {
    pub fn new(vault: Arc<Vault>, monitor_config: auris_core::config::PluginConfig) -> Arc<Self> {
        let active: ActiveTable = Arc::new(DashMap::new());
        let active_for_kill = active.clone();

        let monitor = ResourceMonitor::new(
            ResourceMonitorConfig {
                cpu_limit_percent: monitor_config.cpu_limit_percent,
                memory_limit_mb: monitor_config.memory_limit_mb,
                sample_interval: Duration::from_secs(monitor_config.sample_interval_secs),
                violation_threshold: monitor_config.violation_threshold,
            },
            Arc::new(move |agent_id: AgentId, plugin_type: String| {
                let active = active_for_kill.clone();
                tokio::spawn(async move {
                    if let Some(agent_plugins) = active.get(&agent_id) {
                        if let Some((_, plugin)) = agent_plugins.remove(&plugin_type) {
                            error!(%agent_id, %plugin_type, "killing plugin due to sustained resource violations");
                            if let Err(e) = plugin.lock().await.stop().await {
                                error!(%agent_id, %plugin_type, error = %e, "error stopping plugin during forced kill");
                            }
                        }
                    }
                });
            }),
        );

        Arc::new(Self {
            active,
            vault,
            dispatch_timeout: Duration::from_secs(monitor_config.dispatch_timeout_secs),
            monitor,
        })
    }

    pub async fn start_resource_monitor(self: &Arc<Self>) {
        self.monitor.start().await;
    }

    /// Initializes every enabled plugin configured on `agent`. Any stage
    /// (decrypt, registry lookup, validate, initialize, start) failing
    /// records that plugin as failed and moves on to the next one.
    pub async fn initialize_agent_plugins(&self, agent: &Agent) -> HashMap<String, bool> {
        let mut results = HashMap::new();

        if agent.plugins.is_empty() {
            info!(agent = %agent.name, "agent has no plugins configured");
            return results;
        }

        info!(agent = %agent.name, agent_id = %agent.id, "initializing plugins");

        for (plugin_type, raw_config) in &agent.plugins {
            match self.initialize_one(agent, plugin_type, raw_config).await {
                Ok(started) => {
                    if started {
                        info!(agent = %agent.name, plugin_type, "plugin started");
                    }
                    results.insert(plugin_type.clone(), started);
                }
                Err(e) => {
                    warn!(agent = %agent.name, plugin_type, error = %e, "failed to initialize plugin");
                    results.insert(plugin_type.clone(), false);
                }
            }
        }

        results
    }

    async fn initialize_one(&self, agent: &Agent, plugin_type: &str, raw_config: &Value) -> crate::error::Result<bool> {
        let decrypted = self.vault.decrypt_config(plugin_type, raw_config)?;

        let enabled = decrypted.get("enabled").and_then(Value::as_bool).unwrap_or(false);
        if !enabled {
            info!(agent = %agent.name, plugin_type, "plugin disabled, skipping");
            return Ok(false);
        }

        let Some(factory) = registry::get(plugin_type) else {
            warn!(agent = %agent.name, plugin_type, "plugin type not registered");
            return Ok(false);
        };

        let mut plugin = factory();
        let validated = plugin
            .validate_config(&decrypted)
            .map_err(|e| crate::error::PluginError::InvalidConfig(e.to_string()))?;

        plugin.initialize(agent, validated).await?;
        plugin.start().await?;

        let entry = self.active.entry(agent.id.clone()).or_insert_with(DashMap::new);
        entry.insert(plugin_type.to_string(), Arc::new(Mutex::new(plugin)));
        self.monitor.register_plugin(agent.id.clone(), plugin_type);

        Ok(true)
    }

    pub async fn stop_agent_plugins(&self, agent_id: &AgentId) -> HashMap<String, bool> {
        let mut results = HashMap::new();

        let Some((_, plugins)) = self.active.remove(agent_id) else {
            return results;
        };

        for (plugin_type, plugin) in plugins {
            self.monitor.unregister_plugin(agent_id.clone(), &plugin_type);
            match plugin.lock().await.stop().await {
                Ok(()) => {
                    info!(%agent_id, %plugin_type, "plugin stopped");
                    results.insert(plugin_type, true);
                }
                Err(e) => {
                    error!(%agent_id, %plugin_type, error = %e, "error stopping plugin");
                    results.insert(plugin_type, false);
                }
            }
        }

        results
    }

    pub async fn restart_plugin(&self, agent: &Agent, plugin_type: &str) -> bool {
        info!(agent = %agent.name, plugin_type, "restarting plugin");

        if let Some(agent_plugins) = self.active.get(&agent.id) {
            if let Some((_, plugin)) = agent_plugins.remove(plugin_type) {
                self.monitor.unregister_plugin(agent.id.clone(), plugin_type);
                if let Err(e) = plugin.lock().await.stop().await {
                    error!(agent_id = %agent.id, plugin_type, error = %e, "error stopping plugin during restart");
                }
            }
        }

        let Some(raw_config) = agent.plugins.get(plugin_type) else {
            return false;
        };

        matches!(self.initialize_one(agent, plugin_type, raw_config).await, Ok(true))
    }

    /// Fans `on_message` out to every active plugin for `agent_id`, each
    /// in its own task so one panicking or hanging plugin can't block the
    /// others; the whole fan-out is bounded by `dispatch_timeout`.
    pub async fn dispatch_message(&self, agent_id: &AgentId, session_id: &str, text: &str, metadata: &Value) {
        let Some(plugins) = self.active.get(agent_id) else {
            return;
        };

        let handles: Vec<_> = plugins
            .iter()
            .map(|entry| {
                let plugin = entry.value().clone();
                let plugin_type = entry.key().clone();
                let session_id = session_id.to_string();
                let text = text.to_string();
                let metadata = metadata.clone();
                (
                    plugin_type,
                    tokio::spawn(async move {
                        plugin.lock().await.on_message(&session_id, &text, &metadata).await;
                    }),
                )
            })
            .collect();

        self.await_dispatch(handles).await;
    }

    pub async fn dispatch_response(&self, agent_id: &AgentId, session_id: &str, text: &str, metadata: &Value) {
        let Some(plugins) = self.active.get(agent_id) else {
            return;
        };

        let handles: Vec<_> = plugins
            .iter()
            .map(|entry| {
                let plugin = entry.value().clone();
                let plugin_type = entry.key().clone();
                let session_id = session_id.to_string();
                let text = text.to_string();
                let metadata = metadata.clone();
                (
                    plugin_type,
                    tokio::spawn(async move {
                        plugin.lock().await.on_response(&session_id, &text, &metadata).await;
                    }),
                )
            })
            .collect();

        self.await_dispatch(handles).await;
    }

    async fn await_dispatch(&self, handles: Vec<(String, tokio::task::JoinHandle<()>)>) {
        if handles.is_empty() {
            return;
        }
        let (plugin_types, futures): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        if let Ok(results) = tokio::time::timeout(self.dispatch_timeout, futures_util::future::join_all(futures)).await {
            for (plugin_type, result) in plugin_types.into_iter().zip(results) {
                if let Err(e) = result {
                    warn!(%plugin_type, error = %e, "plugin panicked during event dispatch");
                }
            }
        } else {
            warn!(dispatch_timeout = ?self.dispatch_timeout, "plugin dispatch timed out");
        }
    }

    pub fn get_plugin(&self, agent_id: &AgentId, plugin_type: &str) -> Option<ActivePlugin> {
        self.active.get(agent_id)?.get(plugin_type).map(|e| e.value().clone())
    }

    pub async fn shutdown(&self) {
        info!("shutting down all plugins");
        self.monitor.stop().await;

        let agent_ids: Vec<AgentId> = self.active.iter().map(|e| e.key().clone()).collect();
        for agent_id in agent_ids {
            self.stop_agent_plugins(&agent_id).await;
        }
        info!("all plugins shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use auris_core::ids::AgentId;
    use auris_core::types::{Agent, LlmConfig, MemoryScope, ProviderKind, TtsVoiceConfig};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    struct RecordingPlugin {
        running: AtomicBool,
        message_count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for RecordingPlugin {
        fn validate_config(&self, config: &Value) -> crate::error::Result<Value> {
            if config.get("webhook_url").is_none() {
                return Err(crate::error::PluginError::InvalidConfig("missing webhook_url".to_string()));
            }
            Ok(config.clone())
        }

        async fn initialize(&mut self, _agent: &Agent, _config: Value) -> crate::error::Result<()> {
            Ok(())
        }

        async fn start(&mut self) -> crate::error::Result<()> {
            self.running.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&mut self) -> crate::error::Result<()> {
            self.running.store(false, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        async fn on_message(&self, _session_id: &str, _text: &str, _metadata: &Value) {
            self.message_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn is_running(&self) -> bool {
            self.running.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    fn test_agent(plugins: HashMap<String, Value>) -> Agent {
        Agent {
            id: AgentId::new("test-agent"),
            name: "Test Agent".to_string(),
            llm: LlmConfig {
                provider_kind: ProviderKind::Local,
                model: "test-model".to_string(),
                temperature: 0.7,
                provider_ref: None,
            },
            tts: TtsVoiceConfig {
                voice: "default".to_string(),
                exaggeration: 0.5,
                cfg_weight: 0.5,
                temperature: 0.5,
                language: "en".to_string(),
            },
            system_prompt: "you are a test agent".to_string(),
            memory_scope: MemoryScope::Agent,
            plugins,
            is_default: false,
        }
    }

    fn test_manager() -> Arc<PluginManager> {
        let vault = Arc::new(Vault::new(None));
        PluginManager::new(
            vault,
            auris_core::config::PluginConfig {
                cpu_limit_percent: 50.0,
                memory_limit_mb: 500.0,
                sample_interval_secs: 3600,
                violation_threshold: 3,
                dispatch_timeout_secs: 5,
            },
        )
    }

    #[tokio::test]
    async fn initializes_and_dispatches_to_an_enabled_plugin() {
        registry::clear();
        let message_count = Arc::new(AtomicUsize::new(0));
        let counter = message_count.clone();
        registry::register(
            "webhook",
            Arc::new(move || {
                Box::new(RecordingPlugin {
                    running: AtomicBool::new(false),
                    message_count: counter.clone(),
                }) as Box<dyn Plugin>
            }),
        );

        let mut plugins = HashMap::new();
        plugins.insert("webhook".to_string(), json!({"enabled": true, "webhook_url": "https://example.test/hook"}));
        let agent = test_agent(plugins);

        let manager = test_manager();
        let results = manager.initialize_agent_plugins(&agent).await;
        assert_eq!(results.get("webhook"), Some(&true));

        manager.dispatch_message(&agent.id, "session-1", "hello", &json!({})).await;
        assert_eq!(message_count.load(std::sync::atomic::Ordering::SeqCst), 1);

        let stopped = manager.stop_agent_plugins(&agent.id).await;
        assert_eq!(stopped.get("webhook"), Some(&true));
    }

    #[tokio::test]
    async fn disabled_plugin_is_skipped_without_error() {
        registry::clear();
        registry::register(
            "webhook",
            Arc::new(|| {
                Box::new(RecordingPlugin {
                    running: AtomicBool::new(false),
                    message_count: Arc::new(AtomicUsize::new(0)),
                }) as Box<dyn Plugin>
            }),
        );

        let mut plugins = HashMap::new();
        plugins.insert("webhook".to_string(), json!({"enabled": false}));
        let agent = test_agent(plugins);

        let manager = test_manager();
        let results = manager.initialize_agent_plugins(&agent).await;
        assert_eq!(results.get("webhook"), Some(&false));
        assert!(manager.get_plugin(&agent.id, "webhook").is_none());
    }

    #[tokio::test]
    async fn unregistered_plugin_type_fails_without_aborting_others() {
        registry::clear();
        registry::register(
            "webhook",
            Arc::new(|| {
                Box::new(RecordingPlugin {
                    running: AtomicBool::new(false),
                    message_count: Arc::new(AtomicUsize::new(0)),
                }) as Box<dyn Plugin>
            }),
        );

        let mut plugins = HashMap::new();
        plugins.insert("webhook".to_string(), json!({"enabled": true, "webhook_url": "https://example.test/hook"}));
        plugins.insert("unknown_type".to_string(), json!({"enabled": true}));
        let agent = test_agent(plugins);

        let manager = test_manager();
        let results = manager.initialize_agent_plugins(&agent).await;
        assert_eq!(results.get("webhook"), Some(&true));
        assert_eq!(results.get("unknown_type"), Some(&false));
    }

    #[tokio::test]
    async fn invalid_config_is_recorded_as_failed() {
        registry::clear();
        registry::register(
            "webhook",
            Arc::new(|| {
                Box::new(RecordingPlugin {
                    running: AtomicBool::new(false),
                    message_count: Arc::new(AtomicUsize::new(0)),
                }) as Box<dyn Plugin>
            }),
        );

        let mut plugins = HashMap::new();
        plugins.insert("webhook".to_string(), json!({"enabled": true}));
        let agent = test_agent(plugins);

        let manager = test_manager();
        let results = manager.initialize_agent_plugins(&agent).await;
        assert_eq!(results.get("webhook"), Some(&false));
    }
}
