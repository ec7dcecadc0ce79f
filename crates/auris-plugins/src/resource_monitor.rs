//! Resource monitor, ported from `PluginResourceMonitor`: samples the
//! process's own CPU/memory on an interval and divides it equally across
//! every registered plugin (there's no per-task attribution available
//! without spawning plugins into separate OS processes, so the source's
//! "simplified - equal distribution" approach is kept as-is).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use auris_core::ids::AgentId;
use dashmap::DashMap;
use sysinfo::{Pid, System};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// `(agent_id, plugin_type) -> stats` key.
pub type PluginKey = (AgentId, String);

#[derive(Debug, Clone, Copy)]
pub struct PluginResourceStats {
    pub cpu_percent: f32,
    pub memory_mb: f32,
    pub cpu_peak: f32,
    pub memory_peak: f32,
    pub cpu_avg: f32,
    pub memory_avg: f32,
    pub sample_count: u64,
    pub violations: u32,
}

impl Default for PluginResourceStats {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_mb: 0.0,
            cpu_peak: 0.0,
            memory_peak: 0.0,
            cpu_avg: 0.0,
            memory_avg: 0.0,
            sample_count: 0,
            violations: 0,
        }
    }
}

impl PluginResourceStats {
    fn record_sample(&mut self, cpu_percent: f32, memory_mb: f32) {
        self.cpu_percent = cpu_percent;
        self.memory_mb = memory_mb;
        self.sample_count += 1;

        self.cpu_peak = self.cpu_peak.max(cpu_percent);
        self.memory_peak = self.memory_peak.max(memory_mb);

        let n = self.sample_count as f32;
        self.cpu_avg = (self.cpu_avg * (n - 1.0) + cpu_percent) / n;
        self.memory_avg = (self.memory_avg * (n - 1.0) + memory_mb) / n;
    }
}

/// Invoked when a plugin crosses the violation threshold; the monitor has
/// no direct handle on plugin instances (that lives in `PluginManager`),
/// so it hands the kill decision back through this callback.
pub type ViolationCallback = Arc<dyn Fn(AgentId, String) + Send + Sync>;

pub struct ResourceMonitorConfig {
    pub cpu_limit_percent: f32,
    pub memory_limit_mb: f32,
    pub sample_interval: Duration,
    pub violation_threshold: u32,
}

pub struct ResourceMonitor {
    config: ResourceMonitorConfig,
    stats: DashMap<PluginKey, PluginResourceStats>,
    running: AtomicBool,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    on_violation: ViolationCallback,
    pid: Pid,
}

impl ResourceMonitor {
    pub fn new(config: ResourceMonitorConfig, on_violation: ViolationCallback) -> Arc<Self> {
        let pid = sysinfo::get_current_pid().unwrap_or_else(|_| Pid::from(0usize));
        Arc::new(Self {
            config,
            stats: DashMap::new(),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
            on_violation,
            pid,
        })
    }

    pub fn register_plugin(&self, agent_id: AgentId, plugin_type: &str) {
        let key = (agent_id, plugin_type.to_string());
        self.stats.entry(key).or_insert_with(PluginResourceStats::default);
    }

    pub fn unregister_plugin(&self, agent_id: AgentId, plugin_type: &str) {
        self.stats.remove(&(agent_id, plugin_type.to_string()));
    }

    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("resource monitor already running");
            return;
        }

        let this = self.clone();
        let task = tokio::spawn(async move {
            let mut system = System::new();
            let mut ticker = tokio::time::interval(this.config.sample_interval);
            loop {
                ticker.tick().await;
                if !this.running.load(Ordering::SeqCst) {
                    break;
                }
                this.sample_all(&mut system).await;
            }
        });

        *self.task.lock().await = Some(task);
        info!(
            cpu_limit = self.config.cpu_limit_percent,
            memory_limit_mb = self.config.memory_limit_mb,
            "plugin resource monitor started"
        );
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        info!("plugin resource monitor stopped");
    }

    async fn sample_all(&self, system: &mut System) {
        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[self.pid]), true);
        let Some(process) = system.process(self.pid) else {
            error!("could not read process stats for resource monitor");
            return;
        };

        let cpu_percent = process.cpu_usage();
        let memory_mb = process.memory() as f32 / (1024.0 * 1024.0);

        let num_plugins = self.stats.len();
        if num_plugins == 0 {
            return;
        }
        let cpu_per_plugin = cpu_percent / num_plugins as f32;
        let memory_per_plugin = memory_mb / num_plugins as f32;

        let mut to_kill = Vec::new();
        for mut entry in self.stats.iter_mut() {
            let (agent_id, plugin_type) = entry.key().clone();
            let stats = entry.value_mut();
            stats.record_sample(cpu_per_plugin, memory_per_plugin);

            let violated = cpu_per_plugin > self.config.cpu_limit_percent || memory_per_plugin > self.config.memory_limit_mb;
            if violated {
                stats.violations += 1;
                warn!(%agent_id, %plugin_type, cpu = cpu_per_plugin, memory_mb = memory_per_plugin, violations = stats.violations, "plugin resource violation");
                if stats.violations >= self.config.violation_threshold {
                    to_kill.push((agent_id, plugin_type));
                }
            }
        }

        for (agent_id, plugin_type) in to_kill {
            self.stats.remove(&(agent_id, plugin_type.clone()));
            (self.on_violation)(agent_id, plugin_type);
        }
    }

    pub fn stats_for(&self, agent_id: AgentId, plugin_type: &str) -> Option<PluginResourceStats> {
        self.stats.get(&(agent_id, plugin_type.to_string())).map(|e| *e.value())
    }

    pub fn all_stats(&self) -> Vec<(PluginKey, PluginResourceStats)> {
        self.stats.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }
}
