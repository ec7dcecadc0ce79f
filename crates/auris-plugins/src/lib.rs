//! Plugin manager and resource monitor (C10): per-agent plugin lifecycle
//! (validate → initialize → start → stop), event fan-out with per-plugin
//! failure isolation, and a background CPU/memory watchdog that kills
//! plugins which sustain resource-limit violations.

pub mod error;
pub mod manager;
pub mod registry;
pub mod resource_monitor;
pub mod types;

pub use error::{PluginError, Result};
pub use manager::PluginManager;
pub use resource_monitor::{PluginResourceStats, ResourceMonitor, ResourceMonitorConfig};
pub use types::{Plugin, PluginFactory};
