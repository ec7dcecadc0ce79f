use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Top-level config (`auris.toml` + `AURIS_*` env overrides). One
/// sub-struct per component family, mirroring
/// `skynet-core::config::SkynetConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AurisConfig {
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub llm: LlmRouterConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub plugins: PluginConfig,
    #[serde(default)]
    pub vectorstore: VectorStoreConfig,
}

impl Default for AurisConfig {
    fn default() -> Self {
        Self {
            stt: SttConfig::default(),
            tts: TtsConfig::default(),
            llm: LlmRouterConfig::default(),
            cache: CacheConfig::default(),
            memory: MemoryConfig::default(),
            queue: QueueConfig::default(),
            vault: VaultConfig::default(),
            database: DatabaseConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            plugins: PluginConfig::default(),
            vectorstore: VectorStoreConfig::default(),
        }
    }
}

impl AurisConfig {
    /// Load config from a TOML file with `AURIS_*` env var overrides, and
    /// a second, lower-priority merge of the bare documented env var names
    /// from spec.md §6 (e.g. `WHISPER_SERVER_URL`) for drop-in
    /// compatibility with the documented external interface.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: AurisConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::raw().only(&[
                "WHISPER_SERVER_URL",
                "WHISPER_RECONNECT_MAX_RETRIES",
                "WHISPER_RECONNECT_BACKOFF",
                "WHISPER_TIMEOUT_S",
                "CHATTERBOX_URL",
                "CHATTERBOX_VOICE_ID",
                "TTS_TIMEOUT_S",
                "TTS_STREAM_CHUNK_SIZE",
                "CONVERSATION_CACHE_TTL_MINUTES",
                "MAX_CONTEXT_MESSAGES",
                "CACHE_CLEANUP_INTERVAL_SECONDS",
                "SILENCE_THRESHOLD_MS",
                "MAX_MEMORIES_PER_USER",
                "PRUNING_STRATEGY",
                "PRUNING_BATCH_SIZE",
                "VECTOR_SIMILARITY_THRESHOLD",
                "ENABLE_EXTRACTION_SHORTCUTS",
                "SHORTCUT_MAX_LENGTH",
                "ENABLE_DEDUPLICATION",
                "EMBEDDING_SIMILARITY_THRESHOLD",
                "TEXT_SIMILARITY_THRESHOLD",
                "ENABLE_SUMMARIZATION",
                "ENABLE_ERROR_GUARD",
                "ENABLE_TEMPORAL_DETECTION",
                "ENCRYPTION_KEY",
                "PLUGIN_ENCRYPTION_KEY",
                "OPENROUTER_BASE_URL",
                "OPENROUTER_API_KEY",
                "LOCAL_LLM_URL",
                "LOCAL_LLM_API_KEY",
                "MEM0_API_URL",
            ]))
            .merge(Env::prefixed("AURIS_").split("_"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.auris/auris.toml")
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.auris/auris.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// STT client pool config (C3). Names mirror the bare env vars in
/// spec.md §6 directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SttConfig {
    #[serde(default = "default_whisper_url")]
    pub whisper_server_url: String,
    #[serde(default = "default_reconnect_max_retries")]
    pub reconnect_max_retries: u32,
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff: f64,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: f64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            whisper_server_url: default_whisper_url(),
            reconnect_max_retries: default_reconnect_max_retries(),
            reconnect_backoff: default_reconnect_backoff(),
            timeout_s: default_timeout_s(),
        }
    }
}

fn default_whisper_url() -> String {
    "ws://localhost:9090".to_string()
}
fn default_reconnect_max_retries() -> u32 {
    5
}
fn default_reconnect_backoff() -> f64 {
    2.0
}
fn default_timeout_s() -> f64 {
    30.0
}

/// TTS streaming client config (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TtsConfig {
    #[serde(default = "default_chatterbox_url")]
    pub chatterbox_url: String,
    #[serde(default = "default_voice_id")]
    pub chatterbox_voice_id: String,
    #[serde(default = "default_tts_timeout_s")]
    pub tts_timeout_s: f64,
    #[serde(default = "default_tts_chunk_size")]
    pub tts_stream_chunk_size: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            chatterbox_url: default_chatterbox_url(),
            chatterbox_voice_id: default_voice_id(),
            tts_timeout_s: default_tts_timeout_s(),
            tts_stream_chunk_size: default_tts_chunk_size(),
        }
    }
}

fn default_chatterbox_url() -> String {
    "http://localhost:8004".to_string()
}
fn default_voice_id() -> String {
    "default".to_string()
}
fn default_tts_timeout_s() -> f64 {
    60.0
}
fn default_tts_chunk_size() -> usize {
    8192
}

/// LLM router config (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LlmRouterConfig {
    #[serde(default = "default_llm_timeout_s")]
    pub request_timeout_s: f64,
    #[serde(default)]
    pub max_retries_per_provider: u32,
    #[serde(default = "default_openrouter_base_url")]
    pub openrouter_base_url: String,
    #[serde(default)]
    pub openrouter_api_key: Option<String>,
    #[serde(default = "default_local_llm_url")]
    pub local_llm_url: String,
    #[serde(default)]
    pub local_llm_api_key: Option<String>,
}

impl Default for LlmRouterConfig {
    fn default() -> Self {
        Self {
            request_timeout_s: default_llm_timeout_s(),
            max_retries_per_provider: 1,
            openrouter_base_url: default_openrouter_base_url(),
            openrouter_api_key: None,
            local_llm_url: default_local_llm_url(),
            local_llm_api_key: None,
        }
    }
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_local_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_timeout_s() -> f64 {
    30.0
}

/// Conversation cache config (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_minutes")]
    pub conversation_cache_ttl_minutes: i64,
    #[serde(default = "default_max_context")]
    pub max_context_messages: usize,
    #[serde(default = "default_cleanup_interval")]
    pub cache_cleanup_interval_seconds: u64,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            conversation_cache_ttl_minutes: default_cache_ttl_minutes(),
            max_context_messages: default_max_context(),
            cache_cleanup_interval_seconds: default_cleanup_interval(),
            default_timezone: default_timezone(),
        }
    }
}

fn default_cache_ttl_minutes() -> i64 {
    30
}
fn default_max_context() -> usize {
    20
}
fn default_cleanup_interval() -> u64 {
    60
}
fn default_timezone() -> String {
    "America/Los_Angeles".to_string()
}

/// Memory service config (C7) — the largest config surface, one field per
/// env var named in spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MemoryConfig {
    #[serde(default = "default_max_memories")]
    pub max_memories_per_user: usize,
    #[serde(default = "default_pruning_strategy")]
    pub pruning_strategy: String,
    #[serde(default = "default_pruning_batch")]
    pub pruning_batch_size: usize,
    #[serde(default = "default_vector_sim_threshold")]
    pub vector_similarity_threshold: f64,
    #[serde(default = "default_true")]
    pub enable_extraction_shortcuts: bool,
    #[serde(default = "default_shortcut_max_length")]
    pub shortcut_max_length: usize,
    #[serde(default = "default_true")]
    pub enable_deduplication: bool,
    #[serde(default = "default_true")]
    pub use_embeddings_for_dedup: bool,
    #[serde(default = "default_embed_sim_threshold")]
    pub embedding_similarity_threshold: f64,
    #[serde(default = "default_text_sim_threshold")]
    pub text_similarity_threshold: f64,
    #[serde(default = "default_true")]
    pub enable_temporal_detection: bool,
    #[serde(default)]
    pub temporal_llm_fallback: bool,
    #[serde(default = "default_temporal_default_days")]
    pub temporal_default_days: i64,
    #[serde(default = "default_true")]
    pub enable_summarization: bool,
    #[serde(default = "default_summarization_interval_hours")]
    pub summarization_interval_hours: u64,
    #[serde(default = "default_summarization_min_age_days")]
    pub summarization_min_age_days: i64,
    #[serde(default = "default_summarization_sim_threshold")]
    pub summarization_similarity_threshold: f64,
    #[serde(default = "default_max_cluster")]
    pub max_cluster: usize,
    #[serde(default = "default_min_cluster")]
    pub min_cluster: usize,
    #[serde(default = "default_true")]
    pub enable_error_guard: bool,
    #[serde(default = "default_error_guard_window")]
    pub error_guard_window_secs: i64,
    #[serde(default = "default_error_guard_threshold")]
    pub error_guard_threshold: usize,
    #[serde(default = "default_error_guard_cooldown")]
    pub error_guard_cooldown_secs: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memories_per_user: default_max_memories(),
            pruning_strategy: default_pruning_strategy(),
            pruning_batch_size: default_pruning_batch(),
            vector_similarity_threshold: default_vector_sim_threshold(),
            enable_extraction_shortcuts: true,
            shortcut_max_length: default_shortcut_max_length(),
            enable_deduplication: true,
            use_embeddings_for_dedup: true,
            embedding_similarity_threshold: default_embed_sim_threshold(),
            text_similarity_threshold: default_text_sim_threshold(),
            enable_temporal_detection: true,
            temporal_llm_fallback: false,
            temporal_default_days: default_temporal_default_days(),
            enable_summarization: true,
            summarization_interval_hours: default_summarization_interval_hours(),
            summarization_min_age_days: default_summarization_min_age_days(),
            summarization_similarity_threshold: default_summarization_sim_threshold(),
            max_cluster: default_max_cluster(),
            min_cluster: default_min_cluster(),
            enable_error_guard: true,
            error_guard_window_secs: default_error_guard_window(),
            error_guard_threshold: default_error_guard_threshold(),
            error_guard_cooldown_secs: default_error_guard_cooldown(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_memories() -> usize {
    500
}
fn default_pruning_strategy() -> String {
    "fifo".to_string()
}
fn default_pruning_batch() -> usize {
    20
}
fn default_vector_sim_threshold() -> f64 {
    0.5
}
fn default_shortcut_max_length() -> usize {
    100
}
fn default_embed_sim_threshold() -> f64 {
    0.95
}
fn default_text_sim_threshold() -> f64 {
    0.90
}
fn default_temporal_default_days() -> i64 {
    7
}
fn default_summarization_interval_hours() -> u64 {
    24
}
fn default_summarization_min_age_days() -> i64 {
    7
}
fn default_summarization_sim_threshold() -> f64 {
    0.75
}
fn default_max_cluster() -> usize {
    8
}
fn default_min_cluster() -> usize {
    3
}
fn default_error_guard_window() -> i64 {
    600
}
fn default_error_guard_threshold() -> usize {
    5
}
fn default_error_guard_cooldown() -> i64 {
    300
}

/// Extraction queue worker config (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_error_loop_backoff_secs")]
    pub error_loop_backoff_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            task_timeout_secs: default_task_timeout_secs(),
            error_loop_backoff_secs: default_error_loop_backoff_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}
fn default_batch_size() -> usize {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_task_timeout_secs() -> u64 {
    60
}
fn default_error_loop_backoff_secs() -> u64 {
    10
}

/// Session orchestrator config (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    #[serde(default = "default_silence_threshold_ms")]
    pub silence_threshold_ms: i64,
    #[serde(default = "default_silence_tick_ms")]
    pub silence_tick_ms: u64,
    #[serde(default = "default_barge_in_enabled")]
    pub barge_in_enabled: bool,
    #[serde(default = "default_context_window_messages")]
    pub context_window_messages: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            silence_threshold_ms: default_silence_threshold_ms(),
            silence_tick_ms: default_silence_tick_ms(),
            barge_in_enabled: default_barge_in_enabled(),
            context_window_messages: default_context_window_messages(),
        }
    }
}

fn default_silence_threshold_ms() -> i64 {
    600
}
fn default_silence_tick_ms() -> u64 {
    100
}
fn default_barge_in_enabled() -> bool {
    true
}
fn default_context_window_messages() -> usize {
    20
}

/// Plugin manager + resource monitor config (C10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PluginConfig {
    #[serde(default = "default_plugin_cpu_limit_percent")]
    pub cpu_limit_percent: f32,
    #[serde(default = "default_plugin_memory_limit_mb")]
    pub memory_limit_mb: f32,
    #[serde(default = "default_plugin_sample_interval_secs")]
    pub sample_interval_secs: u64,
    #[serde(default = "default_plugin_violation_threshold")]
    pub violation_threshold: u32,
    #[serde(default = "default_plugin_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            cpu_limit_percent: default_plugin_cpu_limit_percent(),
            memory_limit_mb: default_plugin_memory_limit_mb(),
            sample_interval_secs: default_plugin_sample_interval_secs(),
            violation_threshold: default_plugin_violation_threshold(),
            dispatch_timeout_secs: default_plugin_dispatch_timeout_secs(),
        }
    }
}

fn default_plugin_cpu_limit_percent() -> f32 {
    50.0
}
fn default_plugin_memory_limit_mb() -> f32 {
    500.0
}
fn default_plugin_sample_interval_secs() -> u64 {
    5
}
fn default_plugin_violation_threshold() -> u32 {
    3
}
fn default_plugin_dispatch_timeout_secs() -> u64 {
    5
}

/// Vector store client config (C2). Not named as a bare env var anywhere
/// in the documented external interface (the source system resolves it
/// through its own embedding-provider config rather than a plain URL), so
/// `MEM0_API_URL` is this workspace's own choice, following the same
/// `<SERVICE>_URL` naming the documented STT/TTS variables already use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VectorStoreConfig {
    #[serde(default = "default_vectorstore_url")]
    pub mem0_api_url: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            mem0_api_url: default_vectorstore_url(),
        }
    }
}

fn default_vectorstore_url() -> String {
    "http://localhost:8000".to_string()
}

/// Credential vault config (C1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VaultConfig {
    pub encryption_key: Option<String>,
    pub plugin_encryption_key: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            plugin_encryption_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = AurisConfig::default();
        assert_eq!(cfg.memory.max_memories_per_user, 500);
        assert_eq!(cfg.cache.max_context_messages, 20);
        assert_eq!(cfg.queue.max_attempts, 3);
        assert_eq!(cfg.stt.reconnect_max_retries, 5);
    }
}
