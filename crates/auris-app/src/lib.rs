//! Service factories and the composition root (C11): one factory function
//! per core service plus the shared `AppState` they're assembled into.
//! Grounded on `skynet-gateway::app::AppState` (construct-once, `Arc`-shared,
//! field-per-subsystem), with the routing layer stripped since this
//! workspace ends at wiring and running the background task graph.

use std::sync::Arc;

use auris_core::config::AurisConfig;
use auris_core::events::{ErrorSink, EventBus};
use auris_core::ids::{AgentId, UserId};
use auris_llm::LlmRouterClient;
use auris_memory::MemoryService;
use auris_orchestrator::SessionOrchestrator;
use auris_plugins::PluginManager;
use auris_queue::{QueueEnqueuer, TaskStore};
use auris_sessions::{ConversationCache, ConversationCacheConfig, ConversationStore};
use auris_stt::{SttClientPool, SttPoolConfig};
use auris_tts::{TtsClient, TtsClientConfig};
use auris_vault::Vault;
use auris_vectorstore::{HttpVectorStore, VectorStoreClient};
use rusqlite::Connection;
use tracing::info;

/// Everything the task graph needs, held for the process lifetime.
/// Mirrors `skynet_gateway::app::AppState`'s shape: one field per
/// subsystem, constructed once in `main` and shared via `Arc`.
pub struct AppState {
    pub config: AurisConfig,
    pub events: EventBus,
    pub vault: Arc<Vault>,
    pub conversation_store: Arc<ConversationStore>,
    pub cache: Arc<ConversationCache>,
    pub memory: Arc<MemoryService>,
    pub queue_store: Arc<TaskStore>,
    pub stt: Arc<SttClientPool>,
    pub tts: Arc<TtsClient>,
    pub llm: Arc<LlmRouterClient>,
    pub orchestrator: Arc<SessionOrchestrator>,
    pub plugins: Arc<PluginManager>,
}

/// Adapts [`MemoryService`] to the narrower shape `auris-sessions` needs,
/// so the cache crate doesn't have to depend on `auris-memory` directly.
/// Also applies the §4.7.1 scope policy before every retrieval: a session's
/// `agent_id` is only the default partition, not the final one — an admin
/// override, a per-(user, agent) preference, or the deprecated toggle can
/// still redirect a lookup to the global partition.
pub struct CacheMemoryProvider {
    memory: Arc<MemoryService>,
    conversations: Arc<ConversationStore>,
}

impl CacheMemoryProvider {
    pub fn new(memory: Arc<MemoryService>, conversations: Arc<ConversationStore>) -> Self {
        Self { memory, conversations }
    }
}

#[async_trait::async_trait]
impl auris_sessions::MemoryContextProvider for CacheMemoryProvider {
    async fn get_user_memory_context(&self, user_id: &UserId, agent_id: &AgentId, query: &str) -> String {
        let agent_default = match self.conversations.get_agent(agent_id) {
            Ok(agent) => agent.memory_scope,
            Err(e) => {
                tracing::warn!(error = %e, agent_id = %agent_id.as_str(), "couldn't look up agent for scope resolution, defaulting to per-agent scope");
                auris_core::types::MemoryScope::Agent
            }
        };
        let scope = match self.memory.resolve_scope(user_id, agent_id, agent_default) {
            Ok(scope) => scope,
            Err(e) => {
                tracing::warn!(error = %e, "scope resolution failed, defaulting to per-agent scope");
                Some(agent_id)
            }
        };
        self.memory.get_user_memory_context(user_id, scope, query).await
    }
}

/// Opens the single sqlite file all relational stores share, matching the
/// source's single `DATABASE_PATH` layout (one file, multiple tables).
fn open_db(config: &AurisConfig) -> anyhow::Result<Connection> {
    Ok(Connection::open(&config.database.path)?)
}

pub fn create_vault(config: &AurisConfig) -> Arc<Vault> {
    info!("creating credential vault");
    Arc::new(Vault::from_config(
        config.vault.encryption_key.as_deref(),
        config.vault.plugin_encryption_key.as_deref(),
    ))
}

pub fn create_conversation_store(config: &AurisConfig) -> anyhow::Result<Arc<ConversationStore>> {
    info!("creating conversation store");
    Ok(Arc::new(ConversationStore::new(open_db(config)?)?))
}

pub fn create_queue_store(config: &AurisConfig) -> anyhow::Result<Arc<TaskStore>> {
    info!("creating extraction task store");
    Ok(Arc::new(TaskStore::new(open_db(config)?)?))
}

/// Creates the conversation cache, wiring the extraction queue as its
/// enqueue sink and the memory pipeline as its context provider — mirrors
/// `create_conversation_service`'s "accept an optional global MemoryService
/// singleton rather than construct a second one" shape, generalized into
/// two narrow trait objects instead of one concrete dependency.
pub fn create_conversation_cache(
    config: &AurisConfig,
    store: Arc<ConversationStore>,
    queue_store: Arc<TaskStore>,
    memory: Arc<MemoryService>,
    events: EventBus,
) -> Arc<ConversationCache> {
    info!("creating conversation cache");
    let agent_lookup = store.clone();
    let cache = ConversationCache::new(
        store,
        ConversationCacheConfig {
            ttl_minutes: config.cache.conversation_cache_ttl_minutes,
            max_context_messages: config.cache.max_context_messages,
            cleanup_interval_seconds: config.cache.cache_cleanup_interval_seconds,
            default_timezone: config.cache.default_timezone.clone(),
        },
    )
    .with_extraction(Arc::new(QueueEnqueuer::new(queue_store, events)))
    .with_memory(Arc::new(CacheMemoryProvider::new(memory, agent_lookup)));
    Arc::new(cache)
}

pub fn create_memory_service(
    config: &AurisConfig,
    events: EventBus,
    vectorstore_url: &str,
    llm: Arc<LlmRouterClient>,
) -> anyhow::Result<Arc<MemoryService>> {
    info!("creating memory service");
    let db = Connection::open(&config.database.path)?;
    let store = Arc::new(auris_memory::FactStore::new(db)?);
    let vectorstore: Arc<dyn VectorStoreClient> = Arc::new(HttpVectorStore::new(vectorstore_url));
    let service = MemoryService::new(store, vectorstore, events, config.memory.clone()).with_llm(llm);
    Ok(Arc::new(service))
}

pub fn create_stt_pool(config: &AurisConfig, errors: ErrorSink) -> Arc<SttClientPool> {
    info!("creating STT client pool");
    Arc::new(SttClientPool::new(
        SttPoolConfig {
            default_url: config.stt.whisper_server_url.clone(),
            max_retries: config.stt.reconnect_max_retries,
            backoff_multiplier: config.stt.reconnect_backoff,
            timeout_s: config.stt.timeout_s,
        },
        errors,
    ))
}

pub fn create_tts_client(config: &AurisConfig, errors: ErrorSink) -> Arc<TtsClient> {
    info!("creating TTS client");
    Arc::new(TtsClient::new(
        TtsClientConfig {
            base_url: config.tts.chatterbox_url.clone(),
            default_voice_id: config.tts.chatterbox_voice_id.clone(),
            timeout_s: config.tts.tts_timeout_s,
            chunk_size: config.tts.tts_stream_chunk_size,
        },
        errors,
    ))
}

pub fn create_llm_router(
    config: &AurisConfig,
    vault: Arc<Vault>,
    errors: ErrorSink,
) -> Arc<LlmRouterClient> {
    info!("creating LLM router client");
    Arc::new(LlmRouterClient::new(config.llm.clone(), vault, errors))
}

pub fn create_orchestrator(
    config: &AurisConfig,
    stt: Arc<SttClientPool>,
    tts: Arc<TtsClient>,
    llm: Arc<LlmRouterClient>,
    cache: Arc<ConversationCache>,
    events: EventBus,
) -> Arc<SessionOrchestrator> {
    info!("creating session orchestrator");
    SessionOrchestrator::new(stt, tts, llm, cache, events, config.orchestrator.clone())
}

pub fn create_plugin_manager(config: &AurisConfig, vault: Arc<Vault>) -> Arc<PluginManager> {
    info!("creating plugin manager");
    PluginManager::new(vault, config.plugins.clone())
}

/// Assembles every core service into one `AppState`. This is the single
/// factory site for the whole process — errors in any one service are
/// surfaced as a failed `AppState::build`, not something callers recover
/// from piecemeal, since a partially-wired process can't safely run the
/// task graph in `main`.
impl AppState {
    pub fn build(config: AurisConfig) -> anyhow::Result<Self> {
        let events = EventBus::default();

        let vault = create_vault(&config);
        let conversation_store = create_conversation_store(&config)?;
        let queue_store = create_queue_store(&config)?;

        let llm = create_llm_router(&config, vault.clone(), ErrorSink::new(events.clone()));

        let vectorstore_url = config.vectorstore.mem0_api_url.clone();
        let memory = create_memory_service(&config, events.clone(), &vectorstore_url, llm.clone())?;
        let cache = create_conversation_cache(&config, conversation_store.clone(), queue_store.clone(), memory.clone(), events.clone());

        let stt = create_stt_pool(&config, ErrorSink::new(events.clone()));
        let tts = create_tts_client(&config, ErrorSink::new(events.clone()));
        let orchestrator = create_orchestrator(&config, stt.clone(), tts.clone(), llm.clone(), cache.clone(), events.clone());
        let plugins = create_plugin_manager(&config, vault.clone());

        Ok(Self {
            config,
            events,
            vault,
            conversation_store,
            cache,
            memory,
            queue_store,
            stt,
            tts,
            llm,
            orchestrator,
            plugins,
        })
    }
}
