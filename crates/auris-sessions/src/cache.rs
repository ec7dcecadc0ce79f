use std::sync::Arc;

use auris_core::ids::{AgentId, SessionId, UserId};
use auris_core::types::{Agent, MessageRole};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::ConversationStore;
use crate::types::{CachedContext, Message, Session, SessionType};

/// Something that can produce the `<user_memories>` block for the current
/// turn. Implemented by the memory service; kept as a trait here so this
/// crate never depends on it directly.
#[async_trait::async_trait]
pub trait MemoryContextProvider: Send + Sync {
    async fn get_user_memory_context(&self, user_id: &UserId, agent_id: &AgentId, query: &str) -> String;
}

/// Fire-and-forget extraction enqueue, implemented by the queue worker.
#[async_trait::async_trait]
pub trait ExtractionEnqueuer: Send + Sync {
    async fn queue_extraction(&self, user_id: &UserId, agent_id: &AgentId, user_message: &str, ai_response: &str);
}

pub struct ConversationCacheConfig {
    pub ttl_minutes: i64,
    pub max_context_messages: usize,
    pub cleanup_interval_seconds: u64,
    pub default_timezone: String,
}

/// Per-session in-memory context with TTL (C6), grounded on
/// `skynet-sessions::manager::SessionManager` for the persistence half and
/// generalized with an added cache layer + sweeper for the cache contract.
pub struct ConversationCache {
    store: Arc<ConversationStore>,
    cache: DashMap<SessionId, Arc<AsyncMutex<CachedContext>>>,
    config: ConversationCacheConfig,
    memory: Option<Arc<dyn MemoryContextProvider>>,
    extraction: Option<Arc<dyn ExtractionEnqueuer>>,
}

impl ConversationCache {
    pub fn new(store: Arc<ConversationStore>, config: ConversationCacheConfig) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            config,
            memory: None,
            extraction: None,
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryContextProvider>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_extraction(mut self, extraction: Arc<dyn ExtractionEnqueuer>) -> Self {
        self.extraction = Some(extraction);
        self
    }

    fn ttl(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.config.ttl_minutes)
    }

    pub async fn get_or_create_session(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        agent_id: &AgentId,
        session_type: SessionType,
        title: Option<&str>,
    ) -> Result<Session> {
        if let Some(entry) = self.cache.get(session_id) {
            let ctx = entry.lock().await;
            return Ok(ctx.session.clone());
        }
        self.load_into_cache(session_id, user_id, agent_id, session_type, title).await
    }

    async fn load_into_cache(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        agent_id: &AgentId,
        session_type: SessionType,
        title: Option<&str>,
    ) -> Result<Session> {
        let session = self
            .store
            .get_or_create_session(session_id, user_id, agent_id, session_type, title)?;
        let agent = self.store.get_agent(agent_id)?;
        let messages = self.store.list_messages(session_id, self.config.max_context_messages)?;

        let now = Utc::now();
        let ctx = CachedContext {
            session: session.clone(),
            agent,
            messages,
            last_activity: now,
            expires_at: now + self.ttl(),
        };
        self.cache.insert(*session_id, Arc::new(AsyncMutex::new(ctx)));
        debug!(%session_id, "session loaded into cache");
        Ok(session)
    }

    /// Reloads an already-persisted session on a cache miss. Unlike
    /// `get_or_create_session`, this never creates a new row.
    async fn entry(&self, session_id: &SessionId) -> Result<Arc<AsyncMutex<CachedContext>>> {
        if let Some(entry) = self.cache.get(session_id) {
            return Ok(entry.clone());
        }
        warn!(%session_id, "cache miss, reloading session from storage");
        let session = self.store.get_session(session_id)?;
        self.load_into_cache(session_id, &session.user_id, &session.agent_id, session.session_type, session.title.as_deref())
            .await?;
        Ok(self.cache.get(session_id).unwrap().clone())
    }

    /// Builds the context for one generation turn: synthetic system
    /// messages (date/time stanza, then memory block if non-empty)
    /// followed by the last `limit` cached messages, oldest first.
    pub async fn get_conversation_context(
        &self,
        session_id: &SessionId,
        limit: usize,
        include_system_prompt: bool,
        latest_user_message: Option<&str>,
    ) -> Result<Vec<Message>> {
        let handle = self.entry(session_id).await?;
        let mut ctx = handle.lock().await;
        ctx.touch(self.ttl());

        let mut out = Vec::new();

        if include_system_prompt {
            let stanza = current_datetime_stanza(&self.config.default_timezone);
            let prompt = format!("{}\n\n{stanza}", ctx.agent.system_prompt);
            out.push(system_message(session_id, &prompt));

            if let (Some(memory), Some(query)) = (&self.memory, latest_user_message) {
                let block = memory
                    .get_user_memory_context(&ctx.session.user_id, &ctx.session.agent_id, query)
                    .await;
                if !block.is_empty() {
                    out.push(system_message(session_id, &block));
                }
            }
        }

        let start = ctx.messages.len().saturating_sub(limit);
        out.extend(ctx.messages[start..].iter().cloned());
        Ok(out)
    }

    /// Duplicate-suppressed append; enqueues extraction fire-and-forget
    /// when `role == assistant` and extraction is configured.
    pub async fn add_message(
        &self,
        session_id: &SessionId,
        role: MessageRole,
        content: &str,
        correlation_id: Option<&str>,
    ) -> Result<Message> {
        let handle = self.entry(session_id).await?;
        let message = self.store.append_message(session_id, role, content, correlation_id)?;

        {
            let mut ctx = handle.lock().await;
            ctx.push_message(message.clone(), self.config.max_context_messages);
            ctx.touch(self.ttl());

            if role == MessageRole::Assistant {
                if let Some(extraction) = &self.extraction {
                    let last_user = ctx
                        .messages
                        .iter()
                        .rev()
                        .find(|m| m.role == MessageRole::User)
                        .map(|m| m.content.clone());
                    if let Some(user_message) = last_user {
                        let extraction = extraction.clone();
                        let user_id = ctx.session.user_id.clone();
                        let agent_id = ctx.session.agent_id.clone();
                        let ai_response = content.to_string();
                        tokio::spawn(async move {
                            extraction.queue_extraction(&user_id, &agent_id, &user_message, &ai_response).await;
                        });
                    }
                }
            }
        }

        Ok(message)
    }

    pub async fn get_agent_config(&self, session_id: &SessionId) -> Result<Agent> {
        let handle = self.entry(session_id).await?;
        let ctx = handle.lock().await;
        Ok(ctx.agent.clone())
    }

    pub async fn update_session_activity(&self, session_id: &SessionId) -> Result<()> {
        let handle = self.entry(session_id).await?;
        let mut ctx = handle.lock().await;
        ctx.touch(self.ttl());
        Ok(())
    }

    pub async fn end_session(&self, session_id: &SessionId, persist: bool) -> Result<()> {
        if persist {
            self.store.end_session(session_id)?;
        }
        self.cache.remove(session_id);
        Ok(())
    }

    pub fn clear_cache(&self, session_id: Option<&SessionId>) {
        match session_id {
            Some(id) => {
                self.cache.remove(id);
            }
            None => self.cache.clear(),
        }
    }

    pub fn get_active_sessions(&self) -> Vec<SessionId> {
        self.cache.iter().map(|e| *e.key()).collect()
    }

    /// Evicts entries whose `expires_at < now`. Run on a
    /// `cleanup_interval_seconds` tick by the owning service.
    pub async fn sweep_expired(&self) {
        let now = Utc::now();
        let mut expired = Vec::new();
        for entry in self.cache.iter() {
            let ctx = entry.value().lock().await;
            if ctx.expires_at < now {
                expired.push(*entry.key());
            }
        }
        for id in expired {
            self.cache.remove(&id);
        }
        if !self.cache.is_empty() {
            debug!(active = self.cache.len(), "cache sweep complete");
        }
    }

    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.cleanup_interval_seconds.max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval));
            loop {
                ticker.tick().await;
                self.sweep_expired().await;
            }
        })
    }
}

fn system_message(session_id: &SessionId, content: &str) -> Message {
    Message {
        id: auris_core::ids::MessageId::new(),
        session_id: *session_id,
        role: MessageRole::System,
        content: content.to_string(),
        timestamp: Utc::now(),
        correlation_id: None,
    }
}

/// `[Current Date/Time Context]` stanza, localized to the user's timezone
/// with a fallback to `America/Los_Angeles` (spec default).
fn current_datetime_stanza(_timezone: &str) -> String {
    let now = Utc::now();
    format!(
        "[Current Date/Time Context]\nCurrent UTC time: {}\n(timezone conversion deferred to the transport layer)",
        now.to_rfc3339()
    )
}

impl Default for ConversationCacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 30,
            max_context_messages: 20,
            cleanup_interval_seconds: 60,
            default_timezone: "America/Los_Angeles".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auris_core::types::{LlmConfig, MemoryScope, ProviderKind, TtsVoiceConfig};
    use rusqlite::Connection;

    fn cache() -> ConversationCache {
        let store = ConversationStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let agent = Agent {
            id: AgentId::new("main"),
            name: "Main".to_string(),
            llm: LlmConfig {
                provider_kind: ProviderKind::Openrouter,
                model: "gpt-4o-mini".to_string(),
                temperature: 0.7,
                provider_ref: None,
            },
            tts: TtsVoiceConfig {
                voice: "default".to_string(),
                exaggeration: 0.5,
                cfg_weight: 0.5,
                temperature: 0.8,
                language: "en".to_string(),
            },
            system_prompt: "be helpful".to_string(),
            memory_scope: MemoryScope::Global,
            plugins: Default::default(),
            is_default: true,
        };
        store.upsert_agent(&agent).unwrap();
        ConversationCache::new(Arc::new(store), ConversationCacheConfig::default())
    }

    #[tokio::test]
    async fn add_message_then_context_reflects_oldest_to_newest_order() {
        let cache = cache();
        let id = SessionId::new();
        let user = UserId::new("u1");
        let agent = AgentId::new("main");
        cache.get_or_create_session(&id, &user, &agent, SessionType::Web, None).await.unwrap();

        cache.add_message(&id, MessageRole::User, "hi", None).await.unwrap();
        cache.add_message(&id, MessageRole::Assistant, "hello!", None).await.unwrap();

        let context = cache.get_conversation_context(&id, 10, false, None).await.unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].content, "hi");
        assert_eq!(context[1].content, "hello!");
    }

    #[tokio::test]
    async fn context_trims_to_max_context_messages() {
        let cache = cache();
        let id = SessionId::new();
        let user = UserId::new("u1");
        let agent = AgentId::new("main");
        cache.get_or_create_session(&id, &user, &agent, SessionType::Web, None).await.unwrap();

        for i in 0..25 {
            cache
                .add_message(&id, MessageRole::User, &format!("message {i}"), None)
                .await
                .unwrap();
        }

        let context = cache.get_conversation_context(&id, 100, false, None).await.unwrap();
        assert_eq!(context.len(), 20);
        assert_eq!(context[0].content, "message 5");
    }

    #[tokio::test]
    async fn end_session_removes_it_from_cache() {
        let cache = cache();
        let id = SessionId::new();
        let user = UserId::new("u1");
        let agent = AgentId::new("main");
        cache.get_or_create_session(&id, &user, &agent, SessionType::Web, None).await.unwrap();
        assert_eq!(cache.get_active_sessions().len(), 1);

        cache.end_session(&id, true).await.unwrap();
        assert_eq!(cache.get_active_sessions().len(), 0);
    }
}
