//! The memory pipeline (C7): scope resolution (§4.7.1), retrieval (§4.7.2),
//! extraction (§4.7.3), manual fact creation (§4.7.9) and the plumbing that
//! ties categorisation, deduplication, temporal detection, the error guard
//! and pruning together around a single entry point per turn.

use std::sync::Arc;

use auris_core::config::MemoryConfig;
use auris_core::events::{EventBus, OutboundEvent, ServiceErrorEvent, ServiceErrorType};
use auris_core::ids::{AgentId, FactId, UserId};
use auris_core::types::MemoryScope;
use auris_llm::{ChatMessage, GenerationConfig, LlmRouterClient, Role};
use auris_vectorstore::{normalize_add_response, normalize_search_response, VectorStoreClient};
use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::categorize::{infer_fact_key, infer_importance, infer_memory_bank};
use crate::dedup::{check_duplicate, DedupConfig, DedupKind, DedupOutcome};
use crate::error::{MemoryError, Result};
use crate::error_guard::{ErrorGuard, ErrorGuardConfig};
use crate::metrics::MemoryMetrics;
use crate::pruning::{prune_scope_if_needed, PruningConfig};
use crate::store::FactStore;
use crate::summarization::{run_cycle as run_summarization_cycle, SummarizationConfig};
use crate::temporal::{detect as detect_temporal, should_consult_llm, TemporalVerdict};
use crate::types::{ErrorGuardStatus, MemoryBank, MemoryMetricsSnapshot, UserFact};

const MANUAL_FACT_MARKER: &str = "MANUAL_FACT_CREATION:";

/// Five fixed detection patterns (§4.7.3): common first-person statement
/// shapes that a regex can recognise without an LLM round trip. Detection
/// is unanchored (the shape can appear anywhere in the turn); the actual
/// rewrite into third person is done by `first_person_to_third`.
static SHORTCUT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bi\s+(love|hate|like|enjoy|prefer|dislike)\b",
        r"(?i)\bmy\s+favorite\b",
        r"(?i)\bi'?m\s+(allergic|intolerant)\b",
        r"(?i)\bi\s+can't\s+stand\b",
        r"(?i)\bi\s+(always|never)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static VERB_STATEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bi\s+(love|hate|like|enjoy|prefer|dislike)\b").unwrap());
static ALLERGIC_STATEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bi'?m\s+(allergic|intolerant)\b").unwrap());
static CANT_STAND_STATEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bi\s+can't\s+stand\b").unwrap());
static ALWAYS_NEVER_STATEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bi\s+(always|never)\s+(\w+)").unwrap());
static MY_FAVORITE_STATEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmy\s+favorite\b").unwrap());
static WORD_MY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmy\b").unwrap());
static WORD_I: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bi\b").unwrap());
static WORD_ME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bme\b").unwrap());

fn shortcut_match(message: &str) -> Option<String> {
    let trimmed = message.trim();
    if SHORTCUT_PATTERNS.iter().any(|re| re.is_match(trimmed)) {
        Some(first_person_to_third(trimmed))
    } else {
        None
    }
}

/// Rewrites a first-person statement into the third person the stored
/// fact text uses (spec: "I love Thai food" -> "User loves Thai food").
/// Tries the structured conversions in priority order before falling
/// back to a bare word swap.
fn first_person_to_third(text: &str) -> String {
    if let Some(out) = splice_verb_statement(text) {
        return out;
    }
    if let Some(out) = splice_allergic_statement(text) {
        return out;
    }
    if let Some(out) = splice_cant_stand_statement(text) {
        return out;
    }
    if let Some(out) = splice_always_never_statement(text) {
        return out;
    }
    if let Some(out) = splice_my_favorite_statement(text) {
        return out;
    }
    generic_fallback_swap(text)
}

fn splice_verb_statement(text: &str) -> Option<String> {
    let caps = VERB_STATEMENT.captures(text)?;
    let m = caps.get(0)?;
    let verb = conjugate_third_person(caps.get(1)?.as_str());
    Some(format!("{}User {}{}", &text[..m.start()], verb, &text[m.end()..]))
}

fn splice_allergic_statement(text: &str) -> Option<String> {
    let caps = ALLERGIC_STATEMENT.captures(text)?;
    let m = caps.get(0)?;
    let adj = caps.get(1)?.as_str().to_lowercase();
    Some(format!("{}User is {}{}", &text[..m.start()], adj, &text[m.end()..]))
}

fn splice_cant_stand_statement(text: &str) -> Option<String> {
    let m = CANT_STAND_STATEMENT.find(text)?;
    Some(format!("{}User can't stand{}", &text[..m.start()], &text[m.end()..]))
}

fn splice_always_never_statement(text: &str) -> Option<String> {
    let caps = ALWAYS_NEVER_STATEMENT.captures(text)?;
    let m = caps.get(0)?;
    let adverb = caps.get(1)?.as_str().to_lowercase();
    let verb = conjugate_third_person(caps.get(2)?.as_str());
    Some(format!("{}User {} {}{}", &text[..m.start()], adverb, verb, &text[m.end()..]))
}

fn splice_my_favorite_statement(text: &str) -> Option<String> {
    let m = MY_FAVORITE_STATEMENT.find(text)?;
    Some(format!("{}User's favorite{}", &text[..m.start()], &text[m.end()..]))
}

fn generic_fallback_swap(text: &str) -> String {
    let text = WORD_MY.replace_all(text, "User's");
    let text = WORD_I.replace_all(&text, "User");
    let text = WORD_ME.replace_all(&text, "User");
    text.into_owned()
}

/// Standard English third-person-singular conjugation: consonant+y -> ies,
/// s/x/z/ch/sh -> +es, otherwise +s.
fn conjugate_third_person(verb: &str) -> String {
    let lower = verb.to_lowercase();
    if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") && !lower.ends_with("oy") && !lower.ends_with("uy") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with('z') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{lower}es")
    } else {
        format!("{lower}s")
    }
}

pub struct MemoryService {
    store: Arc<FactStore>,
    vectorstore: Arc<dyn VectorStoreClient>,
    llm: Option<Arc<LlmRouterClient>>,
    events: EventBus,
    config: MemoryConfig,
    error_guard: ErrorGuard,
    metrics: MemoryMetrics,
    extraction_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl MemoryService {
    pub fn new(
        store: Arc<FactStore>,
        vectorstore: Arc<dyn VectorStoreClient>,
        events: EventBus,
        config: MemoryConfig,
    ) -> Self {
        let error_guard = ErrorGuard::new(ErrorGuardConfig {
            enabled: config.enable_error_guard,
            window_secs: config.error_guard_window_secs,
            threshold: config.error_guard_threshold,
            cooldown_secs: config.error_guard_cooldown_secs,
        });
        Self {
            store,
            vectorstore,
            llm: None,
            events,
            config,
            error_guard,
            metrics: MemoryMetrics::default(),
            extraction_locks: DashMap::new(),
        }
    }

    pub fn with_llm(mut self, llm: Arc<LlmRouterClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Resolves which partition (`None` = global, `Some(agent)` = per-agent)
    /// a user's memory operations fall under (§4.7.1). Checked in order:
    /// an admin-set global policy overrides everything; then a per-(user,
    /// agent) preference row; then the deprecated per-user toggle column;
    /// finally the agent's own `memory_scope` default.
    pub fn resolve_scope<'a>(
        &self,
        user_id: &UserId,
        agent_id: &'a AgentId,
        agent_default: MemoryScope,
    ) -> Result<Option<&'a AgentId>> {
        if let Some(admin_scope) = self.store.get_admin_global_scope()? {
            return Ok(scope_str_to_option(&admin_scope, agent_id));
        }
        if let Some(pref) = self.store.get_scope_preference(user_id, agent_id)? {
            return Ok(scope_str_to_option(&pref, agent_id));
        }
        if let Some(enabled) = self.store.get_deprecated_user_toggle(user_id)? {
            return Ok(if enabled { Some(agent_id) } else { None });
        }
        Ok(match agent_default {
            MemoryScope::Global => None,
            MemoryScope::Agent => Some(agent_id),
        })
    }

    fn namespace(user_id: &UserId, agent_id: Option<&AgentId>) -> String {
        match agent_id {
            Some(agent) => format!("{}:{}", user_id.as_str(), agent.as_str()),
            None => user_id.as_str().to_string(),
        }
    }

    /// Retrieval (§4.7.2): searches the vector store under the resolved
    /// scope, filters by similarity threshold, formats a `<user_memories>`
    /// prompt block, and touches `last_accessed_at` on every fact that
    /// contributed. Never raises — a failed search yields an empty block.
    pub async fn get_user_memory_context(&self, user_id: &UserId, agent_id: Option<&AgentId>, query: &str) -> String {
        self.metrics.inc_retrieval_total();
        let namespace = Self::namespace(user_id, agent_id);
        let response = match self.vectorstore.search(query, &namespace, 10).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "memory retrieval search failed");
                self.events.error(
                    ServiceErrorEvent::new(
                        "memory-service",
                        ServiceErrorType::MemoryError,
                        "Couldn't recall any saved memories right now.",
                        e.to_string(),
                    )
                    .retry_suggested(),
                );
                return String::new();
            }
        };

        let hits = normalize_search_response(&response);
        let relevant: Vec<_> = hits
            .into_iter()
            .filter(|h| h.score >= self.config.vector_similarity_threshold)
            .collect();

        if relevant.is_empty() {
            return String::new();
        }

        let now = Utc::now();
        let mut lines = Vec::with_capacity(relevant.len());
        for hit in &relevant {
            lines.push(format!("- {}", hit.text));
            if let Ok(Some(fact)) = self.store.get_by_vector_id(&hit.id) {
                if !fact.is_expired(now) {
                    let _ = self.store.touch_last_accessed(&fact.id, now);
                }
            }
        }

        format!("<user_memories>\n{}\n</user_memories>", lines.join("\n"))
    }

    /// Extraction (§4.7.3): the shortcut path first, then an LLM relevance
    /// classifier, then per-candidate categorisation, temporal detection
    /// and deduplication, serialized per user so two turns processed
    /// concurrently never race on the same scope's fact set.
    pub async fn extract_facts_from_turn(
        &self,
        user_id: &UserId,
        agent_id: Option<&AgentId>,
        user_message: &str,
        ai_response: &str,
    ) -> Result<Vec<FactId>> {
        if !self.error_guard.allow() {
            self.metrics.inc_error_guard_skips();
            return Err(MemoryError::ErrorGuardOpen(format!(
                "extraction suspended for user {}",
                user_id.as_str()
            )));
        }

        let lock = self
            .extraction_locks
            .entry(user_id.as_str().to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(agent) = agent_id {
            if let Err(e) = self.prune(user_id, Some(agent)).await {
                tracing::warn!(error = %e, "pre-extraction pruning failed");
            }
        } else if let Err(e) = self.prune(user_id, None).await {
            tracing::warn!(error = %e, "pre-extraction pruning failed");
        }

        let candidates = self.gather_candidates(user_message, ai_response).await;
        let mut written = Vec::new();
        let mut had_failure = false;

        for candidate in candidates {
            match self.upsert_fact(user_id, agent_id, &candidate).await {
                Ok(Some(id)) => written.push(id),
                Ok(None) => {}
                Err(e) => {
                    had_failure = true;
                    self.error_guard.record_failure();
                    self.events.error(ServiceErrorEvent::new(
                        "memory-service",
                        ServiceErrorType::MemoryError,
                        "A memory update failed to save.",
                        e.to_string(),
                    ));
                    self.events.publish(OutboundEvent::MemoryExtractionFailed {
                        task_id: user_id.as_str().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if !had_failure {
            self.error_guard.record_success();
        }

        self.events.publish(OutboundEvent::MemoryExtractionCompleted {
            task_id: user_id.as_str().to_string(),
            fact_ids: written.iter().map(|id| id.to_string()).collect(),
        });

        Ok(written)
    }

    async fn gather_candidates(&self, user_message: &str, ai_response: &str) -> Vec<String> {
        if self.config.enable_extraction_shortcuts && user_message.len() <= self.config.shortcut_max_length {
            if let Some(fact_text) = shortcut_match(user_message) {
                self.metrics.inc_extraction_shortcuts();
                return vec![fact_text];
            }
        }

        let Some(llm) = &self.llm else {
            return Vec::new();
        };
        self.metrics.inc_extraction_full();

        let prompt = format!(
            "Conversation turn:\nUser: {user_message}\nAssistant: {ai_response}\n\n\
             List any durable facts about the user worth remembering long-term (preferences, \
             relationships, occupation, health, plans, likes/dislikes). One fact per line, plain \
             text, third person. If there is nothing worth remembering, respond with NONE."
        );
        let messages = vec![ChatMessage::new(Role::User, prompt)];
        let response = llm.generate_response("memory-extraction", messages, &classifier_generation_config()).await;

        response
            .lines()
            .map(|l| l.trim().trim_start_matches('-').trim())
            .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("none"))
            .map(|l| l.to_string())
            .collect()
    }

    async fn upsert_fact(&self, user_id: &UserId, agent_id: Option<&AgentId>, fact_text: &str) -> Result<Option<FactId>> {
        let namespace = Self::namespace(user_id, agent_id);
        let bank = infer_memory_bank(fact_text);
        let fact_key = infer_fact_key(fact_text);

        let now = Utc::now();
        let mut validity_end = None;
        match detect_temporal(fact_text, now) {
            TemporalVerdict::Permanent => {
                self.metrics.inc_temporal_permanent();
            }
            TemporalVerdict::ExpiresAt(end) => {
                self.metrics.inc_temporal_regex_detected();
                validity_end = Some(end);
            }
            TemporalVerdict::Ambiguous => {
                if should_consult_llm(bank, fact_text) {
                    if let Some(days) = self.temporal_llm_fallback(fact_text).await {
                        self.metrics.inc_temporal_llm_detected();
                        validity_end = Some(now + chrono::Duration::days(days));
                    } else {
                        validity_end = Some(now + chrono::Duration::days(self.config.temporal_default_days));
                    }
                }
            }
        }

        let add_response = self
            .vectorstore
            .add(&[serde_json::json!({"role": "user", "content": fact_text})], &namespace, None, false)
            .await?;
        let vector_id = normalize_add_response(Some(&add_response))
            .into_iter()
            .next()
            .map(|r| r.id)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

        let existing = self.store.list_for_scope(user_id, agent_id)?;
        let dedup_config = DedupConfig {
            enabled: self.config.enable_deduplication,
            use_embeddings: self.config.use_embeddings_for_dedup,
            embedding_threshold: self.config.embedding_similarity_threshold,
            text_threshold: self.config.text_similarity_threshold,
        };
        let outcome = check_duplicate(self.vectorstore.as_ref(), &namespace, fact_text, &vector_id, &existing, &dedup_config).await;

        if let DedupOutcome::Duplicate { existing_vector_id, via } = outcome {
            match via {
                DedupKind::Embedding => self.metrics.inc_duplicates_embedding(),
                DedupKind::Text => self.metrics.inc_duplicates_text(),
            }
            if let Err(e) = self.vectorstore.delete(&vector_id).await {
                tracing::warn!(error = %e, vector_id = %vector_id, "failed to delete duplicate vector");
            }
            if let Some(existing_fact) = self.store.get_by_vector_id(&existing_vector_id)? {
                self.store.update_value(&existing_fact.id, fact_text, fact_text, existing_fact.importance)?;
                return Ok(Some(existing_fact.id));
            }
            return Ok(None);
        }

        let fact = UserFact {
            id: FactId::new(),
            user_id: user_id.clone(),
            agent_id: agent_id.cloned(),
            fact_key,
            fact_value: fact_text.to_string(),
            fact_text: fact_text.to_string(),
            vector_id,
            importance: infer_importance(fact_text),
            memory_bank: bank,
            embedding_provider: "mem0".to_string(),
            embedding_model: "default".to_string(),
            validity_start: now,
            validity_end,
            is_protected: false,
            is_summarized: false,
            summarized_from: None,
            last_accessed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&fact)?;
        Ok(Some(fact.id))
    }

    async fn temporal_llm_fallback(&self, fact_text: &str) -> Option<i64> {
        let llm = self.llm.as_ref()?;
        if !self.config.temporal_llm_fallback {
            return None;
        }
        let prompt = format!(
            "How many days should this fact about a user remain relevant before it's stale? \
             Respond with only an integer number of days.\nFact: {fact_text}"
        );
        let messages = vec![ChatMessage::new(Role::User, prompt)];
        let response = llm.generate_response("memory-temporal-fallback", messages, &classifier_generation_config()).await;
        response.trim().parse::<i64>().ok()
    }

    /// Manual fact creation bypass (§4.7.9): a user message prefixed with
    /// `MANUAL_FACT_CREATION:` carries a verbatim JSON fact payload that
    /// skips the LLM classifier, dedup and temporal detection entirely.
    /// Always protected; a relational-store failure after the vector
    /// record was written triggers a compensating delete.
    pub async fn create_manual_fact(
        &self,
        user_id: &UserId,
        agent_id: Option<&AgentId>,
        marked_message: &str,
    ) -> Result<Option<FactId>> {
        let Some(payload) = marked_message.strip_prefix(MANUAL_FACT_MARKER) else {
            return Ok(None);
        };
        let parsed: Value = serde_json::from_str(payload.trim()).map_err(|e| MemoryError::InvalidManualFact(e.to_string()))?;

        let fact_key = parsed.get("fact_key").and_then(|v| v.as_str()).unwrap_or("manual_fact").to_string();
        let fact_value = parsed.get("fact_value").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let fact_text = parsed
            .get("fact_text")
            .and_then(|v| v.as_str())
            .unwrap_or(&fact_value)
            .to_string();
        let bank: MemoryBank = parsed
            .get("memory_bank")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(MemoryBank::General);

        let namespace = Self::namespace(user_id, agent_id);
        let add_response = self
            .vectorstore
            .add(&[serde_json::json!({"role": "user", "content": fact_text})], &namespace, None, false)
            .await?;
        let vector_id = normalize_add_response(Some(&add_response))
            .into_iter()
            .next()
            .map(|r| r.id)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

        let now = Utc::now();
        let fact = UserFact {
            id: FactId::new(),
            user_id: user_id.clone(),
            agent_id: agent_id.cloned(),
            fact_key,
            fact_value,
            fact_text,
            vector_id: vector_id.clone(),
            importance: 1.0,
            memory_bank: bank,
            embedding_provider: "mem0".to_string(),
            embedding_model: "default".to_string(),
            validity_start: now,
            validity_end: None,
            is_protected: true,
            is_summarized: false,
            summarized_from: None,
            last_accessed_at: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.store.insert(&fact) {
            if let Err(delete_err) = self.vectorstore.delete(&vector_id).await {
                tracing::error!(error = %delete_err, "compensating vector delete failed after manual fact insert error");
            }
            self.events.publish(OutboundEvent::MemoryError { detail: e.to_string() });
            return Err(e);
        }

        Ok(Some(fact.id))
    }

    pub async fn prune(&self, user_id: &UserId, agent_id: Option<&AgentId>) -> Result<usize> {
        let config = PruningConfig {
            max_memories_per_user: self.config.max_memories_per_user,
            strategy: self.config.pruning_strategy.clone(),
            batch_size: self.config.pruning_batch_size,
        };
        prune_scope_if_needed(&self.store, self.vectorstore.as_ref(), user_id, agent_id, &config).await
    }

    pub async fn run_summarization_cycle(&self) -> Result<usize> {
        let Some(llm) = &self.llm else { return Ok(0) };
        let config = SummarizationConfig {
            enabled: self.config.enable_summarization,
            min_age_days: self.config.summarization_min_age_days,
            similarity_threshold: self.config.summarization_similarity_threshold,
            max_cluster: self.config.max_cluster,
            min_cluster: self.config.min_cluster,
        };
        run_summarization_cycle(&self.store, self.vectorstore.as_ref(), llm, &classifier_generation_config(), &config, &self.metrics).await
    }

    pub fn error_guard_status(&self) -> ErrorGuardStatus {
        self.error_guard.status()
    }

    pub fn metrics(&self) -> MemoryMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn force_reset_error_guard(&self) {
        self.error_guard.force_reset();
    }
}

fn scope_str_to_option<'a>(scope: &str, agent_id: &'a AgentId) -> Option<&'a AgentId> {
    if scope == "agent" {
        Some(agent_id)
    } else {
        None
    }
}

fn classifier_generation_config() -> GenerationConfig {
    GenerationConfig {
        provider_kind: auris_llm::ProviderKind::OpenRouter,
        model: "openai/gpt-4o-mini".to_string(),
        temperature: 0.0,
        system_prompt: None,
        fallback: None,
    }
}

#[async_trait::async_trait]
impl auris_sessions::MemoryContextProvider for MemoryService {
    async fn get_user_memory_context(&self, user_id: &UserId, agent_id: &AgentId, query: &str) -> String {
        MemoryService::get_user_memory_context(self, user_id, Some(agent_id), query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortcut_rewrites_love_statement_to_third_person() {
        assert_eq!(shortcut_match("I love Thai food"), Some("User loves Thai food".to_string()));
    }

    #[test]
    fn shortcut_rewrites_my_favorite_statement() {
        assert_eq!(
            shortcut_match("My favorite color is blue"),
            Some("User's favorite color is blue".to_string())
        );
    }

    #[test]
    fn shortcut_rewrites_allergic_statement() {
        assert_eq!(shortcut_match("I'm allergic to peanuts"), Some("User is allergic to peanuts".to_string()));
    }

    #[test]
    fn shortcut_rewrites_always_statement_with_conjugation() {
        assert_eq!(
            shortcut_match("I always skip breakfast"),
            Some("User always skips breakfast".to_string())
        );
    }

    #[test]
    fn shortcut_returns_none_for_unrelated_text() {
        assert_eq!(shortcut_match("What's the weather like today?"), None);
    }
}
