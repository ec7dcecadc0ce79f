use auris_core::ids::{AgentId, MessageId, SessionId, UserId};
use auris_core::types::{Agent, MessageRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Web,
    Discord,
    Extension,
}

/// A conversation session (§3 `Session`). `active = true` implies
/// `ended_at = None`; enforced by `ConversationStore::end_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub agent_id: AgentId,
    pub session_type: SessionType,
    pub title: Option<String>,
    pub active: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// An append-only conversation message (§3 `Message`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

/// In-memory per-session state (§3 `CachedContext`). Holds plain values
/// detached from any storage handle; the cache is a second store, never
/// the source of truth.
#[derive(Debug, Clone)]
pub struct CachedContext {
    pub session: Session,
    pub agent: Agent,
    pub messages: Vec<Message>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedContext {
    pub fn touch(&mut self, ttl: chrono::Duration) {
        self.last_activity = Utc::now();
        self.expires_at = self.last_activity + ttl;
    }

    pub fn push_message(&mut self, message: Message, max_context: usize) {
        self.messages.push(message);
        if self.messages.len() > max_context {
            let overflow = self.messages.len() - max_context;
            self.messages.drain(0..overflow);
        }
    }
}
