use auris_core::ids::ProviderId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub model: String,
}

/// One increment of a streamed response, mirrors the source's chunk
/// callback invocation — terminal `Done`/`Error` close the stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    Done,
    Error(String),
}

/// `config.provider_kind`: resolves to process-wide env defaults for
/// `openrouter`/`local`, or a stored provider row for `ProviderRef`.
#[derive(Debug, Clone)]
pub enum ProviderKind {
    OpenRouter,
    Local,
    ProviderRef(ProviderId),
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub provider_kind: ProviderKind,
    pub model: String,
    pub temperature: f32,
    pub system_prompt: Option<String>,
    /// Secondary provider tried once if the primary fails recoverably.
    pub fallback: Option<ProviderKind>,
}

/// A stored `LLMProvider` row (§3). `api_key_encrypted` is opaque until
/// passed through the vault.
#[derive(Debug, Clone)]
pub struct ProviderRow {
    pub id: ProviderId,
    pub name: String,
    pub base_url: String,
    pub api_key_encrypted: Option<String>,
    pub provider_type: String,
    pub models: Vec<String>,
    pub default_model: Option<String>,
    pub is_active: bool,
}

/// Resolved connection details ready to build an HTTP provider from.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}
