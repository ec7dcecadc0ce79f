use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, ProviderId};

/// Role of a message in a conversation. Shared across sessions, memory and
/// LLM crates so none of them need to redeclare it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// `agent_id = None` means global scope; `Some(id)` means agent-specific.
/// Mirrors the `memory_scope` field of `Agent` in the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    Global,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openrouter,
    Local,
    ProviderRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider_kind: ProviderKind,
    pub model: String,
    pub temperature: f32,
    /// Set only when `provider_kind == ProviderRef`.
    pub provider_ref: Option<ProviderId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsVoiceConfig {
    pub voice: String,
    pub exaggeration: f32,
    pub cfg_weight: f32,
    pub temperature: f32,
    pub language: String,
}

/// Agent identity + configuration. `system_prompt`, `llm`, `tts` and
/// `memory_scope` are consumed by C5/C6/C7; `plugins` by C10.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub llm: LlmConfig,
    pub tts: TtsVoiceConfig,
    pub system_prompt: String,
    pub memory_scope: MemoryScope,
    /// plugin_type -> raw (possibly still-encrypted) config value.
    #[serde(default)]
    pub plugins: HashMap<String, serde_json::Value>,
    pub is_default: bool,
}

/// Severity of a `ServiceErrorEvent`, per spec.md §4.11 / §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_role_round_trips_through_display_and_parse() {
        for role in [MessageRole::User, MessageRole::Assistant, MessageRole::System] {
            let s = role.to_string();
            let parsed: MessageRole = s.parse().unwrap();
            assert_eq!(role, parsed);
        }
    }
}
