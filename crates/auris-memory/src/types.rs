use auris_core::ids::{AgentId, FactId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topical grouping used by pruning, summarization and context rendering.
/// Evaluated in this fixed order when inferring a bank from fact text
/// (§4.7.4): earlier variants win ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBank {
    Events,
    Health,
    Relationships,
    Interests,
    Work,
    Personal,
    General,
}

impl MemoryBank {
    /// Fixed evaluation order for bank inference (§4.7.4).
    pub const EVALUATION_ORDER: [MemoryBank; 7] = [
        MemoryBank::Events,
        MemoryBank::Health,
        MemoryBank::Relationships,
        MemoryBank::Interests,
        MemoryBank::Work,
        MemoryBank::Personal,
        MemoryBank::General,
    ];
}

impl std::fmt::Display for MemoryBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MemoryBank::Events => "events",
            MemoryBank::Health => "health",
            MemoryBank::Relationships => "relationships",
            MemoryBank::Interests => "interests",
            MemoryBank::Work => "work",
            MemoryBank::Personal => "personal",
            MemoryBank::General => "general",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MemoryBank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "events" => Ok(MemoryBank::Events),
            "health" => Ok(MemoryBank::Health),
            "relationships" => Ok(MemoryBank::Relationships),
            "interests" => Ok(MemoryBank::Interests),
            "work" => Ok(MemoryBank::Work),
            "personal" => Ok(MemoryBank::Personal),
            "general" => Ok(MemoryBank::General),
            other => Err(format!("unknown memory bank: {other}")),
        }
    }
}

/// A single fact extracted (or manually created) about a user (§3 `UserFact`).
/// `agent_id = None` means the fact is in global scope (§4.7.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFact {
    pub id: FactId,
    pub user_id: UserId,
    pub agent_id: Option<AgentId>,
    pub fact_key: String,
    pub fact_value: String,
    pub fact_text: String,
    /// Id of the corresponding record in the external vector store. Unique;
    /// the relational row and the vector record are deleted together.
    pub vector_id: String,
    pub importance: f64,
    pub memory_bank: MemoryBank,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub validity_start: DateTime<Utc>,
    pub validity_end: Option<DateTime<Utc>>,
    /// Manually-created and summary facts are never pruned (§4.7.8/§4.7.9).
    pub is_protected: bool,
    pub is_summarized: bool,
    pub summarized_from: Option<Vec<FactId>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserFact {
    /// A fact is no longer valid context once `validity_end` has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.validity_end, Some(end) if end <= now)
    }
}

/// Outcome of the error-guard circuit breaker check (§4.7.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorGuardStatus {
    pub is_open: bool,
    pub recent_error_count: usize,
    pub cooldown_remaining_secs: i64,
}

/// Point-in-time read of the pipeline counters named across §4.7.3,
/// §4.7.5, §4.7.6 and §4.7.10.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMetricsSnapshot {
    pub extraction_shortcuts: u64,
    pub extraction_full: u64,
    pub error_guard_skips: u64,
    pub duplicates_embedding: u64,
    pub duplicates_text: u64,
    pub temporal_regex_detected: u64,
    pub temporal_llm_detected: u64,
    pub temporal_permanent: u64,
    pub summaries_created: u64,
    pub facts_summarized: u64,
    pub clusters_found: u64,
    pub retrieval_total: u64,
}
