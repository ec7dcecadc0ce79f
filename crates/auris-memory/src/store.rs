use std::sync::Mutex;

use auris_core::ids::{AgentId, FactId, UserId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{MemoryError, Result};
use crate::types::{MemoryBank, UserFact};

/// Relational persistence for facts and the scope-resolution policy table
/// (§4.7.1). Grounded directly on `skynet-memory::manager::MemoryManager`,
/// generalized from its flat `user_memory` table to the richer `UserFact`
/// shape spec.md's data model requires (vector-store linkage, validity
/// window, protection/summarization flags).
pub struct FactStore {
    db: Mutex<Connection>,
}

impl FactStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open(path: &str) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn insert(&self, fact: &UserFact) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO user_facts (
                id, user_id, agent_id, fact_key, fact_value, fact_text, vector_id,
                importance, memory_bank, embedding_provider, embedding_model,
                validity_start, validity_end, is_protected, is_summarized,
                summarized_from, last_accessed_at, created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                fact.id.to_string(),
                fact.user_id.as_str(),
                fact.agent_id.as_ref().map(|a| a.as_str()),
                fact.fact_key,
                fact.fact_value,
                fact.fact_text,
                fact.vector_id,
                fact.importance,
                fact.memory_bank.to_string(),
                fact.embedding_provider,
                fact.embedding_model,
                fact.validity_start.to_rfc3339(),
                fact.validity_end.map(|d| d.to_rfc3339()),
                fact.is_protected,
                fact.is_summarized,
                fact.summarized_from.as_ref().map(|ids| serde_json::to_string(ids).unwrap_or_default()),
                fact.last_accessed_at.map(|d| d.to_rfc3339()),
                fact.created_at.to_rfc3339(),
                fact.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &FactId) -> Result<UserFact> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT * FROM user_facts WHERE id = ?1",
            params![id.to_string()],
            row_to_fact,
        )
        .optional()?
        .ok_or_else(|| MemoryError::NotFound(id.to_string()))
    }

    pub fn get_by_vector_id(&self, vector_id: &str) -> Result<Option<UserFact>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                "SELECT * FROM user_facts WHERE vector_id = ?1",
                params![vector_id],
                row_to_fact,
            )
            .optional()?)
    }

    /// All non-expired facts for a scope, used by the dedup pass and
    /// context rendering. `agent_id = None` selects global-scope facts.
    pub fn list_for_scope(&self, user_id: &UserId, agent_id: Option<&AgentId>) -> Result<Vec<UserFact>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT * FROM user_facts WHERE user_id = ?1 AND agent_id IS ?2 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![user_id.as_str(), agent_id.map(|a| a.as_str())], row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count_for_scope(&self, user_id: &UserId, agent_id: Option<&AgentId>) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM user_facts WHERE user_id = ?1 AND agent_id IS ?2",
            params![user_id.as_str(), agent_id.map(|a| a.as_str())],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn touch_last_accessed(&self, id: &FactId, at: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE user_facts SET last_accessed_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    pub fn update_value(&self, id: &FactId, fact_value: &str, fact_text: &str, importance: f64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE user_facts SET fact_value = ?1, fact_text = ?2, importance = ?3, updated_at = ?4 WHERE id = ?5",
            params![fact_value, fact_text, importance, Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    pub fn set_validity_end(&self, id: &FactId, end: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE user_facts SET validity_end = ?1, updated_at = ?2 WHERE id = ?3",
            params![end.to_rfc3339(), Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    pub fn mark_summarized_replacement(&self, fact: &UserFact) -> Result<()> {
        self.insert(fact)
    }

    pub fn delete(&self, id: &FactId) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM user_facts WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    /// Oldest-first unprotected facts beyond the retention cap, used by
    /// pruning (§4.7.8). LRU ordering falls back to `created_at` when a
    /// fact has never been accessed.
    pub fn prune_candidates(
        &self,
        user_id: &UserId,
        agent_id: Option<&AgentId>,
        strategy: &str,
        limit: usize,
    ) -> Result<Vec<UserFact>> {
        let db = self.db.lock().unwrap();
        let order = if strategy == "lru" {
            "COALESCE(last_accessed_at, created_at) ASC"
        } else {
            "created_at ASC"
        };
        let sql = format!(
            "SELECT * FROM user_facts WHERE user_id = ?1 AND agent_id IS ?2 AND is_protected = 0 ORDER BY {order} LIMIT ?3"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(
            params![user_id.as_str(), agent_id.map(|a| a.as_str()), limit as i64],
            row_to_fact,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Facts eligible for summarization: unprotected, unsummarized, older
    /// than the configured minimum age (§4.7.10).
    pub fn summarization_candidates(&self, older_than: DateTime<Utc>) -> Result<Vec<UserFact>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT * FROM user_facts
             WHERE is_protected = 0 AND is_summarized = 0 AND created_at < ?1
             ORDER BY user_id, agent_id, memory_bank, created_at ASC",
        )?;
        let rows = stmt.query_map(params![older_than.to_rfc3339()], row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_scope_preference(&self, user_id: &UserId, agent_id: &AgentId) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                "SELECT scope FROM memory_scope_overrides WHERE user_id = ?1 AND agent_id = ?2",
                params![user_id.as_str(), agent_id.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn get_deprecated_user_toggle(&self, user_id: &UserId) -> Result<Option<bool>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                "SELECT memory_enabled FROM user_memory_toggle WHERE user_id = ?1",
                params![user_id.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn get_admin_global_scope(&self) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                "SELECT value FROM memory_admin_policy WHERE key = 'global_scope'",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_admin_global_scope(&self, scope: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO memory_admin_policy (key, value) VALUES ('global_scope', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![scope],
        )?;
        Ok(())
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_facts (
            id               TEXT PRIMARY KEY,
            user_id          TEXT NOT NULL,
            agent_id         TEXT,
            fact_key         TEXT NOT NULL,
            fact_value       TEXT NOT NULL,
            fact_text        TEXT NOT NULL,
            vector_id        TEXT NOT NULL UNIQUE,
            importance       REAL NOT NULL DEFAULT 0.5,
            memory_bank      TEXT NOT NULL DEFAULT 'general',
            embedding_provider TEXT NOT NULL,
            embedding_model  TEXT NOT NULL,
            validity_start   TEXT NOT NULL,
            validity_end     TEXT,
            is_protected     INTEGER NOT NULL DEFAULT 0,
            is_summarized    INTEGER NOT NULL DEFAULT 0,
            summarized_from  TEXT,
            last_accessed_at TEXT,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_facts_scope ON user_facts(user_id, agent_id);
        CREATE INDEX IF NOT EXISTS idx_facts_bank ON user_facts(memory_bank);

        CREATE TABLE IF NOT EXISTS memory_scope_overrides (
            user_id  TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            scope    TEXT NOT NULL,
            PRIMARY KEY (user_id, agent_id)
        );

        CREATE TABLE IF NOT EXISTS user_memory_toggle (
            user_id        TEXT PRIMARY KEY,
            memory_enabled INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memory_admin_policy (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserFact> {
    let id: String = row.get("id")?;
    let user_id: String = row.get("user_id")?;
    let agent_id: Option<String> = row.get("agent_id")?;
    let bank: String = row.get("memory_bank")?;
    let validity_start: String = row.get("validity_start")?;
    let validity_end: Option<String> = row.get("validity_end")?;
    let last_accessed_at: Option<String> = row.get("last_accessed_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let summarized_from: Option<String> = row.get("summarized_from")?;

    Ok(UserFact {
        id: id.parse().unwrap_or_default(),
        user_id: UserId::new(user_id),
        agent_id: agent_id.map(AgentId::new),
        fact_key: row.get("fact_key")?,
        fact_value: row.get("fact_value")?,
        fact_text: row.get("fact_text")?,
        vector_id: row.get("vector_id")?,
        importance: row.get("importance")?,
        memory_bank: bank.parse().unwrap_or(MemoryBank::General),
        embedding_provider: row.get("embedding_provider")?,
        embedding_model: row.get("embedding_model")?,
        validity_start: parse_dt(&validity_start),
        validity_end: validity_end.as_deref().map(parse_dt),
        is_protected: row.get("is_protected")?,
        is_summarized: row.get("is_summarized")?,
        summarized_from: summarized_from.and_then(|s| serde_json::from_str(&s).ok()),
        last_accessed_at: last_accessed_at.as_deref().map(parse_dt),
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use auris_core::ids::FactId;

    fn sample_fact(user: &str) -> UserFact {
        let now = Utc::now();
        UserFact {
            id: FactId::new(),
            user_id: UserId::new(user),
            agent_id: None,
            fact_key: "location_residence".into(),
            fact_value: "Portland".into(),
            fact_text: "User lives in Portland".into(),
            vector_id: format!("vec-{user}"),
            importance: 0.7,
            memory_bank: MemoryBank::Personal,
            embedding_provider: "openai".into(),
            embedding_model: "text-embedding-3-small".into(),
            validity_start: now,
            validity_end: None,
            is_protected: false,
            is_summarized: false,
            summarized_from: None,
            last_accessed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let store = FactStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let fact = sample_fact("u1");
        store.insert(&fact).unwrap();
        let loaded = store.get(&fact.id).unwrap();
        assert_eq!(loaded.fact_value, "Portland");
        assert_eq!(loaded.memory_bank, MemoryBank::Personal);
    }

    #[test]
    fn get_by_vector_id_finds_the_matching_fact() {
        let store = FactStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let fact = sample_fact("u1");
        store.insert(&fact).unwrap();
        let found = store.get_by_vector_id(&fact.vector_id).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn list_for_scope_filters_by_user_and_agent() {
        let store = FactStore::new(Connection::open_in_memory().unwrap()).unwrap();
        store.insert(&sample_fact("u1")).unwrap();
        store.insert(&sample_fact("u2")).unwrap();
        let facts = store.list_for_scope(&UserId::new("u1"), None).unwrap();
        assert_eq!(facts.len(), 1);
    }

    #[test]
    fn prune_candidates_excludes_protected_facts() {
        let store = FactStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let mut protected = sample_fact("u1");
        protected.is_protected = true;
        protected.vector_id = "vec-protected".into();
        store.insert(&protected).unwrap();
        store.insert(&sample_fact("u1")).unwrap();
        let candidates = store.prune_candidates(&UserId::new("u1"), None, "fifo", 10).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(!candidates[0].is_protected);
    }
}
