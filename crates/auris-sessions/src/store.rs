use std::str::FromStr;
use std::sync::Mutex;

use auris_core::ids::{AgentId, MessageId, SessionId, UserId};
use auris_core::types::{Agent, LlmConfig, MemoryScope, MessageRole, ProviderKind as CoreProviderKind, TtsVoiceConfig};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, SessionError};
use crate::types::{Message, Session, SessionType};

/// Relational persistence for agents, sessions and messages. Grounded on
/// `skynet-sessions::manager::SessionManager`'s single-`Mutex<Connection>`
/// approach, generalized from one table to the three this component owns.
pub struct ConversationStore {
    db: Mutex<Connection>,
}

impl ConversationStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn get_or_create_session(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        agent_id: &AgentId,
        session_type: SessionType,
        title: Option<&str>,
    ) -> Result<Session> {
        let db = self.db.lock().unwrap();
        let now = Utc::now();

        db.execute(
            "INSERT OR IGNORE INTO sessions
             (id, user_id, agent_id, session_type, title, active, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, NULL)",
            params![
                session_id.to_string(),
                user_id.as_str(),
                agent_id.as_str(),
                session_type_str(session_type),
                title,
                now.to_rfc3339(),
            ],
        )?;

        row_to_session(&db.query_row(
            "SELECT id, user_id, agent_id, session_type, title, active, started_at, ended_at
             FROM sessions WHERE id = ?1",
            params![session_id.to_string()],
            session_row,
        )?)
    }

    /// Plain lookup, used to reload an already-existing session into the
    /// cache on a miss (no implicit creation, unlike `get_or_create_session`).
    pub fn get_session(&self, session_id: &SessionId) -> Result<Session> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT id, user_id, agent_id, session_type, title, active, started_at, ended_at
                 FROM sessions WHERE id = ?1",
                params![session_id.to_string()],
                session_row,
            )
            .optional()?;
        match row {
            Some(row) => row_to_session(&row),
            None => Err(SessionError::NotFound(session_id.to_string())),
        }
    }

    pub fn end_session(&self, session_id: &SessionId) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows = db.execute(
            "UPDATE sessions SET active = 0, ended_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), session_id.to_string()],
        )?;
        if rows == 0 {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        Ok(())
    }

    pub fn get_agent(&self, agent_id: &AgentId) -> Result<Agent> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, name, provider_kind, model, temperature, provider_ref,
                    voice, exaggeration, cfg_weight, tts_temperature, language,
                    system_prompt, memory_scope, plugins_json, is_default
             FROM agents WHERE id = ?1",
            params![agent_id.as_str()],
            agent_row,
        )
        .optional()?
        .ok_or_else(|| SessionError::AgentNotFound(agent_id.to_string()))
    }

    pub fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        let db = self.db.lock().unwrap();
        let provider_kind = match agent.llm.provider_kind {
            CoreProviderKind::Openrouter => "openrouter",
            CoreProviderKind::Local => "local",
            CoreProviderKind::ProviderRef => "provider_ref",
        };
        let plugins_json = serde_json::to_string(&agent.plugins).unwrap_or_else(|_| "{}".to_string());
        let memory_scope = match agent.memory_scope {
            MemoryScope::Global => "global",
            MemoryScope::Agent => "agent",
        };

        db.execute(
            "INSERT INTO agents
             (id, name, provider_kind, model, temperature, provider_ref,
              voice, exaggeration, cfg_weight, tts_temperature, language,
              system_prompt, memory_scope, plugins_json, is_default)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
             ON CONFLICT(id) DO UPDATE SET
                name=excluded.name, provider_kind=excluded.provider_kind,
                model=excluded.model, temperature=excluded.temperature,
                provider_ref=excluded.provider_ref, voice=excluded.voice,
                exaggeration=excluded.exaggeration, cfg_weight=excluded.cfg_weight,
                tts_temperature=excluded.tts_temperature, language=excluded.language,
                system_prompt=excluded.system_prompt, memory_scope=excluded.memory_scope,
                plugins_json=excluded.plugins_json, is_default=excluded.is_default",
            params![
                agent.id.as_str(),
                agent.name,
                provider_kind,
                agent.llm.model,
                agent.llm.temperature,
                agent.llm.provider_ref.map(|p| p.to_string()),
                agent.tts.voice,
                agent.tts.exaggeration,
                agent.tts.cfg_weight,
                agent.tts.temperature,
                agent.tts.language,
                agent.system_prompt,
                memory_scope,
                plugins_json,
                agent.is_default,
            ],
        )?;
        Ok(())
    }

    /// Duplicate guard per §3 `Message`: suppress an insert iff an
    /// identical `(session_id, role, content)` exists with
    /// `timestamp >= now - 10s`; return that row instead.
    pub fn append_message(
        &self,
        session_id: &SessionId,
        role: MessageRole,
        content: &str,
        correlation_id: Option<&str>,
    ) -> Result<Message> {
        let db = self.db.lock().unwrap();
        let now = Utc::now();
        let cutoff = (now - chrono::Duration::seconds(10)).to_rfc3339();

        if let Some(existing) = db
            .query_row(
                "SELECT id, session_id, role, content, timestamp, correlation_id
                 FROM messages
                 WHERE session_id = ?1 AND role = ?2 AND content = ?3 AND timestamp >= ?4
                 ORDER BY timestamp DESC LIMIT 1",
                params![session_id.to_string(), role.to_string(), content, cutoff],
                message_row,
            )
            .optional()?
        {
            return Ok(existing);
        }

        let id = MessageId::new();
        db.execute(
            "INSERT INTO messages (id, session_id, role, content, timestamp, correlation_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                session_id.to_string(),
                role.to_string(),
                content,
                now.to_rfc3339(),
                correlation_id,
            ],
        )?;

        Ok(Message {
            id,
            session_id: *session_id,
            role,
            content: content.to_string(),
            timestamp: now,
            correlation_id: correlation_id.map(String::from),
        })
    }

    pub fn list_messages(&self, session_id: &SessionId, limit: usize) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, session_id, role, content, timestamp, correlation_id
             FROM (
                SELECT * FROM messages WHERE session_id = ?1 ORDER BY timestamp DESC LIMIT ?2
             ) sub
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![session_id.to_string(), limit as i64], message_row)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS agents (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            provider_kind   TEXT NOT NULL,
            model           TEXT NOT NULL,
            temperature     REAL NOT NULL,
            provider_ref    TEXT,
            voice           TEXT NOT NULL,
            exaggeration    REAL NOT NULL,
            cfg_weight      REAL NOT NULL,
            tts_temperature REAL NOT NULL,
            language        TEXT NOT NULL,
            system_prompt   TEXT NOT NULL,
            memory_scope    TEXT NOT NULL,
            plugins_json    TEXT NOT NULL DEFAULT '{}',
            is_default      INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS sessions (
            id           TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL,
            agent_id     TEXT NOT NULL,
            session_type TEXT NOT NULL,
            title        TEXT,
            active       INTEGER NOT NULL DEFAULT 1,
            started_at   TEXT NOT NULL,
            ended_at     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
        CREATE TABLE IF NOT EXISTS messages (
            id             TEXT PRIMARY KEY,
            session_id     TEXT NOT NULL,
            role           TEXT NOT NULL,
            content        TEXT NOT NULL,
            timestamp      TEXT NOT NULL,
            correlation_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, timestamp);",
    )?;
    Ok(())
}

fn session_type_str(t: SessionType) -> &'static str {
    match t {
        SessionType::Web => "web",
        SessionType::Discord => "discord",
        SessionType::Extension => "extension",
    }
}

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, Option<String>, bool, String, Option<String>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn row_to_session(
    row: &(String, String, String, String, Option<String>, bool, String, Option<String>),
) -> Result<Session> {
    let (id, user_id, agent_id, session_type, title, active, started_at, ended_at) = row;
    Ok(Session {
        id: SessionId::from_str(id).map_err(|_| SessionError::NotFound(id.clone()))?,
        user_id: UserId::new(user_id.clone()),
        agent_id: AgentId::new(agent_id.clone()),
        session_type: match session_type.as_str() {
            "discord" => SessionType::Discord,
            "extension" => SessionType::Extension,
            _ => SessionType::Web,
        },
        title: title.clone(),
        active: *active,
        started_at: DateTime::parse_from_rfc3339(started_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        ended_at: ended_at
            .as_ref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc)),
    })
}

#[allow(clippy::type_complexity)]
fn agent_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    let provider_kind: String = row.get(2)?;
    let provider_ref: Option<String> = row.get(5)?;
    let memory_scope: String = row.get(12)?;
    let plugins_json: String = row.get(13)?;

    Ok(Agent {
        id: AgentId::new(row.get::<_, String>(0)?),
        name: row.get(1)?,
        llm: LlmConfig {
            provider_kind: match provider_kind.as_str() {
                "local" => CoreProviderKind::Local,
                "provider_ref" => CoreProviderKind::ProviderRef,
                _ => CoreProviderKind::Openrouter,
            },
            model: row.get(3)?,
            temperature: row.get(4)?,
            provider_ref: provider_ref.and_then(|s| s.parse().ok()),
        },
        tts: TtsVoiceConfig {
            voice: row.get(6)?,
            exaggeration: row.get(7)?,
            cfg_weight: row.get(8)?,
            temperature: row.get(9)?,
            language: row.get(10)?,
        },
        system_prompt: row.get(11)?,
        memory_scope: match memory_scope.as_str() {
            "agent" => MemoryScope::Agent,
            _ => MemoryScope::Global,
        },
        plugins: serde_json::from_str(&plugins_json).unwrap_or_default(),
        is_default: row.get(14)?,
    })
}

fn message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let timestamp: String = row.get(4)?;
    Ok(Message {
        id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
        session_id: row.get::<_, String>(1)?.parse().unwrap_or_default(),
        role: role.parse().unwrap_or(MessageRole::User),
        content: row.get(3)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        correlation_id: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use auris_core::types::{LlmConfig, MemoryScope, ProviderKind, TtsVoiceConfig};

    fn store() -> ConversationStore {
        ConversationStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn test_agent() -> Agent {
        Agent {
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
        }
    }

    #[test]
    fn get_or_create_session_is_idempotent() {
        let store = store();
        let id = SessionId::new();
        let user = UserId::new("u1");
        let agent = AgentId::new("main");

        let first = store.get_or_create_session(&id, &user, &agent, SessionType::Web, None).unwrap();
        let second = store.get_or_create_session(&id, &user, &agent, SessionType::Web, None).unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.active);
    }

    #[test]
    fn upsert_then_get_agent_round_trips() {
        let store = store();
        let agent = test_agent();
        store.upsert_agent(&agent).unwrap();
        let fetched = store.get_agent(&agent.id).unwrap();
        assert_eq!(fetched.name, "Main");
        assert_eq!(fetched.system_prompt, "be helpful");
    }

    #[test]
    fn get_agent_missing_returns_not_found() {
        let store = store();
        let err = store.get_agent(&AgentId::new("ghost")).unwrap_err();
        assert_eq!(err.code(), "SESSION_AGENT_NOT_FOUND");
    }

    #[test]
    fn append_message_suppresses_exact_duplicate_within_10_seconds() {
        let store = store();
        let id = SessionId::new();
        let user = UserId::new("u1");
        let agent = AgentId::new("main");
        store.get_or_create_session(&id, &user, &agent, SessionType::Web, None).unwrap();

        let first = store.append_message(&id, MessageRole::User, "hello", None).unwrap();
        let second = store.append_message(&id, MessageRole::User, "hello", None).unwrap();
        assert_eq!(first.id, second.id);

        let messages = store.list_messages(&id, 10).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn list_messages_returns_oldest_first() {
        let store = store();
        let id = SessionId::new();
        let user = UserId::new("u1");
        let agent = AgentId::new("main");
        store.get_or_create_session(&id, &user, &agent, SessionType::Web, None).unwrap();
        store.append_message(&id, MessageRole::User, "first", None).unwrap();
        store.append_message(&id, MessageRole::Assistant, "second", None).unwrap();

        let messages = store.list_messages(&id, 10).unwrap();
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
    }

    #[test]
    fn end_session_on_unknown_session_returns_not_found() {
        let store = store();
        let err = store.end_session(&SessionId::new()).unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }
}
