use std::sync::Mutex;

use auris_core::ids::{AgentId, TaskId, UserId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{QueueError, Result};
use crate::types::{ExtractionTask, TaskStatus};

/// Persistence for queued extraction tasks. Grounded on
/// `skynet-scheduler::engine::SchedulerEngine`'s own-`Connection`,
/// poll-and-claim pattern, generalized from cron jobs to one-shot
/// extraction work items with a bounded retry count.
pub struct TaskStore {
    db: Mutex<Connection>,
}

impl TaskStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open(path: &str) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn enqueue(
        &self,
        user_id: &UserId,
        agent_id: Option<&AgentId>,
        user_message: &str,
        ai_response: &str,
    ) -> Result<ExtractionTask> {
        let db = self.db.lock().unwrap();
        let task = ExtractionTask {
            id: TaskId::new(),
            user_id: user_id.clone(),
            agent_id: agent_id.cloned(),
            user_message: user_message.to_string(),
            ai_response: ai_response.to_string(),
            status: TaskStatus::Pending,
            attempts: 0,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        db.execute(
            "INSERT INTO extraction_tasks (
                id, user_id, agent_id, user_message, ai_response, status,
                attempts, error, created_at, completed_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,NULL)",
            params![
                task.id.to_string(),
                task.user_id.as_str(),
                task.agent_id.as_ref().map(|a| a.as_str()),
                task.user_message,
                task.ai_response,
                task.status.to_string(),
                task.attempts,
                task.error,
                task.created_at.to_rfc3339(),
            ],
        )?;
        Ok(task)
    }

    /// Claims up to `limit` pending tasks (oldest first) and marks them
    /// `processing` so a second concurrent poll never double-claims them.
    pub fn claim_batch(&self, limit: usize) -> Result<Vec<ExtractionTask>> {
        let db = self.db.lock().unwrap();
        let ids: Vec<String> = {
            let mut stmt = db.prepare(
                "SELECT id FROM extraction_tasks WHERE status = 'pending' ORDER BY created_at ASC LIMIT ?1",
            )?;
            stmt.query_map(params![limit as i64], |row| row.get(0))?.filter_map(|r| r.ok()).collect()
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        for id in &ids {
            db.execute(
                "UPDATE extraction_tasks SET status = 'processing' WHERE id = ?1",
                params![id],
            )?;
        }
        let mut tasks = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(task) = db
                .query_row("SELECT * FROM extraction_tasks WHERE id = ?1", params![id], row_to_task)
                .optional()?
            {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    pub fn mark_completed(&self, id: &TaskId) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE extraction_tasks SET status = 'completed', completed_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    /// Increments `attempts`; re-queues as `pending` if under `max_attempts`,
    /// otherwise leaves the task permanently `failed`.
    pub fn mark_failed(&self, id: &TaskId, error: &str, max_attempts: u32) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let attempts: u32 = db.query_row(
            "SELECT attempts FROM extraction_tasks WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        let new_attempts = attempts + 1;
        let will_retry = new_attempts < max_attempts;
        let status = if will_retry { "pending" } else { "failed" };
        db.execute(
            "UPDATE extraction_tasks SET status = ?1, attempts = ?2, error = ?3 WHERE id = ?4",
            params![status, new_attempts, error, id.to_string()],
        )?;
        Ok(will_retry)
    }

    pub fn get(&self, id: &TaskId) -> Result<ExtractionTask> {
        let db = self.db.lock().unwrap();
        db.query_row("SELECT * FROM extraction_tasks WHERE id = ?1", params![id.to_string()], row_to_task)
            .optional()?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    pub fn count_pending(&self) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let count: i64 =
            db.query_row("SELECT COUNT(*) FROM extraction_tasks WHERE status = 'pending'", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS extraction_tasks (
            id           TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL,
            agent_id     TEXT,
            user_message TEXT NOT NULL,
            ai_response  TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'pending',
            attempts     INTEGER NOT NULL DEFAULT 0,
            error        TEXT,
            created_at   TEXT NOT NULL,
            completed_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON extraction_tasks(status, created_at);",
    )
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExtractionTask> {
    let id: String = row.get("id")?;
    let user_id: String = row.get("user_id")?;
    let agent_id: Option<String> = row.get("agent_id")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;

    Ok(ExtractionTask {
        id: id.parse().unwrap_or_default(),
        user_id: UserId::new(user_id),
        agent_id: agent_id.map(AgentId::new),
        user_message: row.get("user_message")?,
        ai_response: row.get("ai_response")?,
        status: status.parse().unwrap_or(TaskStatus::Pending),
        attempts: row.get("attempts")?,
        error: row.get("error")?,
        created_at: parse_dt(&created_at),
        completed_at: completed_at.as_deref().map(parse_dt),
    })
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_then_claim_marks_processing() {
        let store = TaskStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let task = store.enqueue(&UserId::new("u1"), None, "hello", "hi there").unwrap();
        let claimed = store.claim_batch(10).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id.to_string(), task.id.to_string());
        let reloaded = store.get(&task.id).unwrap();
        assert_eq!(reloaded.status, TaskStatus::Processing);
    }

    #[test]
    fn claim_batch_respects_limit() {
        let store = TaskStore::new(Connection::open_in_memory().unwrap()).unwrap();
        for _ in 0..15 {
            store.enqueue(&UserId::new("u1"), None, "m", "r").unwrap();
        }
        let claimed = store.claim_batch(10).unwrap();
        assert_eq!(claimed.len(), 10);
    }

    #[test]
    fn mark_failed_requeues_under_max_attempts() {
        let store = TaskStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let task = store.enqueue(&UserId::new("u1"), None, "m", "r").unwrap();
        let will_retry = store.mark_failed(&task.id, "boom", 3).unwrap();
        assert!(will_retry);
        assert_eq!(store.get(&task.id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn mark_failed_gives_up_at_max_attempts() {
        let store = TaskStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let task = store.enqueue(&UserId::new("u1"), None, "m", "r").unwrap();
        store.mark_failed(&task.id, "boom", 1).unwrap();
        assert_eq!(store.get(&task.id).unwrap().status, TaskStatus::Failed);
    }
}
