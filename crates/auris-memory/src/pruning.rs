//! Retention pruning (§4.7.8): once a scope exceeds `max_memories_per_user`,
//! the oldest (FIFO) or least-recently-accessed (LRU) unprotected facts are
//! removed until the scope is back under the cap. The vector-store record
//! is always deleted before the relational row, so a failure partway
//! through never leaves an orphaned vector with no corresponding fact.

use auris_core::ids::{AgentId, UserId};
use auris_vectorstore::VectorStoreClient;

use crate::error::Result;
use crate::store::FactStore;

pub struct PruningConfig {
    pub max_memories_per_user: usize,
    pub strategy: String,
    pub batch_size: usize,
}

/// Prunes a single scope down to its cap, if it's over. Returns the number
/// of facts removed.
pub async fn prune_scope_if_needed(
    store: &FactStore,
    vectorstore: &dyn VectorStoreClient,
    user_id: &UserId,
    agent_id: Option<&AgentId>,
    config: &PruningConfig,
) -> Result<usize> {
    let count = store.count_for_scope(user_id, agent_id)?;
    if count <= config.max_memories_per_user {
        return Ok(0);
    }

    let overflow = count - config.max_memories_per_user;
    let limit = overflow + config.batch_size;
    let candidates = store.prune_candidates(user_id, agent_id, &config.strategy, limit)?;

    let mut removed = 0;
    for fact in candidates {
        if let Err(e) = vectorstore.delete(&fact.vector_id).await {
            tracing::warn!(error = %e, vector_id = %fact.vector_id, "failed to delete vector during pruning, skipping row");
            continue;
        }
        store.delete(&fact.id)?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use auris_core::ids::FactId;
    use auris_vectorstore::Result as VsResult;
    use chrono::Utc;
    use rusqlite::Connection;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl VectorStoreClient for CountingStore {
        async fn add(&self, _messages: &[Value], _namespace: &str, _prompt: Option<&str>, _infer: bool) -> VsResult<Value> {
            Ok(Value::Null)
        }
        async fn search(&self, _query: &str, _namespace: &str, _limit: usize) -> VsResult<Value> {
            Ok(Value::Null)
        }
        async fn delete(&self, _vector_id: &str) -> VsResult<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn make_fact(user: &str, idx: usize) -> crate::types::UserFact {
        let now = Utc::now();
        crate::types::UserFact {
            id: FactId::new(),
            user_id: UserId::new(user),
            agent_id: None,
            fact_key: format!("key_{idx}"),
            fact_value: "value".into(),
            fact_text: "text".into(),
            vector_id: format!("vec-{user}-{idx}"),
            importance: 0.5,
            memory_bank: crate::types::MemoryBank::General,
            embedding_provider: "openai".into(),
            embedding_model: "m".into(),
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

    #[tokio::test]
    async fn prunes_down_to_cap_when_over() {
        let store = FactStore::new(Connection::open_in_memory().unwrap()).unwrap();
        for i in 0..10 {
            store.insert(&make_fact("u1", i)).unwrap();
        }
        let vs = CountingStore { deletes: AtomicUsize::new(0) };
        let config = PruningConfig { max_memories_per_user: 5, strategy: "fifo".into(), batch_size: 0 };
        let removed = prune_scope_if_needed(&store, &vs, &UserId::new("u1"), None, &config).await.unwrap();
        assert_eq!(removed, 5);
        assert_eq!(vs.deletes.load(Ordering::SeqCst), 5);
        assert_eq!(store.count_for_scope(&UserId::new("u1"), None).unwrap(), 5);
    }

    #[tokio::test]
    async fn does_nothing_when_under_cap() {
        let store = FactStore::new(Connection::open_in_memory().unwrap()).unwrap();
        store.insert(&make_fact("u1", 0)).unwrap();
        let vs = CountingStore { deletes: AtomicUsize::new(0) };
        let config = PruningConfig { max_memories_per_user: 5, strategy: "fifo".into(), batch_size: 0 };
        let removed = prune_scope_if_needed(&store, &vs, &UserId::new("u1"), None, &config).await.unwrap();
        assert_eq!(removed, 0);
    }
}
