//! Background summarization (§4.7.10): periodically collapses clusters of
//! similar, aged facts into a single third-person summary, trading detail
//! for a smaller context footprint. Clustering asks the vector store for
//! each seed's nearest neighbours rather than comparing text locally, so
//! it sees the same embedding similarity retrieval does.

use std::collections::HashSet;

use auris_core::ids::FactId;
use auris_llm::{ChatMessage, GenerationConfig, LlmRouterClient, Role};
use auris_vectorstore::{normalize_search_response, VectorStoreClient};
use chrono::Utc;

use crate::error::Result;
use crate::metrics::MemoryMetrics;
use crate::store::FactStore;
use crate::types::UserFact;

pub struct SummarizationConfig {
    pub enabled: bool,
    pub min_age_days: i64,
    pub similarity_threshold: f64,
    pub max_cluster: usize,
    pub min_cluster: usize,
}

/// Runs one summarization pass over every scope's aged, unsummarized,
/// unprotected facts. Returns the number of clusters summarized.
pub async fn run_cycle(
    store: &FactStore,
    vectorstore: &dyn VectorStoreClient,
    llm: &LlmRouterClient,
    generation: &GenerationConfig,
    config: &SummarizationConfig,
    metrics: &MemoryMetrics,
) -> Result<usize> {
    if !config.enabled {
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::days(config.min_age_days);
    let candidates = store.summarization_candidates(cutoff)?;
    let clusters = greedy_cluster(vectorstore, &candidates, config.similarity_threshold, config.max_cluster, config.min_cluster).await;
    metrics.add_clusters_found(clusters.len() as u64);

    let mut summarized = 0;
    for cluster in clusters {
        let cluster_len = cluster.len() as u64;
        if summarize_cluster(store, vectorstore, llm, generation, &cluster).await.is_ok() {
            summarized += 1;
            metrics.add_facts_summarized(cluster_len);
        }
    }
    metrics.add_summaries_created(summarized);
    Ok(summarized as usize)
}

/// Greedily groups facts by embedding similarity (§4.7.10 step 1): for
/// each unassigned fact, seed a cluster and call the vector store's
/// `search(fact_text, namespace, limit=max_cluster)`, admitting any
/// returned fact scoring `>= threshold` that isn't already used. Clusters
/// that never reach `min_cluster` members are dropped.
async fn greedy_cluster(
    vectorstore: &dyn VectorStoreClient,
    facts: &[UserFact],
    threshold: f64,
    max_cluster: usize,
    min_cluster: usize,
) -> Vec<Vec<UserFact>> {
    let mut used: HashSet<FactId> = HashSet::new();
    let mut clusters = Vec::new();

    for seed in facts {
        if used.contains(&seed.id) {
            continue;
        }
        let mut cluster = vec![seed.clone()];
        used.insert(seed.id);

        let namespace = namespace_for(seed);
        let response = vectorstore.search(&seed.fact_text, &namespace, max_cluster).await;
        if let Ok(response) = response {
            let hits = normalize_search_response(&response);
            for hit in hits.iter().filter(|h| h.score >= threshold) {
                if cluster.len() >= max_cluster {
                    break;
                }
                let Some(candidate) = facts.iter().find(|f| f.vector_id == hit.id) else {
                    continue;
                };
                if used.contains(&candidate.id) {
                    continue;
                }
                if candidate.memory_bank != seed.memory_bank || candidate.user_id.as_str() != seed.user_id.as_str() {
                    continue;
                }
                cluster.push(candidate.clone());
                used.insert(candidate.id);
            }
        }

        if cluster.len() >= min_cluster {
            clusters.push(cluster);
        }
    }

    clusters
}

async fn summarize_cluster(
    store: &FactStore,
    vectorstore: &dyn VectorStoreClient,
    llm: &LlmRouterClient,
    generation: &GenerationConfig,
    cluster: &[UserFact],
) -> Result<()> {
    let bullet_list: String = cluster.iter().map(|f| format!("- {}", f.fact_text)).collect::<Vec<_>>().join("\n");
    let prompt = format!(
        "Summarize the following related facts about a user into a single third-person \
         sentence or two, under 100 words, preserving concrete details:\n{bullet_list}"
    );
    let messages = vec![ChatMessage::new(Role::User, prompt)];
    let summary_text = llm.generate_response("memory-summarization", messages, generation).await;
    if summary_text.trim().is_empty() {
        return Ok(());
    }

    let mean_importance = cluster.iter().map(|f| f.importance).sum::<f64>() / cluster.len() as f64;
    let namespace = namespace_for(&cluster[0]);
    let add_response = vectorstore.add(
        &[serde_json::json!({"role": "system", "content": summary_text})],
        &namespace,
        None,
        false,
    ).await?;
    let vector_id = auris_vectorstore::normalize_add_response(Some(&add_response))
        .into_iter()
        .next()
        .map(|r| r.id)
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

    let now = Utc::now();
    let summary_fact = UserFact {
        id: FactId::new(),
        user_id: cluster[0].user_id.clone(),
        agent_id: cluster[0].agent_id.clone(),
        fact_key: format!("summary_{}", cluster[0].memory_bank),
        fact_value: summary_text.clone(),
        fact_text: summary_text,
        vector_id,
        importance: mean_importance,
        memory_bank: cluster[0].memory_bank,
        embedding_provider: cluster[0].embedding_provider.clone(),
        embedding_model: cluster[0].embedding_model.clone(),
        validity_start: now,
        validity_end: None,
        is_protected: true,
        is_summarized: true,
        summarized_from: Some(cluster.iter().map(|f| f.id).collect()),
        last_accessed_at: None,
        created_at: now,
        updated_at: now,
    };
    store.insert(&summary_fact)?;

    for fact in cluster {
        if let Err(e) = vectorstore.delete(&fact.vector_id).await {
            tracing::warn!(error = %e, vector_id = %fact.vector_id, "failed to delete source vector after summarization");
        }
        store.delete(&fact.id)?;
    }

    Ok(())
}

fn namespace_for(fact: &UserFact) -> String {
    match &fact.agent_id {
        Some(agent) => format!("{}:{}", fact.user_id.as_str(), agent.as_str()),
        None => fact.user_id.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryBank;
    use async_trait::async_trait;
    use auris_vectorstore::Result as VsResult;
    use chrono::Utc;

    fn fact(user: &str, text: &str) -> UserFact {
        let now = Utc::now();
        UserFact {
            id: FactId::new(),
            user_id: auris_core::ids::UserId::new(user),
            agent_id: None,
            fact_key: "k".into(),
            fact_value: "v".into(),
            fact_text: text.into(),
            vector_id: uuid::Uuid::now_v7().to_string(),
            importance: 0.5,
            memory_bank: MemoryBank::Interests,
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

    /// Stands in for the real embedding store: scores every fact against
    /// the query by shared keyword rather than a true vector similarity.
    struct KeywordSimStore {
        facts: Vec<UserFact>,
    }

    fn keyword_score(a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        if a.to_lowercase().contains("hiking") && b.to_lowercase().contains("hiking") {
            return 0.8;
        }
        0.0
    }

    #[async_trait]
    impl VectorStoreClient for KeywordSimStore {
        async fn add(&self, _messages: &[serde_json::Value], _namespace: &str, _prompt: Option<&str>, _infer: bool) -> VsResult<serde_json::Value> {
            Ok(serde_json::json!({"results": []}))
        }
        async fn search(&self, query: &str, _namespace: &str, limit: usize) -> VsResult<serde_json::Value> {
            let mut scored: Vec<(f64, &UserFact)> = self.facts.iter().map(|f| (keyword_score(query, &f.fact_text), f)).collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
            let items: Vec<serde_json::Value> = scored
                .into_iter()
                .take(limit)
                .map(|(score, f)| serde_json::json!({"id": f.vector_id, "memory": f.fact_text, "score": score}))
                .collect();
            Ok(serde_json::Value::Array(items))
        }
        async fn delete(&self, _vector_id: &str) -> VsResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn clusters_similar_facts_above_threshold() {
        let facts = vec![
            fact("u1", "user enjoys hiking in the mountains"),
            fact("u1", "user enjoys hiking in the hills"),
            fact("u1", "user enjoys hiking up mountains"),
            fact("u1", "user collects vintage stamps"),
        ];
        let store = KeywordSimStore { facts: facts.clone() };
        let clusters = greedy_cluster(&store, &facts, 0.6, 8, 2).await;
        assert_eq!(clusters.len(), 1);
        assert!(clusters[0].len() >= 2);
    }

    #[tokio::test]
    async fn singleton_clusters_below_min_cluster_are_dropped() {
        let facts = vec![fact("u1", "user collects vintage stamps")];
        let store = KeywordSimStore { facts: facts.clone() };
        let clusters = greedy_cluster(&store, &facts, 0.75, 8, 3).await;
        assert!(clusters.is_empty());
    }
}
