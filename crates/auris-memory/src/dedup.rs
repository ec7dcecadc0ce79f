//! Deduplication against existing facts before insert (§4.7.5). Prefers an
//! embedding-similarity search against the vector store; falls back to a
//! plain text-similarity ratio when the store call fails. Fails open: if
//! both paths error, the candidate is treated as novel rather than dropped.

use auris_vectorstore::{normalize_search_response, VectorStoreClient};

use crate::types::UserFact;

pub struct DedupConfig {
    pub enabled: bool,
    pub use_embeddings: bool,
    pub embedding_threshold: f64,
    pub text_threshold: f64,
}

/// Which path flagged a candidate as a duplicate, so the caller can bump
/// the matching counter (`duplicates_embedding`/`duplicates_text`).
pub enum DedupKind {
    Embedding,
    Text,
}

/// Result of a dedup check: either the candidate is novel, or it matches
/// an existing fact closely enough that the caller should upsert instead
/// of inserting a new row.
pub enum DedupOutcome {
    Novel,
    Duplicate { existing_vector_id: String, via: DedupKind },
}

/// `exclude_vector_id` is the vector just created for this same candidate
/// (if any) — the embedding search must not match a fact against its own
/// just-added vector.
pub async fn check_duplicate(
    vectorstore: &dyn VectorStoreClient,
    namespace: &str,
    candidate_text: &str,
    exclude_vector_id: &str,
    existing: &[UserFact],
    config: &DedupConfig,
) -> DedupOutcome {
    if !config.enabled {
        return DedupOutcome::Novel;
    }

    if config.use_embeddings {
        match vectorstore.search(candidate_text, namespace, 5).await {
            Ok(response) => {
                let results = normalize_search_response(&response);
                if let Some(hit) = results
                    .iter()
                    .find(|r| r.score >= config.embedding_threshold && r.id != exclude_vector_id)
                {
                    if !hit.id.is_empty() {
                        return DedupOutcome::Duplicate {
                            existing_vector_id: hit.id.clone(),
                            via: DedupKind::Embedding,
                        };
                    }
                }
                return DedupOutcome::Novel;
            }
            Err(e) => {
                tracing::warn!(error = %e, "dedup embedding search failed, falling back to text similarity");
            }
        }
    }

    for fact in existing {
        if fact.vector_id == exclude_vector_id {
            continue;
        }
        if text_similarity(candidate_text, &fact.fact_text) >= config.text_threshold {
            return DedupOutcome::Duplicate {
                existing_vector_id: fact.vector_id.clone(),
                via: DedupKind::Text,
            };
        }
    }
    DedupOutcome::Novel
}

/// Character-level similarity ratio in `[0.0, 1.0]`, matching
/// `difflib.SequenceMatcher.ratio()`: find the longest common substring,
/// recurse on the unmatched prefix and suffix, and sum the matched
/// lengths as `M`; the ratio is `2*M / (len(a) + len(b))`.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let total = a.len() + b.len();
    if total == 0 {
        return 0.0;
    }
    let matched = matching_chars(&a, &b);
    (2 * matched) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (len, i, j) = longest_common_substring(a, b);
    if len == 0 {
        return 0;
    }
    matching_chars(&a[..i], &b[..j]) + len + matching_chars(&a[i + len..], &b[j + len..])
}

fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    let mut best_len = 0;
    let mut best_i = 0;
    let mut best_j = 0;
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                dp[i][j] = dp[i - 1][j - 1] + 1;
                if dp[i][j] > best_len {
                    best_len = dp[i][j];
                    best_i = i - best_len;
                    best_j = j - best_len;
                }
            }
        }
    }
    (best_len, best_i, best_j)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_has_similarity_one() {
        assert_eq!(text_similarity("user lives in portland", "user lives in portland"), 1.0);
    }

    #[test]
    fn disjoint_text_has_similarity_zero() {
        assert_eq!(text_similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn near_duplicate_text_exceeds_default_threshold() {
        let sim = text_similarity("user currently lives in portland oregon", "user currently lives in portland");
        assert!(sim >= 0.90, "similarity {sim} below expected threshold");
    }
}
