//! Reconciles the two wire shapes a Mem0-compatible vector store returns:
//! `add()` replies with `{"results": [...]}`, `search()` replies with a bare
//! list in current versions and may move to `{"results": [...]}` in future
//! ones. Ported from `Mem0ResponseNormalizer` in the source system — this
//! module is the ONLY place either shape is recognised.

use serde_json::Value;

/// One normalized vector-store result record.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResult {
    pub id: String,
    pub text: String,
    pub event: String,
    pub score: f64,
    pub metadata: Value,
}

fn first_str_field(item: &Value, fields: &[&str]) -> String {
    for field in fields {
        if let Some(s) = item.get(field).and_then(|v| v.as_str()) {
            if !s.is_empty() {
                return s.to_string();
            }
        }
    }
    String::new()
}

fn extract_id(item: &Value) -> String {
    item.get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn extract_score(item: &Value) -> f64 {
    item.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0)
}

fn extract_metadata(item: &Value) -> Value {
    item.get("metadata").cloned().unwrap_or_else(|| serde_json::json!({}))
}

/// Normalizes an `add()` response: `{"results": [{id, memory|text|data, event?, score?, metadata?}]}`.
pub fn normalize_add_response(response: Option<&Value>) -> Vec<NormalizedResult> {
    let Some(response) = response else {
        tracing::debug!("vectorstore add() returned empty response");
        return Vec::new();
    };

    let Some(results) = response.get("results").and_then(|r| r.as_array()) else {
        tracing::warn!(?response, "unexpected add() response format, expected 'results' key");
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|item| {
            if !item.is_object() {
                tracing::warn!(?item, "unexpected item type in add() results");
                return None;
            }
            Some(NormalizedResult {
                id: extract_id(item),
                text: first_str_field(item, &["memory", "text", "data"]),
                event: item
                    .get("event")
                    .and_then(|v| v.as_str())
                    .unwrap_or("UNKNOWN")
                    .to_string(),
                score: extract_score(item),
                metadata: extract_metadata(item),
            })
        })
        .collect()
}

/// Normalizes a `search()` response: either a bare list (current) or
/// `{"results": [...]}` (future). Unknown item types degrade to
/// `text=str(value)` with empty metadata rather than being dropped.
pub fn normalize_search_response(response: &Value) -> Vec<NormalizedResult> {
    if response.is_null() {
        return Vec::new();
    }

    if let Some(results) = response.get("results").and_then(|r| r.as_array()) {
        return results
            .iter()
            .map(|item| {
                if !item.is_object() {
                    return NormalizedResult {
                        id: String::new(),
                        text: stringify(item),
                        event: "NONE".to_string(),
                        score: 0.0,
                        metadata: serde_json::json!({}),
                    };
                }
                NormalizedResult {
                    id: extract_id(item),
                    text: first_str_field(item, &["data", "memory", "text"]),
                    event: "NONE".to_string(),
                    score: extract_score(item),
                    metadata: extract_metadata(item),
                }
            })
            .collect();
    }

    if let Some(list) = response.as_array() {
        return list
            .iter()
            .map(|item| {
                if let Some(s) = item.as_str() {
                    return NormalizedResult {
                        id: String::new(),
                        text: s.to_string(),
                        event: "NONE".to_string(),
                        score: 0.0,
                        metadata: serde_json::json!({}),
                    };
                }
                if !item.is_object() {
                    tracing::warn!(?item, "unexpected item type in search() list");
                    return NormalizedResult {
                        id: String::new(),
                        text: stringify(item),
                        event: "NONE".to_string(),
                        score: 0.0,
                        metadata: serde_json::json!({}),
                    };
                }
                NormalizedResult {
                    id: extract_id(item),
                    text: first_str_field(item, &["memory", "data", "text"]),
                    event: "NONE".to_string(),
                    score: extract_score(item),
                    metadata: extract_metadata(item),
                }
            })
            .collect();
    }

    tracing::warn!(?response, "unexpected search() response format");
    Vec::new()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_add_response_with_memory_field() {
        let response = json!({"results": [{"id": "vec1", "memory": "Portland", "event": "ADD"}]});
        let normalized = normalize_add_response(Some(&response));
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].id, "vec1");
        assert_eq!(normalized[0].text, "Portland");
        assert_eq!(normalized[0].event, "ADD");
        assert_eq!(normalized[0].score, 0.0);
    }

    #[test]
    fn add_response_none_yields_empty() {
        assert!(normalize_add_response(None).is_empty());
    }

    #[test]
    fn add_response_without_results_key_yields_empty() {
        let response = json!({"unexpected": true});
        assert!(normalize_add_response(Some(&response)).is_empty());
    }

    #[test]
    fn normalizes_search_response_as_bare_list_v1_0_1() {
        let response = json!([{"id": "vec1", "memory": "Portland", "score": 0.95}]);
        let normalized = normalize_search_response(&response);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].text, "Portland");
        assert_eq!(normalized[0].score, 0.95);
        assert_eq!(normalized[0].event, "NONE");
    }

    #[test]
    fn normalizes_search_response_as_results_dict_future_format() {
        let response = json!({"results": [{"id": "vec1", "data": "Portland", "score": 0.95}]});
        let normalized = normalize_search_response(&response);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].text, "Portland");
    }

    #[test]
    fn search_response_string_only_item_degrades_gracefully() {
        let response = json!(["just a string"]);
        let normalized = normalize_search_response(&response);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].text, "just a string");
        assert_eq!(normalized[0].id, "");
    }

    #[test]
    fn search_response_empty_list_yields_empty() {
        assert!(normalize_search_response(&json!([])).is_empty());
    }

    #[test]
    fn search_response_never_panics_on_missing_fields() {
        let response = json!([{"unrelated": "field"}]);
        let normalized = normalize_search_response(&response);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].text, "");
    }
}
