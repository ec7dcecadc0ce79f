//! Fact-key categorisation and memory-bank inference (§4.7.4). A small,
//! fixed regex table takes first crack at turning free text into a stable
//! `fact_key`; anything that doesn't match falls back to the first two or
//! three non-stopword tokens so every fact still gets a deterministic key.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::MemoryBank;

struct CategoryRule {
    pattern: Regex,
    key_template: &'static str,
}

static STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "i", "you", "he", "she", "it", "we", "they", "my", "your", "his",
    "her", "its", "our", "their", "and", "or", "but", "to", "of", "in", "on", "at", "for", "with", "that", "this",
];

static CATEGORY_RULES: Lazy<Vec<CategoryRule>> = Lazy::new(|| {
    vec![
        CategoryRule {
            pattern: Regex::new(r"(?i)\bfavorite (\w+)\b").unwrap(),
            key_template: "favorite_{1}",
        },
        CategoryRule {
            pattern: Regex::new(r"(?i)\blives? in\b").unwrap(),
            key_template: "location_residence",
        },
        CategoryRule {
            pattern: Regex::new(r"(?i)\bworks? as (?:an?\s+)?(\w+)\b").unwrap(),
            key_template: "occupation_{1}",
        },
        CategoryRule {
            pattern: Regex::new(r"(?i)\bhas (\d+) child(?:ren)?\b").unwrap(),
            key_template: "family_children",
        },
        CategoryRule {
            pattern: Regex::new(r"(?i)\ballergic to (\w+)\b").unwrap(),
            key_template: "health_allergy_{1}",
        },
        CategoryRule {
            pattern: Regex::new(r"(?i)\b(?:loves?|likes?|enjoys?|prefers?)\s+(\w+)\b").unwrap(),
            key_template: "preference_{1}",
        },
        CategoryRule {
            pattern: Regex::new(r"(?i)\bborn (?:in|on) (\w+)\b").unwrap(),
            key_template: "personal_birth_{1}",
        },
        CategoryRule {
            pattern: Regex::new(r"(?i)\bmarried to (\w+)\b").unwrap(),
            key_template: "relationship_spouse_{1}",
        },
    ]
});

/// Maps fact text to a stable `fact_key`. Regex groups substitute into the
/// template in `{1}`-style placeholders.
pub fn infer_fact_key(fact_text: &str) -> String {
    for rule in CATEGORY_RULES.iter() {
        if let Some(caps) = rule.pattern.captures(fact_text) {
            if rule.key_template.contains("{1}") {
                if let Some(group) = caps.get(1) {
                    return rule.key_template.replace("{1}", &group.as_str().to_lowercase());
                }
                continue;
            }
            return rule.key_template.to_string();
        }
    }
    fallback_key(fact_text)
}

/// First 2-3 non-stopword tokens, underscore-joined and lowercased.
fn fallback_key(fact_text: &str) -> String {
    let tokens: Vec<&str> = fact_text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(&w.to_lowercase().as_str()))
        .take(3)
        .collect();

    if tokens.is_empty() {
        return "general_fact".to_string();
    }
    tokens.join("_").to_lowercase()
}

/// Infers a memory bank from fact text by keyword matching in the fixed
/// evaluation order `Events > Health > Relationships > Interests > Work >
/// Personal > General`. First matching bank wins.
pub fn infer_memory_bank(fact_text: &str) -> MemoryBank {
    let lower = fact_text.to_lowercase();
    for bank in MemoryBank::EVALUATION_ORDER {
        if keywords_for(bank).iter().any(|kw| lower.contains(kw)) {
            return bank;
        }
    }
    MemoryBank::General
}

fn keywords_for(bank: MemoryBank) -> &'static [&'static str] {
    match bank {
        MemoryBank::Events => &["birthday", "anniversary", "appointment", "scheduled", "upcoming", "trip to"],
        MemoryBank::Health => &["allergic", "allergy", "medication", "diagnosed", "doctor", "condition", "illness"],
        MemoryBank::Relationships => &["married", "spouse", "partner", "girlfriend", "boyfriend", "wife", "husband", "children", "family"],
        MemoryBank::Interests => &["favorite", "enjoys", "loves", "love", "hobby", "likes to", "passionate about", "fan of"],
        MemoryBank::Work => &["works as", "works at", "job", "employer", "occupation", "career", "colleague"],
        MemoryBank::Personal => &["lives in", "born", "name is", "age", "from"],
        MemoryBank::General => &[],
    }
}

const CRITICAL_IMPORTANCE_KEYWORDS: &[&str] = &["allergic", "allergy", "medication", "emergency", "diagnosed", "medical condition"];
const IMPORTANT_IMPORTANCE_KEYWORDS: &[&str] = &["married", "spouse", "children", "anniversary", "birthday", "employer", "occupation"];
const MEDIUM_IMPORTANCE_KEYWORDS: &[&str] = &["favorite", "enjoys", "loves", "love", "likes", "prefers", "hobby"];

/// Falls back to pattern-based importance (§4.7.3 step 6c) when the
/// extraction source carries no usable score of its own:
/// critical=1.0, important=0.8, medium=0.6, default=0.7.
pub fn infer_importance(fact_text: &str) -> f64 {
    let lower = fact_text.to_lowercase();
    if CRITICAL_IMPORTANCE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        1.0
    } else if IMPORTANT_IMPORTANCE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        0.8
    } else if MEDIUM_IMPORTANCE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        0.6
    } else {
        0.7
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_favorite_key_with_captured_noun() {
        assert_eq!(infer_fact_key("User's favorite color is blue"), "favorite_color");
    }

    #[test]
    fn infers_location_residence_key() {
        assert_eq!(infer_fact_key("User lives in Portland"), "location_residence");
    }

    #[test]
    fn infers_occupation_key_with_captured_role() {
        assert_eq!(infer_fact_key("User works as a teacher"), "occupation_teacher");
    }

    #[test]
    fn falls_back_to_leading_tokens_when_no_rule_matches() {
        assert_eq!(infer_fact_key("Something entirely unmatched here"), "something_entirely_unmatched");
    }

    #[test]
    fn bank_inference_prefers_events_over_personal_on_overlap() {
        assert_eq!(infer_memory_bank("User has an upcoming birthday trip to Portland"), MemoryBank::Events);
    }

    #[test]
    fn bank_inference_falls_back_to_general() {
        assert_eq!(infer_memory_bank("Something with no recognizable keyword"), MemoryBank::General);
    }

    #[test]
    fn infers_preference_key_from_loves() {
        assert_eq!(infer_fact_key("User loves Thai food"), "preference_thai");
    }

    #[test]
    fn preference_statement_lands_in_interests_bank() {
        assert_eq!(infer_memory_bank("User loves Thai food"), MemoryBank::Interests);
    }

    #[test]
    fn importance_defaults_to_medium_for_preference_statements() {
        assert!(infer_importance("User loves Thai food") >= 0.6);
    }

    #[test]
    fn importance_escalates_for_health_keywords() {
        assert_eq!(infer_importance("User is allergic to peanuts"), 1.0);
    }
}
