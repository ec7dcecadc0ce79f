//! Temporal validity detection (§4.7.6): decides how long an extracted
//! fact should remain valid context. Runs a fixed five-step cascade,
//! stopping at the first step that produces a verdict:
//!
//! 1. permanent patterns ("always", "never", date of birth, ...) -> no end
//! 2. a fixed-duration phrase table ("for a week" -> 7 days, ...)
//! 3. dynamic "in N days/weeks/months" phrases
//! 4. "until {weekday}" phrases, resolved to the next occurrence
//! 5. an LLM fallback for `Events`-bank or otherwise ambiguous text

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::MemoryBank;

#[derive(Debug, Clone, PartialEq)]
pub enum TemporalVerdict {
    Permanent,
    ExpiresAt(DateTime<Utc>),
    /// No pattern matched; caller should consult the LLM fallback (step 5)
    /// if enabled, or else apply `temporal_default_days`.
    Ambiguous,
}

static PERMANENT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "(?i)\\balways\\b",
        "(?i)\\bnever\\b",
        "(?i)\\bpermanently\\b",
        "(?i)\\bborn on\\b",
        "(?i)\\bforever\\b",
        "(?i)\\bbirthday\\b",
        "(?i)\\banniversary\\b",
        "(?i)\\bannual\\b",
        "(?i)\\bevery\\b",
        "(?i)\\bfavorite \\w+ is\\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

struct FixedDuration {
    pattern: Regex,
    days: i64,
}

/// Literal phrase -> day-offset table (§4.7.6 step 2).
static FIXED_DURATIONS: Lazy<Vec<FixedDuration>> = Lazy::new(|| {
    vec![
        FixedDuration { pattern: Regex::new(r"(?i)\btomorrow\b").unwrap(), days: 2 },
        FixedDuration { pattern: Regex::new(r"(?i)\bthis week\b").unwrap(), days: 7 },
        FixedDuration { pattern: Regex::new(r"(?i)\bnext month\b").unwrap(), days: 45 },
        FixedDuration { pattern: Regex::new(r"(?i)\bappointment\b").unwrap(), days: 2 },
        FixedDuration { pattern: Regex::new(r"(?i)\bvacation\b").unwrap(), days: 21 },
    ]
});

static DYNAMIC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bin (\d+) (day|days|week|weeks|month|months)\b").unwrap());

static UNTIL_WEEKDAY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\buntil (monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b").unwrap()
});

/// Runs steps 1-4 of the cascade. Step 5 (LLM fallback) is the caller's
/// responsibility since it needs an async call out to the provider router.
pub fn detect(fact_text: &str, now: DateTime<Utc>) -> TemporalVerdict {
    if PERMANENT_PATTERNS.iter().any(|re| re.is_match(fact_text)) {
        return TemporalVerdict::Permanent;
    }

    if let Some(fixed) = FIXED_DURATIONS.iter().find(|f| f.pattern.is_match(fact_text)) {
        return TemporalVerdict::ExpiresAt(now + Duration::days(fixed.days));
    }

    if let Some(caps) = DYNAMIC_PATTERN.captures(fact_text) {
        let amount: i64 = caps[1].parse().unwrap_or(1);
        let unit = caps[2].to_lowercase();
        let days = if unit.starts_with("week") {
            amount * 7
        } else if unit.starts_with("month") {
            amount * 30
        } else {
            amount
        };
        return TemporalVerdict::ExpiresAt(now + Duration::days(days));
    }

    if let Some(caps) = UNTIL_WEEKDAY_PATTERN.captures(fact_text) {
        if let Some(weekday) = parse_weekday(&caps[1]) {
            return TemporalVerdict::ExpiresAt(next_occurrence_of(weekday, now));
        }
    }

    TemporalVerdict::Ambiguous
}

/// Whether step 5 (LLM fallback) should be consulted for an `Ambiguous`
/// verdict: events are inherently time-bound, so always worth asking;
/// other banks only if the fact contains no temporal language at all
/// (so clearly-permanent facts like "user's name is Sam" don't pay for
/// an LLM round trip).
pub fn should_consult_llm(bank: MemoryBank, fact_text: &str) -> bool {
    if bank == MemoryBank::Events {
        return true;
    }
    let lower = fact_text.to_lowercase();
    ["soon", "recently", "next", "upcoming", "currently"].iter().any(|kw| lower.contains(kw))
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    match s.to_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

fn next_occurrence_of(weekday: Weekday, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.weekday();
    let mut delta = weekday.num_days_from_monday() as i64 - today.num_days_from_monday() as i64;
    if delta <= 0 {
        delta += 7;
    }
    now + Duration::days(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_pattern_yields_permanent_verdict() {
        assert_eq!(detect("User always drinks coffee in the morning", Utc::now()), TemporalVerdict::Permanent);
    }

    #[test]
    fn fixed_duration_phrase_sets_validity_window() {
        let now = Utc::now();
        match detect("User is traveling this week", now) {
            TemporalVerdict::ExpiresAt(end) => {
                assert_eq!((end - now).num_days(), 7);
            }
            other => panic!("expected ExpiresAt, got {other:?}"),
        }
    }

    #[test]
    fn doctors_appointment_tomorrow_expires_in_two_days() {
        let now = Utc::now();
        match detect("User has a doctor's appointment tomorrow", now) {
            TemporalVerdict::ExpiresAt(end) => {
                assert_eq!((end - now).num_days(), 2);
            }
            other => panic!("expected ExpiresAt, got {other:?}"),
        }
    }

    #[test]
    fn favorite_x_is_y_is_permanent() {
        assert_eq!(detect("User's favorite color is blue", Utc::now()), TemporalVerdict::Permanent);
    }

    #[test]
    fn dynamic_in_n_days_sets_validity_window() {
        let now = Utc::now();
        match detect("User is visiting in 3 weeks", now) {
            TemporalVerdict::ExpiresAt(end) => {
                assert_eq!((end - now).num_days(), 21);
            }
            other => panic!("expected ExpiresAt, got {other:?}"),
        }
    }

    #[test]
    fn unmatched_text_is_ambiguous() {
        assert_eq!(detect("User enjoys hiking in the mountains", Utc::now()), TemporalVerdict::Ambiguous);
    }

    #[test]
    fn events_bank_always_consults_llm_fallback() {
        assert!(should_consult_llm(MemoryBank::Events, "User has a trip planned"));
    }
}
