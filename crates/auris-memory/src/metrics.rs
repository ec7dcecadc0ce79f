//! Pipeline counters (§4.7.3/§4.7.5/§4.7.6/§4.7.10): plain atomics bumped
//! inline by the extraction, dedup, temporal and summarization paths so
//! Testable Properties 6/8 and the S4-S6 scenarios have something to
//! assert against. Never read for control flow, only observed.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::MemoryMetricsSnapshot;

#[derive(Default)]
pub struct MemoryMetrics {
    extraction_shortcuts: AtomicU64,
    extraction_full: AtomicU64,
    error_guard_skips: AtomicU64,
    duplicates_embedding: AtomicU64,
    duplicates_text: AtomicU64,
    temporal_regex_detected: AtomicU64,
    temporal_llm_detected: AtomicU64,
    temporal_permanent: AtomicU64,
    summaries_created: AtomicU64,
    facts_summarized: AtomicU64,
    clusters_found: AtomicU64,
    retrieval_total: AtomicU64,
}

impl MemoryMetrics {
    pub fn inc_extraction_shortcuts(&self) {
        self.extraction_shortcuts.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_extraction_full(&self) {
        self.extraction_full.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_error_guard_skips(&self) {
        self.error_guard_skips.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_duplicates_embedding(&self) {
        self.duplicates_embedding.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_duplicates_text(&self) {
        self.duplicates_text.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_temporal_regex_detected(&self) {
        self.temporal_regex_detected.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_temporal_llm_detected(&self) {
        self.temporal_llm_detected.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_temporal_permanent(&self) {
        self.temporal_permanent.fetch_add(1, Ordering::Relaxed);
    }
    pub fn add_summaries_created(&self, n: u64) {
        self.summaries_created.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_facts_summarized(&self, n: u64) {
        self.facts_summarized.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_clusters_found(&self, n: u64) {
        self.clusters_found.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_retrieval_total(&self) {
        self.retrieval_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MemoryMetricsSnapshot {
        MemoryMetricsSnapshot {
            extraction_shortcuts: self.extraction_shortcuts.load(Ordering::Relaxed),
            extraction_full: self.extraction_full.load(Ordering::Relaxed),
            error_guard_skips: self.error_guard_skips.load(Ordering::Relaxed),
            duplicates_embedding: self.duplicates_embedding.load(Ordering::Relaxed),
            duplicates_text: self.duplicates_text.load(Ordering::Relaxed),
            temporal_regex_detected: self.temporal_regex_detected.load(Ordering::Relaxed),
            temporal_llm_detected: self.temporal_llm_detected.load(Ordering::Relaxed),
            temporal_permanent: self.temporal_permanent.load(Ordering::Relaxed),
            summaries_created: self.summaries_created.load(Ordering::Relaxed),
            facts_summarized: self.facts_summarized.load(Ordering::Relaxed),
            clusters_found: self.clusters_found.load(Ordering::Relaxed),
            retrieval_total: self.retrieval_total.load(Ordering::Relaxed),
        }
    }
}
