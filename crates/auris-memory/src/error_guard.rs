//! Extraction circuit breaker (§4.7.7): trips after too many extraction
//! failures in a sliding window, suspending further extraction attempts
//! for a cooldown period so a misbehaving provider can't be hammered.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::types::ErrorGuardStatus;

pub struct ErrorGuardConfig {
    pub enabled: bool,
    pub window_secs: i64,
    pub threshold: usize,
    pub cooldown_secs: i64,
}

/// Sliding window of recent extraction-failure timestamps plus an optional
/// trip time. `Mutex`-guarded since extraction runs on the queue worker's
/// single task but `record_success`/`status` may be called from an admin
/// surface concurrently.
pub struct ErrorGuard {
    config: ErrorGuardConfig,
    errors: Mutex<VecDeque<DateTime<Utc>>>,
    tripped_at: Mutex<Option<DateTime<Utc>>>,
}

impl ErrorGuard {
    pub fn new(config: ErrorGuardConfig) -> Self {
        Self {
            config,
            errors: Mutex::new(VecDeque::new()),
            tripped_at: Mutex::new(None),
        }
    }

    /// Whether extraction should proceed. `false` while the breaker is
    /// open and the cooldown has not yet elapsed.
    pub fn allow(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        let mut tripped = self.tripped_at.lock().unwrap();
        match *tripped {
            Some(at) if (Utc::now() - at).num_seconds() < self.config.cooldown_secs => false,
            Some(_) => {
                *tripped = None;
                self.errors.lock().unwrap().clear();
                true
            }
            None => true,
        }
    }

    pub fn record_failure(&self) {
        if !self.config.enabled {
            return;
        }
        let now = Utc::now();
        let mut errors = self.errors.lock().unwrap();
        errors.push_back(now);
        let cutoff = now - chrono::Duration::seconds(self.config.window_secs);
        while matches!(errors.front(), Some(t) if *t < cutoff) {
            errors.pop_front();
        }
        if errors.len() >= self.config.threshold {
            *self.tripped_at.lock().unwrap() = Some(now);
        }
    }

    pub fn record_success(&self) {
        self.errors.lock().unwrap().clear();
    }

    pub fn force_reset(&self) {
        self.errors.lock().unwrap().clear();
        *self.tripped_at.lock().unwrap() = None;
    }

    pub fn status(&self) -> ErrorGuardStatus {
        let tripped = *self.tripped_at.lock().unwrap();
        let recent_error_count = self.errors.lock().unwrap().len();
        let (is_open, cooldown_remaining_secs) = match tripped {
            Some(at) => {
                let remaining = self.config.cooldown_secs - (Utc::now() - at).num_seconds();
                (remaining > 0, remaining.max(0))
            }
            None => (false, 0),
        };
        ErrorGuardStatus {
            is_open,
            recent_error_count,
            cooldown_remaining_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ErrorGuardConfig {
        ErrorGuardConfig { enabled: true, window_secs: 600, threshold: 5, cooldown_secs: 300 }
    }

    #[test]
    fn allows_extraction_below_threshold() {
        let guard = ErrorGuard::new(config());
        for _ in 0..4 {
            guard.record_failure();
        }
        assert!(guard.allow());
    }

    #[test]
    fn trips_at_threshold_and_blocks_until_reset() {
        let guard = ErrorGuard::new(config());
        for _ in 0..5 {
            guard.record_failure();
        }
        assert!(!guard.allow());
        assert!(guard.status().is_open);
    }

    #[test]
    fn force_reset_clears_tripped_state() {
        let guard = ErrorGuard::new(config());
        for _ in 0..5 {
            guard.record_failure();
        }
        guard.force_reset();
        assert!(guard.allow());
        assert!(!guard.status().is_open);
    }

    #[test]
    fn disabled_guard_always_allows() {
        let mut cfg = config();
        cfg.enabled = false;
        let guard = ErrorGuard::new(cfg);
        for _ in 0..10 {
            guard.record_failure();
        }
        assert!(guard.allow());
    }
}
