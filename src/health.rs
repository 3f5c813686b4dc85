//! Per-source fetch statistics. Purely observational: the orchestrator writes,
//! monitoring reads.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceStats {
    pub last_fetch: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub error_count: u64,
    /// Exponentially weighted, 0..=100.
    pub uptime_pct: f64,
    pub avg_response_ms: f64,
    pub fetch_count: u64,
    /// Items accepted past dedup over the process lifetime.
    pub feed_count: u64,
}

impl Default for SourceStats {
    fn default() -> Self {
        Self {
            last_fetch: None,
            last_error: None,
            last_error_at: None,
            error_count: 0,
            uptime_pct: 100.0,
            avg_response_ms: 0.0,
            fetch_count: 0,
            feed_count: 0,
        }
    }
}

impl SourceStats {
    fn record_latency(&mut self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1_000.0;
        self.avg_response_ms = if self.fetch_count == 0 {
            ms
        } else {
            (self.avg_response_ms + ms) / 2.0
        };
        self.fetch_count += 1;
    }
}

#[derive(Debug, Default)]
pub struct HealthTracker {
    stats: RwLock<HashMap<String, SourceStats>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, source: &str, elapsed: Duration, now: DateTime<Utc>) {
        let mut guard = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        let s = guard.entry(source.to_string()).or_default();
        s.record_latency(elapsed);
        s.last_fetch = Some(now);
        s.uptime_pct = s.uptime_pct * 0.9 + 100.0 * 0.1;
    }

    pub fn record_failure(&self, source: &str, error: &str, elapsed: Duration, now: DateTime<Utc>) {
        let mut guard = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        let s = guard.entry(source.to_string()).or_default();
        s.record_latency(elapsed);
        s.last_fetch = Some(now);
        s.last_error = Some(error.to_string());
        s.last_error_at = Some(now);
        s.error_count += 1;
        s.uptime_pct *= 0.9;
    }

    pub fn record_accepted(&self, source: &str, n: usize) {
        if n == 0 {
            return;
        }
        let mut guard = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        guard.entry(source.to_string()).or_default().feed_count += n as u64;
    }

    pub fn get(&self, source: &str) -> Option<SourceStats> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
    }

    /// Sorted by source name for stable output.
    pub fn snapshot(&self) -> BTreeMap<String, SourceStats> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
