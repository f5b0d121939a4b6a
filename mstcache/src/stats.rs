//! Process-lifetime counters
//!
//! Counters are monotone for the life of the process and survive cache
//! clears. A snapshot is a consistent point-in-time copy taken under one
//! lock.

use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Default, Clone)]
struct Counters {
    total_requests: u64,
    cache_hits: u64,
    cache_misses: u64,
    successful_streams: u64,
    failed_streams: u64,
    stream_errors: u64,
    last_stream_at: Option<DateTime<Utc>>,
}

/// Shared counter set for resolutions and relays
pub struct StatsCollector {
    started_at: DateTime<Utc>,
    started_instant: Instant,
    inner: Mutex<Counters>,
}

/// Consistent copy of the counters, ready for serialization
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub successful_streams: u64,
    pub failed_streams: u64,
    pub stream_errors: u64,
    pub stream_success_rate: f64,
    pub last_stream_at: Option<DateTime<Utc>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started_instant: Instant::now(),
            inner: Mutex::new(Counters::default()),
        }
    }

    pub fn record_request(&self) {
        self.inner.lock().expect("stats lock poisoned").total_requests += 1;
    }

    pub fn record_cache_hit(&self) {
        self.inner.lock().expect("stats lock poisoned").cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.inner.lock().expect("stats lock poisoned").cache_misses += 1;
    }

    pub fn record_stream_success(&self) {
        let mut c = self.inner.lock().expect("stats lock poisoned");
        c.successful_streams += 1;
        c.last_stream_at = Some(Utc::now());
    }

    pub fn record_stream_failure(&self) {
        let mut c = self.inner.lock().expect("stats lock poisoned");
        c.failed_streams += 1;
        c.stream_errors += 1;
        c.last_stream_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.inner.lock().expect("stats lock poisoned").clone();
        let lookups = c.cache_hits + c.cache_misses;
        let streams = c.successful_streams + c.failed_streams;
        StatsSnapshot {
            started_at: self.started_at,
            uptime_seconds: self.started_instant.elapsed().as_secs(),
            total_requests: c.total_requests,
            cache_hits: c.cache_hits,
            cache_misses: c.cache_misses,
            cache_hit_rate: ratio(c.cache_hits, lookups),
            successful_streams: c.successful_streams,
            failed_streams: c.failed_streams,
            stream_errors: c.stream_errors,
            stream_success_rate: ratio(c.successful_streams, streams),
            last_stream_at: c.last_stream_at,
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_snapshot_is_zeroed() {
        let s = StatsCollector::new().snapshot();
        assert_eq!(s.total_requests, 0);
        assert_eq!(s.cache_hit_rate, 0.0);
        assert_eq!(s.stream_success_rate, 0.0);
        assert!(s.last_stream_at.is_none());
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = StatsCollector::new();
        stats.record_request();
        stats.record_request();
        stats.record_cache_hit();
        stats.record_cache_miss();
        stats.record_cache_miss();
        stats.record_stream_success();
        stats.record_stream_failure();

        let s = stats.snapshot();
        assert_eq!(s.total_requests, 2);
        assert_eq!(s.cache_hits, 1);
        assert_eq!(s.cache_misses, 2);
        assert!((s.cache_hit_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.successful_streams, 1);
        assert_eq!(s.failed_streams, 1);
        assert_eq!(s.stream_errors, 1);
        assert!((s.stream_success_rate - 0.5).abs() < 1e-9);
        assert!(s.last_stream_at.is_some());
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = StatsCollector::new();
        stats.record_request();
        let json = serde_json::to_value(stats.snapshot()).expect("serialize snapshot");
        assert_eq!(json["total_requests"], 1);
        assert!(json["started_at"].is_string());
    }
}
