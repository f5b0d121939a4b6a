//! # Minstrel Cache
//!
//! Shared in-memory state for the Minstrel pipeline:
//!
//! - [`ResolutionCache`]: a bounded key→value store with a 30-minute TTL
//!   and FIFO eviction, used to memoize resolved tracks.
//! - [`StatsCollector`]: process-lifetime counters for requests, cache
//!   hits/misses and relay outcomes.
//!
//! Both are internally synchronized and meant to be shared behind an
//! `Arc` across request handlers.

mod cache;
mod stats;

pub use cache::ResolutionCache;
pub use stats::{StatsCollector, StatsSnapshot};
