//! Query-to-track orchestration
//!
//! Ties together the search client, the two extractors and the resolution
//! cache. A request makes at most one search, one primary extraction and
//! one fallback extraction; the fallback fires only for error kinds that
//! suggest the primary is unreachable or throttled, never for a definitive
//! "this track does not exist".

use std::sync::Arc;

use mstcache::{ResolutionCache, StatsCollector};
use mstsource::{
    normalize_query, validate_query, ResolvedTrack, Result, TrackExtractor, TrackId, TrackSearch,
};

pub struct Resolver {
    search: Arc<dyn TrackSearch>,
    primary: Arc<dyn TrackExtractor>,
    fallback: Arc<dyn TrackExtractor>,
    cache: Arc<ResolutionCache<ResolvedTrack>>,
    stats: Arc<StatsCollector>,
}

impl Resolver {
    pub fn new(
        search: Arc<dyn TrackSearch>,
        primary: Arc<dyn TrackExtractor>,
        fallback: Arc<dyn TrackExtractor>,
        cache: Arc<ResolutionCache<ResolvedTrack>>,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            search,
            primary,
            fallback,
            cache,
            stats,
        }
    }

    /// Resolve a query or direct identifier to a playable track.
    ///
    /// Cache hits return without touching any provider. On a miss the
    /// result is cached under the normalized query, whichever extractor
    /// produced it.
    pub async fn resolve(&self, query: &str) -> Result<ResolvedTrack> {
        let query = validate_query(query)?;
        let key = normalize_query(query);

        if let Some(track) = self.cache.get(&key) {
            self.stats.record_cache_hit();
            tracing::debug!("cache hit for {:?}", key);
            return Ok(track);
        }
        self.stats.record_cache_miss();

        // Direct identifiers and watch URLs skip the search round-trip.
        let (track_id, hit) = match TrackId::parse(query) {
            Some(id) => (id, None),
            None => {
                let hit = self.search.search(query).await?;
                (hit.id.clone(), Some(hit))
            }
        };

        let track = match self.primary.extract(&track_id).await {
            Ok(track) => track,
            Err(e) if e.triggers_fallback() => {
                tracing::warn!(
                    "{} failed for {} ({}), falling back to {}",
                    self.primary.name(),
                    track_id,
                    e,
                    self.fallback.name(),
                );
                self.fallback.extract(&track_id).await?
            }
            Err(e) => return Err(e),
        };

        let track = match hit {
            Some(hit) => track.with_search_metadata(hit.title.as_deref(), hit.duration_seconds),
            None => track,
        };

        tracing::info!(
            "resolved {:?} to {} via {}",
            key,
            track.identifier,
            track.source_provider.as_str(),
        );
        self.cache.put(key, track.clone());
        Ok(track)
    }

    pub fn cache(&self) -> &ResolutionCache<ResolvedTrack> {
        &self.cache
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }
}
