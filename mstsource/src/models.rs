//! Data model for resolved tracks

use crate::error::{ResolveError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which provider produced a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    InnerTube,
    Cobalt,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::InnerTube => "innertube",
            Provider::Cobalt => "cobalt",
        }
    }
}

/// A platform video identifier (the 11-character YouTube id)
///
/// Parsed from a watch URL, a bare id, or produced by a search. Extractors
/// consume `TrackId`s; they never see raw search text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackId(String);

impl TrackId {
    /// Length of a platform video id
    const ID_LEN: usize = 11;

    /// Parse a direct identifier: a bare video id or a watch/share URL.
    ///
    /// Returns `None` when the input looks like free search text, which the
    /// caller should route through the search step instead.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();

        if Self::is_bare_id(input) {
            return Some(Self(input.to_string()));
        }

        if input.starts_with("http://") || input.starts_with("https://") {
            let parsed = url::Url::parse(input).ok()?;
            let host = parsed.host_str()?;

            // youtu.be/<id>
            if host == "youtu.be" {
                let id = parsed.path_segments()?.next()?;
                return Self::is_bare_id(id).then(|| Self(id.to_string()));
            }

            // *.youtube.com/watch?v=<id>
            if host == "youtube.com" || host.ends_with(".youtube.com") {
                let id = parsed
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned())?;
                return Self::is_bare_id(&id).then(|| Self(id));
            }
        }

        None
    }

    /// Wrap an id string that is already known to be a video id.
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical watch URL for this id, as consumed by external extractors.
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }

    fn is_bare_id(s: &str) -> bool {
        s.len() == Self::ID_LEN
            && s.bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A successfully resolved track: direct media URL plus minimal metadata.
///
/// Immutable once created; the resolution cache hands out clones.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTrack {
    /// Platform video id the resolution was made for
    pub identifier: String,
    /// Track title (best effort; falls back to the identifier)
    pub title: String,
    /// Duration in seconds, 0 when unknown
    pub duration_seconds: u64,
    /// Direct streamable media URL
    pub direct_media_url: String,
    /// MIME type of the upstream audio (e.g. "audio/webm")
    pub content_type: String,
    /// Provider that produced this resolution
    pub source_provider: Provider,
    /// When the resolution was made
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedTrack {
    /// Overlay metadata from a search hit onto a resolution that lacks it
    /// (the cobalt extractor knows URLs but not titles).
    pub fn with_search_metadata(mut self, title: Option<&str>, duration: Option<u64>) -> Self {
        if let Some(t) = title {
            if self.title.is_empty() || self.title == self.identifier {
                self.title = t.to_string();
            }
        }
        if let Some(d) = duration {
            if self.duration_seconds == 0 {
                self.duration_seconds = d;
            }
        }
        self
    }
}

/// A search result: the id to extract plus display metadata.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: TrackId,
    pub title: Option<String>,
    pub duration_seconds: Option<u64>,
}

/// Normalize a query for use as a cache key: trim + case-fold.
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Reject empty or whitespace-only queries before any provider call.
pub fn validate_query(query: &str) -> Result<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(ResolveError::InvalidQuery);
    }
    Ok(trimmed)
}
