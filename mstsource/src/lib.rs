//! # mstsource
//!
//! Track resolution providers for Minstrel.
//!
//! This crate turns a platform video identifier into a directly streamable
//! audio URL, through two independently substitutable extractors behind one
//! trait:
//!
//! - [`InnerTubeClient`]: the primary path, calling the platform's private
//!   API directly (search + `/player` extraction).
//! - [`CobaltExtractor`]: the fallback path, asking a pool of public cobalt
//!   instances for an audio URL.
//!
//! The extractors are stateless between calls: no session, no retained
//! results. Caching and the fallback chain live in higher layers.
//!
//! ```no_run
//! use mstsource::{InnerTubeClient, TrackExtractor, TrackId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = InnerTubeClient::new(reqwest::Client::new());
//!     let id = TrackId::parse("https://youtu.be/dQw4w9WgXcQ").expect("direct id");
//!     let track = client.extract(&id).await?;
//!     println!("{} -> {}", track.title, track.direct_media_url);
//!     Ok(())
//! }
//! ```

pub mod cobalt;
pub mod error;
pub mod innertube;
pub mod models;

pub use cobalt::CobaltExtractor;
pub use error::{ResolveError, Result};
pub use innertube::InnerTubeClient;
pub use models::{normalize_query, validate_query, Provider, ResolvedTrack, SearchHit, TrackId};

use async_trait::async_trait;

/// Search capability: free text in, top hit out.
///
/// Kept separate from extraction so the resolver performs exactly one
/// search per request regardless of how many extractors it tries.
#[async_trait]
pub trait TrackSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchHit>;
}

/// Extraction capability: identifier in, streamable URL out.
///
/// Any type implementing this qualifies as a provider adapter; the
/// resolver is agnostic to which concrete extractor succeeded.
#[async_trait]
pub trait TrackExtractor: Send + Sync {
    async fn extract(&self, track_id: &TrackId) -> Result<ResolvedTrack>;

    /// Short provider name for logs
    fn name(&self) -> &'static str;
}
