//! Cobalt fallback extractor
//!
//! When the primary extractor cannot be reached (or is rate limited), the
//! resolver retries the same track through a pool of public cobalt
//! instances. Instances are tried in shuffled order; the first usable
//! answer wins and the last instance's failure propagates.

use crate::error::{ResolveError, Result};
use crate::models::{Provider, ResolvedTrack, TrackId};
use crate::TrackExtractor;
use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Default public instances, in no particular order
pub const DEFAULT_INSTANCES: &[&str] = &[
    "https://co.wuk.sh",
    "https://api.cobalt.best",
    "https://cobalt.tools",
    "https://cobalt.pub",
];

/// Default timeout per instance attempt
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

const REQUEST_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Response from a cobalt `/api/json` call. Older instances put the media
/// URL in `audio`, newer ones in `url` with `status: "redirect"`.
#[derive(Debug, Deserialize)]
struct CobaltResponse {
    #[serde(default)]
    status: String,
    url: Option<String>,
    audio: Option<String>,
    text: Option<String>,
}

impl CobaltResponse {
    fn media_url(&self) -> Option<&str> {
        self.url.as_deref().or(self.audio.as_deref())
    }
}

/// Fallback extractor backed by a cobalt instance pool
#[derive(Debug, Clone)]
pub struct CobaltExtractor {
    http: Client,
    instances: Vec<String>,
    timeout: Duration,
}

impl CobaltExtractor {
    pub fn new(http: Client) -> Self {
        Self::with_instances(
            http,
            DEFAULT_INSTANCES.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn with_instances(http: Client, instances: Vec<String>) -> Self {
        Self {
            http,
            instances,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn try_instance(&self, instance: &str, track_id: &TrackId) -> Result<String> {
        let payload = json!({
            "url": track_id.watch_url(),
            "aFormat": "mp3",
            "isAudioOnly": true,
            "filenamePattern": "basic",
        });

        let response = self
            .http
            .post(format!("{}/api/json", instance))
            .timeout(self.timeout)
            .header("Accept", "application/json")
            .header("User-Agent", REQUEST_USER_AGENT)
            .json(&payload)
            .send()
            .await
            .map_err(ResolveError::from_transport)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ResolveError::RateLimited(format!(
                "{} returned {}",
                instance, status
            )));
        }
        if !status.is_success() {
            return Err(ResolveError::NetworkFailure(format!(
                "{} returned {}",
                instance, status
            )));
        }

        let body: CobaltResponse = response.json().await.map_err(ResolveError::from_transport)?;

        if body.status == "error" {
            return Err(ResolveError::NotFound(format!(
                "{}: {}",
                track_id,
                body.text.as_deref().unwrap_or("cobalt error")
            )));
        }

        body.media_url().map(String::from).ok_or_else(|| {
            ResolveError::UnsupportedFormat(format!("{}: cobalt response without media url", instance))
        })
    }
}

#[async_trait]
impl TrackExtractor for CobaltExtractor {
    async fn extract(&self, track_id: &TrackId) -> Result<ResolvedTrack> {
        let mut instances = self.instances.clone();
        instances.shuffle(&mut rand::rng());

        let mut last_error = ResolveError::NetworkFailure("no cobalt instances configured".into());

        for instance in &instances {
            tracing::debug!("trying cobalt instance {}", instance);
            match self.try_instance(instance, track_id).await {
                Ok(media_url) => {
                    tracing::info!("cobalt resolved {} via {}", track_id, instance);
                    return Ok(ResolvedTrack {
                        identifier: track_id.as_str().to_string(),
                        // Cobalt knows URLs, not metadata; the resolver
                        // overlays the search hit's title afterwards.
                        title: track_id.as_str().to_string(),
                        duration_seconds: 0,
                        direct_media_url: media_url,
                        content_type: "audio/mpeg".to_string(),
                        source_provider: Provider::Cobalt,
                        resolved_at: Utc::now(),
                    });
                }
                Err(e @ ResolveError::NotFound(_)) => {
                    // The track itself is the problem; other instances
                    // will answer the same.
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("cobalt instance {} failed: {}", instance, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    fn name(&self) -> &'static str {
        "cobalt"
    }
}
