//! InnerTube client: music search and direct audio URL extraction
//!
//! Talks to the same private API the platform's own clients use. Search
//! goes through the music frontend (songs first, plain videos as a second
//! pass); extraction calls `/player` with the ANDROID client profile, which
//! returns direct, uncyphered format URLs.

use crate::error::{ResolveError, Result};
use crate::models::{Provider, ResolvedTrack, SearchHit, TrackId};
use crate::{TrackExtractor, TrackSearch};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Default timeout for InnerTube requests
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

const MUSIC_SEARCH_URL: &str = "https://music.youtube.com/youtubei/v1/search?prettyPrint=false";
const PLAYER_URL: &str = "https://www.youtube.com/youtubei/v1/player?prettyPrint=false";

/// Search filter params (protobuf, base64) for the music search endpoint
const SONGS_FILTER: &str = "EgWKAQIIAWoKEAkQBRAKEAMQBA==";
const VIDEOS_FILTER: &str = "EgWKAQIQAWoKEAkQBRAKEAMQBA==";

/// ANDROID client profile for `/player`. Direct format URLs, no nsig.
struct ClientProfile {
    name: &'static str,
    version: &'static str,
    user_agent: &'static str,
    client_id: i32,
}

const ANDROID_CLIENT: ClientProfile = ClientProfile {
    name: "ANDROID",
    version: "19.44.38",
    user_agent: "com.google.android.youtube/19.44.38 (Linux; U; Android 14; en_US; Pixel 8) gzip",
    client_id: 3,
};

/// Music web client profile for search.
const WEB_REMIX_CLIENT: ClientProfile = ClientProfile {
    name: "WEB_REMIX",
    version: "1.20250310.01.00",
    user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    client_id: 67,
};

/// InnerTube HTTP client
///
/// Stateless between calls; shares the process-wide `reqwest::Client`.
/// Implements both [`TrackSearch`] (resolver search step) and
/// [`TrackExtractor`] (primary extractor).
#[derive(Debug, Clone)]
pub struct InnerTubeClient {
    http: Client,
    timeout: Duration,
}

impl InnerTubeClient {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call(&self, url: &str, profile: &ClientProfile, body: Value) -> Result<Value> {
        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .header("User-Agent", profile.user_agent)
            .header("X-YouTube-Client-Name", profile.client_id.to_string())
            .header("X-YouTube-Client-Version", profile.version)
            .json(&body)
            .send()
            .await
            .map_err(ResolveError::from_transport)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ResolveError::RateLimited(format!(
                "innertube returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(ResolveError::NetworkFailure(format!(
                "innertube returned {}",
                status
            )));
        }

        response.json().await.map_err(ResolveError::from_transport)
    }

    fn context(profile: &ClientProfile) -> Value {
        json!({
            "client": {
                "clientName": profile.name,
                "clientVersion": profile.version,
                "hl": "en",
                "gl": "US",
                "timeZone": "UTC",
                "utcOffsetMinutes": 0,
            }
        })
    }

    async fn search_filtered(&self, query: &str, filter: &str) -> Result<Option<SearchHit>> {
        let body = json!({
            "query": query,
            "params": filter,
            "context": Self::context(&WEB_REMIX_CLIENT),
        });
        let response = self.call(MUSIC_SEARCH_URL, &WEB_REMIX_CLIENT, body).await?;
        Ok(first_search_hit(&response))
    }
}

#[async_trait]
impl TrackSearch for InnerTubeClient {
    /// Search songs first, then plain videos, returning the top hit.
    async fn search(&self, query: &str) -> Result<SearchHit> {
        if let Some(hit) = self.search_filtered(query, SONGS_FILTER).await? {
            tracing::debug!("search hit (songs): {} -> {}", query, hit.id);
            return Ok(hit);
        }

        tracing::debug!("no song result for {:?}, retrying as video", query);
        if let Some(hit) = self.search_filtered(query, VIDEOS_FILTER).await? {
            tracing::debug!("search hit (videos): {} -> {}", query, hit.id);
            return Ok(hit);
        }

        Err(ResolveError::NotFound(query.to_string()))
    }
}

#[async_trait]
impl TrackExtractor for InnerTubeClient {
    async fn extract(&self, track_id: &TrackId) -> Result<ResolvedTrack> {
        let body = json!({
            "videoId": track_id.as_str(),
            "context": Self::context(&ANDROID_CLIENT),
            "contentCheckOk": true,
            "racyCheckOk": true,
        });
        let response = self.call(PLAYER_URL, &ANDROID_CLIENT, body).await?;
        parse_player_response(track_id, &response)
    }

    fn name(&self) -> &'static str {
        "innertube"
    }
}

/// Parse a `/player` response into a resolved track.
fn parse_player_response(track_id: &TrackId, response: &Value) -> Result<ResolvedTrack> {
    let status = response["playabilityStatus"]["status"]
        .as_str()
        .unwrap_or("UNKNOWN");
    if status != "OK" {
        let reason = response["playabilityStatus"]["reason"]
            .as_str()
            .unwrap_or("no reason given");
        return match status {
            "UNPLAYABLE" | "LOGIN_REQUIRED" | "AGE_CHECK_REQUIRED" => Err(
                ResolveError::UnsupportedFormat(format!("{}: {} ({})", track_id, status, reason)),
            ),
            _ => Err(ResolveError::NotFound(format!(
                "{}: {} ({})",
                track_id, status, reason
            ))),
        };
    }

    let formats = response["streamingData"]["adaptiveFormats"]
        .as_array()
        .ok_or_else(|| {
            ResolveError::UnsupportedFormat(format!("{}: missing adaptiveFormats", track_id))
        })?;

    let best = choose_audio_format(formats).ok_or_else(|| {
        ResolveError::UnsupportedFormat(format!("{}: no audio-only format", track_id))
    })?;

    let url = best["url"].as_str().ok_or_else(|| {
        ResolveError::UnsupportedFormat(format!("{}: format without direct url", track_id))
    })?;

    let mime = best["mimeType"].as_str().unwrap_or("audio/mp4");
    let content_type = mime.split(';').next().unwrap_or(mime).trim().to_string();

    let title = response["videoDetails"]["title"]
        .as_str()
        .unwrap_or(track_id.as_str())
        .to_string();
    let duration_seconds = response["videoDetails"]["lengthSeconds"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    Ok(ResolvedTrack {
        identifier: track_id.as_str().to_string(),
        title,
        duration_seconds,
        direct_media_url: url.to_string(),
        content_type,
        source_provider: Provider::InnerTube,
        resolved_at: Utc::now(),
    })
}

/// Choose the best audio-only format: prefer opus, then mp4a, by bitrate.
fn choose_audio_format(formats: &[Value]) -> Option<&Value> {
    formats
        .iter()
        .filter(|f| {
            f["mimeType"]
                .as_str()
                .is_some_and(|m| m.starts_with("audio/"))
        })
        .max_by_key(|f| {
            let mime = f["mimeType"].as_str().unwrap_or("");
            let codec_priority: u64 = if mime.contains("opus") {
                1_000_000_000
            } else if mime.contains("mp4a") {
                500_000_000
            } else {
                0
            };
            codec_priority + f["bitrate"].as_u64().unwrap_or(0)
        })
}

/// Walk a search response for the first playable hit.
///
/// The response nests results under renderer objects whose shape differs
/// between the songs and videos filters; scanning for the two renderer
/// types is sturdier than spelling out the full section hierarchy.
fn first_search_hit(value: &Value) -> Option<SearchHit> {
    match value {
        Value::Object(map) => {
            if let Some(renderer) = map.get("musicResponsiveListItemRenderer") {
                if let Some(hit) = hit_from_music_renderer(renderer) {
                    return Some(hit);
                }
            }
            if let Some(renderer) = map.get("videoRenderer") {
                if let Some(hit) = hit_from_video_renderer(renderer) {
                    return Some(hit);
                }
            }
            map.values().find_map(first_search_hit)
        }
        Value::Array(items) => items.iter().find_map(first_search_hit),
        _ => None,
    }
}

fn hit_from_music_renderer(renderer: &Value) -> Option<SearchHit> {
    let video_id = renderer["playlistItemData"]["videoId"].as_str()?;
    let title = renderer["flexColumns"][0]["musicResponsiveListItemFlexColumnRenderer"]["text"]
        ["runs"][0]["text"]
        .as_str()
        .map(String::from);

    // Duration is the last run of the second flex column ("Artist • Album • 3:32")
    let duration_seconds = renderer["flexColumns"][1]
        ["musicResponsiveListItemFlexColumnRenderer"]["text"]["runs"]
        .as_array()
        .and_then(|runs| runs.last())
        .and_then(|run| run["text"].as_str())
        .and_then(parse_duration_text);

    Some(SearchHit {
        id: TrackId::from_raw(video_id),
        title,
        duration_seconds,
    })
}

fn hit_from_video_renderer(renderer: &Value) -> Option<SearchHit> {
    let video_id = renderer["videoId"].as_str()?;
    let title = renderer["title"]["runs"][0]["text"]
        .as_str()
        .map(String::from);
    let duration_seconds = renderer["lengthText"]["simpleText"]
        .as_str()
        .and_then(parse_duration_text);

    Some(SearchHit {
        id: TrackId::from_raw(video_id),
        title,
        duration_seconds,
    })
}

/// Parse "3:32" / "1:02:45" style duration text.
fn parse_duration_text(text: &str) -> Option<u64> {
    let mut seconds: u64 = 0;
    for part in text.split(':') {
        seconds = seconds
            .checked_mul(60)?
            .checked_add(part.trim().parse().ok()?)?;
    }
    Some(seconds)
}
