//! HTTP boundary
//!
//! Routes, the resolve-error to status-code mapping, and the streaming
//! response plumbing. A `/stream` request resolves first, then spawns the
//! relay as a producer task feeding a bounded channel; the receiver backs
//! the response body, so a client that goes away tears the whole pipeline
//! down through the channel. The response status is committed only after
//! the first upstream chunk arrives, which lets a relay that never
//! connects surface as `502` instead of a truncated `200`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use mstcache::{ResolutionCache, StatsCollector};
use mstrelay::{IdentityPool, RelayError, StreamRelay};
use mstsource::{CobaltExtractor, InnerTubeClient, ResolveError, ResolvedTrack};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::config::{Config, ConfigError};
use crate::resolver::Resolver;

/// Chunks buffered between the relay and the client body.
const STREAM_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("relay: {0}")]
    Relay(#[from] RelayError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    resolver: Arc<Resolver>,
    relay: Arc<StreamRelay>,
    cache: Arc<ResolutionCache<ResolvedTrack>>,
    stats: Arc<StatsCollector>,
    cache_ttl_secs: u64,
}

impl AppState {
    pub fn new(
        resolver: Arc<Resolver>,
        relay: Arc<StreamRelay>,
        cache: Arc<ResolutionCache<ResolvedTrack>>,
        stats: Arc<StatsCollector>,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            resolver,
            relay,
            cache,
            stats,
            cache_ttl_secs,
        }
    }

    /// Wire the full pipeline from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        let http = reqwest::Client::builder()
            .timeout(config.resolve_timeout())
            .build()?;

        let innertube = Arc::new(
            InnerTubeClient::new(http.clone()).with_timeout(config.resolve_timeout()),
        );
        let cobalt = if config.cobalt_instances.is_empty() {
            CobaltExtractor::new(http)
        } else {
            CobaltExtractor::with_instances(http, config.cobalt_instances.clone())
        }
        .with_timeout(config.resolve_timeout());

        let cache = Arc::new(ResolutionCache::new(
            config.cache_max_entries,
            config.cache_ttl(),
        ));
        let stats = Arc::new(StatsCollector::new());

        let resolver = Arc::new(Resolver::new(
            Arc::clone(&innertube) as _,
            innertube as _,
            Arc::new(cobalt),
            Arc::clone(&cache),
            Arc::clone(&stats),
        ));

        let relay = Arc::new(StreamRelay::new(
            config.relay_config(),
            Arc::new(IdentityPool::new(config.user_agents.clone())),
        )?);

        Ok(Self::new(resolver, relay, cache, stats, config.cache_ttl_secs))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(stream_music))
        .route("/api/music", get(api_music))
        .route("/api/device", get(api_device))
        .route("/status", get(status))
        .route("/stats", get(stats))
        .route("/cache/clear", post(clear_cache))
        .fallback(not_found)
        .with_state(state)
}

/// Bind and run until ctrl-c.
pub async fn serve(config: Config) -> Result<(), ServerError> {
    let state = AppState::from_config(&config)?;
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl_c");
    tracing::info!("ctrl-c received, shutting down");
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    query: Option<String>,
}

impl ApiError {
    fn invalid_query(query: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_query",
            message: "missing or empty query".to_string(),
            query: Some(query.to_string()),
        }
    }

    fn from_resolve(err: ResolveError, query: &str) -> Self {
        let (status, kind) = match &err {
            ResolveError::InvalidQuery => (StatusCode::BAD_REQUEST, "invalid_query"),
            ResolveError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ResolveError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            ResolveError::UnsupportedFormat(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format")
            }
            ResolveError::NetworkFailure(_) => (StatusCode::BAD_GATEWAY, "upstream_failure"),
        };
        Self {
            status,
            kind,
            message: err.to_string(),
            query: Some(query.to_string()),
        }
    }

    fn from_relay(err: RelayError, query: &str) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            kind: "upstream_exhausted",
            message: err.to_string(),
            query: Some(query.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.message,
            "kind": self.kind,
            "query": self.query,
        });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct StreamParams {
    #[serde(default)]
    q: String,
    format: Option<String>,
}

async fn stream_music(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    state.stats.record_request();
    if params.q.trim().is_empty() {
        return ApiError::invalid_query(&params.q).into_response();
    }

    tracing::info!("stream request: {:?}", params.q);
    let track = match state.resolver.resolve(&params.q).await {
        Ok(track) => track,
        Err(e) => {
            state.stats.record_stream_failure();
            return ApiError::from_resolve(e, &params.q).into_response();
        }
    };

    let content_type = params
        .format
        .as_deref()
        .and_then(content_type_for_format)
        .unwrap_or(track.content_type.as_str())
        .to_string();

    let (tx, mut rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAPACITY);
    let (err_tx, err_rx) = oneshot::channel::<RelayError>();
    let relay = Arc::clone(&state.relay);
    let stats = Arc::clone(&state.stats);
    let url = track.direct_media_url.clone();
    let query = params.q.clone();

    tokio::spawn(async move {
        match relay.run(&url, &tx).await {
            Ok(summary) => {
                stats.record_stream_success();
                tracing::info!(
                    "stream finished for {:?}: {} bytes, {} attempt(s), {} discontinuities",
                    query,
                    summary.bytes_sent,
                    summary.attempts,
                    summary.discontinuities,
                );
            }
            Err(RelayError::ClientDisconnected) => {
                tracing::info!("client disconnected from {:?}", query);
            }
            Err(e) => {
                stats.record_stream_failure();
                tracing::error!("stream failed for {:?}: {}", query, e);
                let _ = err_tx.send(e);
            }
        }
    });

    // Hold the response until the relay proves it can deliver bytes.
    match rx.recv().await {
        Some(first) => {
            let rest = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
            let body = Body::from_stream(
                futures_util::stream::once(async move { Ok::<Bytes, Infallible>(first) })
                    .chain(rest),
            );
            audio_response(&track, &content_type, body)
        }
        None => match err_rx.await {
            Ok(e) => ApiError::from_relay(e, &params.q).into_response(),
            // Upstream body was legitimately empty.
            Err(_) => audio_response(&track, &content_type, Body::empty()),
        },
    }
}

fn audio_response(track: &ResolvedTrack, content_type: &str, body: Body) -> Response {
    let filename = format!(
        "{}.{}",
        sanitize_filename(&track.title),
        extension_for(content_type)
    );
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", filename),
        )
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[derive(Deserialize)]
struct MusicParams {
    #[serde(default)]
    q: String,
}

async fn api_music(
    State(state): State<AppState>,
    Query(params): Query<MusicParams>,
) -> Response {
    state.stats.record_request();
    if params.q.trim().is_empty() {
        return ApiError::invalid_query(&params.q).into_response();
    }

    match state.resolver.resolve(&params.q).await {
        Ok(track) => Json(json!({
            "success": true,
            "data": {
                "query": params.q,
                "identifier": track.identifier,
                "title": track.title,
                "duration_seconds": track.duration_seconds,
                "provider": track.source_provider.as_str(),
                "audio_url": track.direct_media_url,
                "stream_url": local_stream_url(&params.q),
            },
            "timestamp": chrono::Utc::now().timestamp(),
        }))
        .into_response(),
        Err(e) => ApiError::from_resolve(e, &params.q).into_response(),
    }
}

#[derive(Deserialize)]
struct DeviceParams {
    #[serde(default)]
    song: String,
    #[serde(default)]
    singer: String,
}

/// Embedded-client shim: `song` + `singer` in, flat JSON out. A literal
/// "youtube" singer is a placeholder some firmwares send and is ignored.
async fn api_device(
    State(state): State<AppState>,
    Query(params): Query<DeviceParams>,
) -> Response {
    state.stats.record_request();
    let song = params.song.trim();
    let singer = params.singer.trim();
    if song.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "missing song parameter",
                "title": "",
                "artist": singer,
                "audio_url": "",
                "stream_url": "",
            })),
        )
            .into_response();
    }

    let query = if singer.is_empty() || singer.eq_ignore_ascii_case("youtube") {
        song.to_string()
    } else {
        format!("{} {}", song, singer)
    };

    tracing::info!("device request: song={:?} singer={:?}", song, singer);
    match state.resolver.resolve(&query).await {
        Ok(track) => {
            state.stats.record_stream_success();
            let stream_url = local_stream_url(&query);
            Json(json!({
                "error": "",
                "title": track.title,
                "artist": singer,
                "duration_seconds": track.duration_seconds,
                "audio_url": stream_url,
                "stream_url": stream_url,
            }))
            .into_response()
        }
        Err(e) => {
            state.stats.record_stream_failure();
            let status = ApiError::from_resolve(e, &query).status;
            (
                status,
                Json(json!({
                    "error": format!("no track found for {:?}", query),
                    "title": song,
                    "artist": singer,
                    "audio_url": "",
                    "stream_url": "",
                })),
            )
                .into_response()
        }
    }
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.stats.record_request();
    let snapshot = state.stats.snapshot();
    Json(json!({
        "status": "running",
        "server": "Minstrel",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": snapshot.started_at,
        "uptime_seconds": snapshot.uptime_seconds,
        "cache": {
            "size": state.cache.len(),
            "max_entries": state.cache.max_entries(),
            "ttl_seconds": state.cache_ttl_secs,
        },
        "endpoints": [
            {"method": "GET",  "path": "/stream?q=<query>",                  "description": "Resolve and relay audio"},
            {"method": "GET",  "path": "/api/music?q=<query>",               "description": "Resolution metadata"},
            {"method": "GET",  "path": "/api/device?song=<s>&singer=<s>",    "description": "Embedded-client JSON"},
            {"method": "GET",  "path": "/status",                            "description": "Server status"},
            {"method": "GET",  "path": "/stats",                             "description": "Counters and rates"},
            {"method": "POST", "path": "/cache/clear",                       "description": "Empty the resolution cache"},
        ],
    }))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.stats.record_request();
    let snapshot = state.stats.snapshot();
    Json(json!({
        "server": snapshot,
        "cache": {
            "current_size": state.cache.len(),
            "max_entries": state.cache.max_entries(),
            "ttl_seconds": state.cache_ttl_secs,
        },
    }))
}

async fn clear_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.stats.record_request();
    let cleared = state.cache.clear();
    tracing::info!("cache cleared ({} entries)", cleared);
    Json(json!({
        "cleared": cleared,
        "cache_size": 0,
    }))
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not Found",
            "message": "no such endpoint, see /status for the endpoint list",
        })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn local_stream_url(query: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
    format!("/stream?q={}", encoded)
}

fn content_type_for_format(format: &str) -> Option<&'static str> {
    match format.to_ascii_lowercase().as_str() {
        "mp3" => Some("audio/mpeg"),
        "m4a" | "aac" | "mp4" => Some("audio/mp4"),
        "opus" | "webm" => Some("audio/webm"),
        _ => None,
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "audio/mpeg" => "mp3",
        "audio/mp4" => "m4a",
        "audio/webm" => "webm",
        _ => "audio",
    }
}

// Header values must stay visible ASCII.
fn sanitize_filename(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '/' | '\\' | '"' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .take(100)
        .collect()
}
