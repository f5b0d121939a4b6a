//! Reconnecting byte relay
//!
//! Pulls a remote audio resource and forwards its bytes to a bounded
//! channel whose receiver backs the client response body. When the
//! upstream connection drops mid-stream, the relay reconnects with a
//! `Range` header picking up at the byte offset already delivered, under
//! a fresh identity from the pool. An upstream that answers the resumed
//! request with a full `200 OK` instead of `206 Partial Content` restarts
//! the stream from byte zero; the relay forwards the restarted stream and
//! counts the discontinuity rather than aborting playback.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{RANGE, USER_AGENT};
use reqwest::StatusCode;
use tokio::sync::mpsc;

use crate::identity::IdentityPool;

/// Tuning knobs for a relay session
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Total connection attempts, the initial one included.
    pub max_attempts: u32,
    pub connect_timeout: Duration,
    /// Longest the relay waits for the next chunk before treating the
    /// connection as dead.
    pub read_timeout: Duration,
    /// First reconnect delay. Doubles on each subsequent attempt.
    pub backoff_base: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(20),
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// Outcome of a relay session that reached the end of the upstream body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    /// Bytes delivered to the client since the last discontinuity.
    pub bytes_sent: u64,
    /// Connection attempts made, the initial one included.
    pub attempts: u32,
    /// Times the upstream restarted the stream from byte zero.
    pub discontinuities: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("upstream exhausted after {attempts} attempts: {last_error}")]
    UpstreamExhausted { attempts: u32, last_error: String },

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Upstream-to-client byte pump
pub struct StreamRelay {
    http: reqwest::Client,
    identities: Arc<IdentityPool>,
    config: RelayConfig,
}

impl StreamRelay {
    pub fn new(config: RelayConfig, identities: Arc<IdentityPool>) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            identities,
            config,
        })
    }

    pub fn with_defaults() -> Result<Self, RelayError> {
        Self::new(RelayConfig::default(), Arc::new(IdentityPool::default()))
    }

    /// Relay `url` into `tx` until the upstream body ends.
    ///
    /// Returns [`RelayError::ClientDisconnected`] as soon as the receiver
    /// side of `tx` is dropped, and [`RelayError::UpstreamExhausted`] when
    /// the attempt budget runs out without reaching the end of the body.
    pub async fn run(&self, url: &str, tx: &mpsc::Sender<Bytes>) -> Result<RelaySummary, RelayError> {
        let mut attempts = 0u32;
        let mut bytes_sent = 0u64;
        let mut discontinuities = 0u32;
        let mut last_error = String::from("no attempt made");

        while attempts < self.config.max_attempts {
            attempts += 1;

            if attempts > 1 {
                let delay = backoff_delay(self.config.backoff_base, attempts);
                tracing::warn!(
                    "relay reconnecting (attempt {}/{}) in {:?}: {}",
                    attempts,
                    self.config.max_attempts,
                    delay,
                    last_error,
                );
                tokio::time::sleep(delay).await;
            }

            let identity = self.identities.next();
            let mut request = self.http.get(url).header(USER_AGENT, identity);
            if bytes_sent > 0 {
                request = request.header(RANGE, format!("bytes={}-", bytes_sent));
            }

            // connect_timeout on the client covers only the TCP connect;
            // the wait for response headers needs its own bound.
            let response = match tokio::time::timeout(self.config.read_timeout, request.send())
                .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    continue;
                }
                Err(_) => {
                    last_error = format!(
                        "no response headers within {:?}",
                        self.config.read_timeout
                    );
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                last_error = format!("upstream returned {}", status);
                continue;
            }

            if bytes_sent > 0 && status != StatusCode::PARTIAL_CONTENT {
                // Range ignored: the upstream restarted from the beginning.
                tracing::warn!(
                    "upstream ignored range request (got {}), restarting stream",
                    status
                );
                discontinuities += 1;
                bytes_sent = 0;
            }

            let mut body = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(self.config.read_timeout, body.next()).await;
                match next {
                    Ok(Some(Ok(chunk))) => {
                        if chunk.is_empty() {
                            continue;
                        }
                        let len = chunk.len() as u64;
                        if tx.send(chunk).await.is_err() {
                            tracing::debug!("client went away after {} bytes", bytes_sent);
                            return Err(RelayError::ClientDisconnected);
                        }
                        bytes_sent += len;
                    }
                    Ok(Some(Err(e))) => {
                        last_error = e.to_string();
                        break;
                    }
                    Ok(None) => {
                        tracing::debug!(
                            "relay complete: {} bytes in {} attempt(s)",
                            bytes_sent,
                            attempts
                        );
                        return Ok(RelaySummary {
                            bytes_sent,
                            attempts,
                            discontinuities,
                        });
                    }
                    Err(_) => {
                        last_error = format!("read timed out after {:?}", self.config.read_timeout);
                        break;
                    }
                }
            }
        }

        Err(RelayError::UpstreamExhausted {
            attempts,
            last_error,
        })
    }
}

/// Delay before reconnect attempt `attempt` (>= 2): doubles per attempt,
/// capped so arbitrarily large configured attempt budgets cannot overflow.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow((attempt - 2).min(10))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use axum::body::Body;
    use axum::extract::State;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::Response;
    use axum::routing::get;
    use axum::Router;

    #[derive(Default)]
    struct UpstreamLog {
        hits: AtomicUsize,
        user_agents: Mutex<Vec<String>>,
        ranges: Mutex<Vec<Option<String>>>,
    }

    impl UpstreamLog {
        fn record(&self, headers: &HeaderMap) -> usize {
            let ua = headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let range = headers
                .get(header::RANGE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            self.user_agents.lock().unwrap().push(ua);
            self.ranges.lock().unwrap().push(range);
            self.hits.fetch_add(1, Ordering::SeqCst)
        }
    }

    async fn spawn_upstream(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn fast_relay(max_attempts: u32) -> StreamRelay {
        StreamRelay::new(
            RelayConfig {
                max_attempts,
                connect_timeout: Duration::from_secs(2),
                read_timeout: Duration::from_secs(2),
                backoff_base: Duration::from_millis(5),
            },
            Arc::new(IdentityPool::default()),
        )
        .unwrap()
    }

    async fn collect(mut rx: mpsc::Receiver<Bytes>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_clean_stream_single_attempt() {
        let app = Router::new().route("/a", get(|| async { "hello audio bytes" }));
        let addr = spawn_upstream(app).await;

        let relay = fast_relay(3);
        let (tx, rx) = mpsc::channel::<Bytes>(16);
        let body = tokio::spawn(collect(rx));

        let summary = relay
            .run(&format!("http://{}/a", addr), &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(summary.attempts, 1);
        assert_eq!(summary.discontinuities, 0);
        assert_eq!(summary.bytes_sent, 17);
        assert_eq!(body.await.unwrap(), b"hello audio bytes");
    }

    #[tokio::test]
    async fn test_retries_rotate_identity_on_upstream_error() {
        let log = Arc::new(UpstreamLog::default());
        let app = Router::new()
            .route(
                "/a",
                get(|State(log): State<Arc<UpstreamLog>>, headers: HeaderMap| async move {
                    if log.record(&headers) == 0 {
                        Err(StatusCode::INTERNAL_SERVER_ERROR)
                    } else {
                        Ok("payload")
                    }
                }),
            )
            .with_state(Arc::clone(&log));
        let addr = spawn_upstream(app).await;

        let relay = fast_relay(3);
        let (tx, rx) = mpsc::channel::<Bytes>(16);
        let body = tokio::spawn(collect(rx));

        let summary = relay
            .run(&format!("http://{}/a", addr), &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(summary.attempts, 2);
        assert_eq!(body.await.unwrap(), b"payload");

        let agents = log.user_agents.lock().unwrap();
        assert_eq!(agents.len(), 2);
        assert_ne!(agents[0], agents[1]);
    }

    #[tokio::test]
    async fn test_resumes_with_range_after_mid_stream_drop() {
        let log = Arc::new(UpstreamLog::default());
        let app = Router::new()
            .route(
                "/a",
                get(|State(log): State<Arc<UpstreamLog>>, headers: HeaderMap| async move {
                    if log.record(&headers) == 0 {
                        // First half, then the connection dies. The error is
                        // delayed so hyper flushes the first chunk before the
                        // response aborts.
                        let chunks = futures_util::stream::iter([Ok::<_, std::io::Error>(
                            Bytes::from_static(b"01234"),
                        )])
                        .chain(futures_util::stream::once(async {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Err(std::io::Error::other("upstream reset"))
                        }));
                        Response::builder()
                            .status(StatusCode::OK)
                            .body(Body::from_stream(chunks))
                            .unwrap()
                    } else {
                        Response::builder()
                            .status(StatusCode::PARTIAL_CONTENT)
                            .body(Body::from("56789"))
                            .unwrap()
                    }
                }),
            )
            .with_state(Arc::clone(&log));
        let addr = spawn_upstream(app).await;

        let relay = fast_relay(3);
        let (tx, rx) = mpsc::channel::<Bytes>(16);
        let body = tokio::spawn(collect(rx));

        let summary = relay
            .run(&format!("http://{}/a", addr), &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.discontinuities, 0);
        assert_eq!(summary.bytes_sent, 10);
        assert_eq!(body.await.unwrap(), b"0123456789");

        let ranges = log.ranges.lock().unwrap();
        assert_eq!(ranges[0], None);
        assert_eq!(ranges[1].as_deref(), Some("bytes=5-"));
    }

    #[tokio::test]
    async fn test_full_response_to_range_counts_discontinuity() {
        let log = Arc::new(UpstreamLog::default());
        let app = Router::new()
            .route(
                "/a",
                get(|State(log): State<Arc<UpstreamLog>>, headers: HeaderMap| async move {
                    if log.record(&headers) == 0 {
                        // Delayed error so the first chunk is flushed before
                        // the response aborts.
                        let chunks = futures_util::stream::iter([Ok::<_, std::io::Error>(
                            Bytes::from_static(b"abc"),
                        )])
                        .chain(futures_util::stream::once(async {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Err(std::io::Error::other("upstream reset"))
                        }));
                        Response::builder()
                            .status(StatusCode::OK)
                            .body(Body::from_stream(chunks))
                            .unwrap()
                    } else {
                        // Range ignored: plain 200 with the whole body.
                        Response::builder()
                            .status(StatusCode::OK)
                            .body(Body::from("abcdef"))
                            .unwrap()
                    }
                }),
            )
            .with_state(Arc::clone(&log));
        let addr = spawn_upstream(app).await;

        let relay = fast_relay(3);
        let (tx, rx) = mpsc::channel::<Bytes>(16);
        let body = tokio::spawn(collect(rx));

        let summary = relay
            .run(&format!("http://{}/a", addr), &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(summary.discontinuities, 1);
        // Counter restarts at the discontinuity, so only the second
        // response's bytes are counted.
        assert_eq!(summary.bytes_sent, 6);
        assert_eq!(body.await.unwrap(), b"abcabcdef");
    }

    #[tokio::test]
    async fn test_attempt_budget_exhausted() {
        let app = Router::new().route(
            "/a",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let addr = spawn_upstream(app).await;

        let relay = fast_relay(2);
        let (tx, _rx) = mpsc::channel::<Bytes>(16);

        let err = relay
            .run(&format!("http://{}/a", addr), &tx)
            .await
            .unwrap_err();
        match err {
            RelayError::UpstreamExhausted { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected UpstreamExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stalled_response_headers_hit_timeout() {
        // Upstream accepts the connection but never writes a byte, so
        // neither the connect timeout nor the body read path fires.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                held.push(socket);
            }
        });

        let relay = StreamRelay::new(
            RelayConfig {
                max_attempts: 2,
                connect_timeout: Duration::from_millis(200),
                read_timeout: Duration::from_millis(200),
                backoff_base: Duration::from_millis(5),
            },
            Arc::new(IdentityPool::default()),
        )
        .unwrap();
        let (tx, _rx) = mpsc::channel::<Bytes>(16);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            relay.run(&format!("http://{}/a", addr), &tx),
        )
        .await
        .expect("relay must give up, not hang");

        match result.unwrap_err() {
            RelayError::UpstreamExhausted { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected UpstreamExhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 4), Duration::from_secs(2));
        // Huge configured attempt budgets must not overflow the shift
        assert_eq!(backoff_delay(base, 60), base * 1024);
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_relay() {
        let app = Router::new().route(
            "/a",
            get(|| async {
                let chunks: Vec<Result<Bytes, Infallible>> =
                    (0..1000).map(|_| Ok(Bytes::from(vec![0u8; 1024]))).collect();
                Body::from_stream(futures_util::stream::iter(chunks))
            }),
        );
        let addr = spawn_upstream(app).await;

        let relay = fast_relay(3);
        let (tx, rx) = mpsc::channel::<Bytes>(1);
        drop(rx);

        let err = relay
            .run(&format!("http://{}/a", addr), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ClientDisconnected));
    }
}
