//! Error types for track resolution

/// Result type alias for resolution operations
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Errors that can occur while resolving a query to a playable track
///
/// The kinds matter: the resolver chain falls through to the fallback
/// extractor only for [`RateLimited`](ResolveError::RateLimited) and
/// [`NetworkFailure`](ResolveError::NetworkFailure). A track that is
/// genuinely absent or unusable fails immediately.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The query was empty or whitespace-only
    #[error("invalid query: empty or whitespace-only")]
    InvalidQuery,

    /// No track matched the query or identifier
    #[error("track not found: {0}")]
    NotFound(String),

    /// The upstream service refused the request due to rate limiting
    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    /// Transport-level failure (connect, timeout, broken body)
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The track exists but exposes no usable audio format
    #[error("no usable audio format: {0}")]
    UnsupportedFormat(String),
}

impl ResolveError {
    /// Whether this error should trigger the fallback extractor.
    ///
    /// `NotFound`/`UnsupportedFormat` mean the track itself is the problem;
    /// retrying through another provider cannot recover it.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            ResolveError::RateLimited(_) | ResolveError::NetworkFailure(_)
        )
    }

    /// Classify a transport error from reqwest.
    ///
    /// HTTP 429 becomes `RateLimited`; everything else at the transport
    /// level (timeouts, connect errors, truncated bodies) is a
    /// `NetworkFailure`.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            ResolveError::RateLimited(err.to_string())
        } else {
            ResolveError::NetworkFailure(err.to_string())
        }
    }
}
