use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use super::types::RemoteData;

/// Default cap on the feed response body.
pub const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a remote JSON document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Body was not the expected JSON shape
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    /// HTTP status, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus(status) => Some(*status),
            FetchError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Network fetch primitive for the remote feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Where the feed comes from, for logging.
    fn url(&self) -> &str;

    /// Perform exactly one fetch attempt.
    async fn fetch(&self) -> Result<RemoteData, FetchError>;
}

/// Feed source doing a single HTTP GET of a JSON array of feed items.
#[derive(Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
    max_bytes: usize,
    timeout: Option<Duration>,
}

impl HttpFeedSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            max_bytes: DEFAULT_MAX_FEED_SIZE,
            timeout: None,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Bound the request by `timeout`; `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<RemoteData, FetchError> {
        let items: RemoteData =
            get_json(&self.client, &self.url, self.max_bytes, self.timeout).await?;
        tracing::debug!(url = %self.url, items = items.len(), "Fetched feed");
        Ok(items)
    }
}

/// GET `url` once and decode the body as JSON.
///
/// Non-2xx statuses fail immediately (no retries); bodies over `limit`
/// bytes are rejected without being buffered in full.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    limit: usize,
    timeout: Option<Duration>,
) -> Result<T, FetchError> {
    let request = async {
        let response = client.get(url).send().await.map_err(FetchError::Network)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, limit).await
    };

    let bytes = match timeout {
        Some(duration) => tokio::time::timeout(duration, request)
            .await
            .map_err(|_| FetchError::Timeout(duration))??,
        None => request.await?,
    };

    serde_json::from_slice(&bytes).map_err(|e| FetchError::Parse(e.to_string()))
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
