//! HTTP fetching of source image bytes.
//!
//! The coordinator talks to the network through [`ImageFetcher`], which
//! allows mock fetchers to be injected in tests. The real implementation
//! is a thin wrapper over an async `reqwest` client.

use bytes::Bytes;
use std::future::Future;
use thiserror::Error;
use tracing::{trace, warn};

/// Network-related errors.
#[derive(Debug, Error, Clone)]
pub enum NetworkError {
    /// Transport-level failure (connect, timeout, body read).
    #[error("request failed: {0}")]
    Http(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
}

/// Async fetch capability for source image bytes.
pub trait ImageFetcher: Send + Sync + 'static {
    /// Performs a plain HTTP GET of the full-resolution source.
    fn fetch(&self, locator: &str) -> impl Future<Output = Result<Bytes, NetworkError>> + Send;
}

/// Default User-Agent string for HTTP requests.
/// Some image hosts reject requests without one.
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Real fetcher implementation using reqwest.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Creates a fetcher with default configuration (30 second timeout).
    pub fn new() -> Result<Self, NetworkError> {
        Self::with_timeout(30)
    }

    /// Creates a fetcher with a custom request timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(|e| NetworkError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl ImageFetcher for ReqwestFetcher {
    async fn fetch(&self, locator: &str) -> Result<Bytes, NetworkError> {
        trace!(url = locator, "HTTP GET request starting");

        let response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(|e| NetworkError::Http(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            warn!(
                url = locator,
                status = response.status().as_u16(),
                "HTTP error status"
            );
            return Err(NetworkError::Status {
                status: response.status().as_u16(),
                url: locator.to_string(),
            });
        }

        match response.bytes().await {
            Ok(bytes) => {
                trace!(url = locator, bytes = bytes.len(), "HTTP response body read");
                Ok(bytes)
            }
            Err(e) => {
                warn!(url = locator, error = %e, "Failed to read response body");
                Err(NetworkError::Http(format!("Failed to read response: {}", e)))
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock fetcher serving canned payloads per locator.
    ///
    /// Counts fetches and optionally sleeps before answering, so tests can
    /// hold a fetch in flight while rebinding its target.
    pub struct MockFetcher {
        responses: Mutex<HashMap<String, Bytes>>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl MockFetcher {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::new()
            }
        }

        pub fn insert(&self, locator: &str, bytes: Vec<u8>) {
            self.responses
                .lock()
                .unwrap()
                .insert(locator.to_string(), Bytes::from(bytes));
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ImageFetcher for MockFetcher {
        async fn fetch(&self, locator: &str) -> Result<Bytes, NetworkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let response = self.responses.lock().unwrap().get(locator).cloned();
            response.ok_or_else(|| NetworkError::Status {
                status: 404,
                url: locator.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_mock_fetcher_success() {
        let mock = MockFetcher::new();
        mock.insert("http://example.com/a.jpg", vec![1, 2, 3, 4]);

        let result = mock.fetch("http://example.com/a.jpg").await;
        assert_eq!(result.unwrap().as_ref(), &[1, 2, 3, 4]);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_fetcher_unknown_locator() {
        let mock = MockFetcher::new();

        let result = mock.fetch("http://example.com/missing.jpg").await;
        assert!(matches!(
            result,
            Err(NetworkError::Status { status: 404, .. })
        ));
    }

    #[test]
    fn test_reqwest_fetcher_builds() {
        assert!(ReqwestFetcher::new().is_ok());
        assert!(ReqwestFetcher::with_timeout(5).is_ok());
    }
}
