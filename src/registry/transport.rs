//! Transport seam for Docker Registry v1 requests
//!
//! [`RegistryTransport`] is the only place HTTP happens. [`HttpTransport`]
//! shares a single `reqwest::Client` across every request of a run, and
//! [`ReplayTransport`] serves canned responses for offline use and tests.

use crate::error::{ConvertError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;
use url::Url;

/// Response body delivered chunk by chunk
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A registry response with its body still unread
pub struct TransportResponse {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl TransportResponse {
    /// All values of a (possibly repeated) header
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Read the whole body into memory
    pub async fn bytes(self) -> Result<Vec<u8>> {
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        Ok(chunks.concat())
    }
}

/// OCI/Docker registry transport operations
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Issue a GET request. Non-success statuses are returned, not raised;
    /// only connection-level failures are errors.
    async fn get(&self, url: &Url, headers: HeaderMap) -> Result<TransportResponse>;
}

/// Standard transport over HTTPS
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("docker2aci/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConvertError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RegistryTransport for HttpTransport {
    async fn get(&self, url: &Url, headers: HeaderMap) -> Result<TransportResponse> {
        let response = self
            .client
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| ConvertError::transport(url.as_str(), e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = url.to_string();
        let stream_url = url.clone();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| ConvertError::transport(&stream_url, e)));

        Ok(TransportResponse {
            url,
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

/// A canned response served by [`ReplayTransport`]
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl CannedResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// A JSON body
    pub fn json(value: &serde_json::Value) -> Self {
        Self::ok(value.to_string())
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Append a header value; repeated names accumulate
    pub fn with_header(mut self, name: &'static str, value: HeaderValue) -> Self {
        self.headers.append(HeaderName::from_static(name), value);
        self
    }
}

/// A request seen by [`ReplayTransport`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: HeaderMap,
}

/// Serves canned responses keyed by exact URL; anything unrouted is a 404.
/// Bodies are streamed in small chunks like a real server would.
#[derive(Default)]
pub struct ReplayTransport {
    routes: Mutex<HashMap<String, CannedResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

const REPLAY_CHUNK_SIZE: usize = 4096;

impl ReplayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url: impl Into<String>, response: CannedResponse) -> Self {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.into(), response);
        }
        self
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// URLs requested so far, in order
    pub fn requested_urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }
}

#[async_trait]
impl RegistryTransport for ReplayTransport {
    async fn get(&self, url: &Url, headers: HeaderMap) -> Result<TransportResponse> {
        let url = url.to_string();

        self.requests
            .lock()
            .map_err(|_| ConvertError::transport(&url, "replay transport poisoned"))?
            .push(RecordedRequest {
                url: url.clone(),
                headers,
            });

        let canned = self
            .routes
            .lock()
            .map_err(|_| ConvertError::transport(&url, "replay transport poisoned"))?
            .get(&url)
            .cloned()
            .unwrap_or_else(|| CannedResponse::status(StatusCode::NOT_FOUND));

        let chunks: Vec<Result<Bytes>> = canned
            .body
            .chunks(REPLAY_CHUNK_SIZE)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        Ok(TransportResponse {
            url,
            status: canned.status,
            headers: canned.headers,
            body: Box::pin(stream::iter(chunks)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replay_serves_routes_and_records() {
        let transport = ReplayTransport::new().route(
            "https://registry.example.com/v1/images/abc/json",
            CannedResponse::ok(vec![b'x'; 10_000]).with_header("x-docker-size", HeaderValue::from(42u64)),
        );

        let url = Url::parse("https://registry.example.com/v1/images/abc/json").unwrap();
        let response = transport.get(&url, HeaderMap::new()).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.header("x-docker-size").as_deref(), Some("42"));
        assert_eq!(response.bytes().await.unwrap().len(), 10_000);

        assert_eq!(
            transport.requested_urls(),
            vec!["https://registry.example.com/v1/images/abc/json".to_string()]
        );
    }

    #[tokio::test]
    async fn test_replay_unrouted_is_not_found() {
        let transport = ReplayTransport::new();
        let url = Url::parse("https://registry.example.com/v1/nothing").unwrap();
        let response = transport.get(&url, HeaderMap::new()).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_repeated_headers_accumulate() {
        let canned = CannedResponse::ok("")
            .with_header("x-docker-token", HeaderValue::from_static("a"))
            .with_header("x-docker-token", HeaderValue::from_static("b"));
        assert_eq!(canned.headers.get_all("x-docker-token").iter().count(), 2);
    }
}
