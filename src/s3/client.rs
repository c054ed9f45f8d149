//! S3 client implementing the [`ObjectStore`] operations
//!
//! - HTTP/1.1 only, pooled connections with TCP_NODELAY
//! - native-tls (OpenSSL) for TLS
//! - Path-style URLs: `{endpoint}/{bucket}/{key}`
//! - Automatic retry with jitter for 429/503 and connection failures
//! - Select responses are handed back unconsumed as an event stream

use crate::config::{Profile, TransportConfig};
use crate::s3::eventstream::HttpEventStream;
use crate::s3::signer::{uri_encode_into, Credentials, RequestSigner};
use crate::s3::types::{BucketInfo, ListPage, ListRequest, SelectRequest};
use crate::s3::xml;
use crate::store::{ObjectStore, SelectEventStream};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use rand::Rng;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// S3 client errors
#[derive(Error, Debug)]
pub enum S3Error {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::http::Error),

    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("S3 error: {status} {code} - {message}")]
    S3Response {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Event stream error: {0}")]
    EventStream(String),

    #[error("Select stream error: {code} - {message}")]
    Stream { code: String, message: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl From<quick_xml::Error> for S3Error {
    fn from(err: quick_xml::Error) -> Self {
        S3Error::XmlParse(format!("XML parse error: {}", err))
    }
}

impl From<hyper_util::client::legacy::Error> for S3Error {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        S3Error::InvalidResponse(format!("Client error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, S3Error>;

/// Environment switch that disables certificate verification
pub const INSECURE_TLS_ENV: &str = "S3SIFT_INSECURE_TLS";

/// S3 client bound to one endpoint, credential and region.
///
/// Clone is cheap: the underlying HTTP client shares its pool through an Arc.
#[derive(Clone)]
pub struct S3Client {
    /// Hyper HTTP client with tuned connection pool
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    signer: RequestSigner,
    endpoint: String,
    /// Bound on each request head
    timeout: Duration,
    max_retries: u32,
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client")
            .field("endpoint", &self.endpoint)
            .field("region", &self.signer.region())
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl S3Client {
    /// Build a client for `profile`.
    ///
    /// Fails only when the TLS connector cannot be built.
    pub fn new(profile: &Profile, transport: &TransportConfig) -> Result<Self> {
        let insecure_tls = transport.insecure_tls
            || std::env::var(INSECURE_TLS_ENV)
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false);

        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = if insecure_tls {
            warn!("INSECURE TLS MODE ENABLED: Certificate verification is disabled!");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
        } else {
            TlsConnector::new()
        }
        .map_err(|e| S3Error::InvalidResponse(format!("Failed to build TLS connector: {}", e)))?;

        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .retry_canceled_requests(true)
            .set_host(true)
            .build(https);

        let mut credentials = Credentials::new(&profile.access_key, &profile.secret_key);
        if let Some(token) = &profile.session_token {
            credentials = credentials.with_session_token(token);
        }

        Ok(Self {
            client,
            signer: RequestSigner::new(credentials, &profile.region),
            endpoint: profile.endpoint_url(),
            timeout: Duration::from_secs(transport.request_timeout),
            max_retries: transport.max_retries,
        })
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn region(&self) -> &str {
        self.signer.region()
    }

    /// Send a signed request, retrying 429/503 and connection failures.
    ///
    /// Backoff is 100ms * 2^attempt plus up to 20% jitter. The response body
    /// is left unread so callers can stream it.
    async fn send_with_retry(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<Response<Incoming>> {
        let mut attempt = 0u32;
        loop {
            // Re-sign on each attempt (timestamp changes)
            let signed_headers = self
                .signer
                .sign(method.as_str(), url, headers.clone(), &body);

            let mut req = Request::builder().method(method.clone()).uri(url);
            for (key, value) in signed_headers.iter() {
                req = req.header(key, value);
            }
            let request = req.body(Full::new(body.clone()))?;

            let outcome = match tokio::time::timeout(self.timeout, self.client.request(request)).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(S3Error::from(e)),
                Err(_) => Err(S3Error::Timeout(self.timeout)),
            };

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    let is_retryable = status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::SERVICE_UNAVAILABLE;

                    if !is_retryable || attempt >= self.max_retries {
                        return Ok(response);
                    }

                    // Drain body to return connection to pool, then retry
                    let _ = response.collect().await;
                    debug!(%status, attempt, url, "retrying throttled request");
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(e);
                    }
                    debug!(error = %e, attempt, url, "retrying failed request");
                }
            }

            tokio::time::sleep(backoff(attempt)).await;
            attempt += 1;
        }
    }

    /// Send with retry and collect the body of a successful response
    async fn request_bytes(&self, method: Method, url: &str) -> Result<Bytes> {
        let response = self
            .send_with_retry(method, url, BTreeMap::new(), Bytes::new())
            .await?;
        let status = response.status();
        let body_bytes = response
            .collect()
            .await
            .map_err(|e| S3Error::InvalidResponse(format!("Body error: {}", e)))?
            .to_bytes();

        if !status.is_success() {
            return Err(error_from_status(status, &body_bytes));
        }
        Ok(body_bytes)
    }

    /// Encode an S3 key, preserving forward slashes.
    /// Returns Cow::Borrowed when no encoding is needed.
    fn encode_s3_key(key: &str) -> Cow<'_, str> {
        let needs_encoding = key.bytes().any(|b| {
            !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/')
        });

        if !needs_encoding {
            return Cow::Borrowed(key);
        }

        let mut result = String::with_capacity(key.len() + 32);
        uri_encode_into(&mut result, key, false);
        Cow::Owned(result)
    }

    fn build_bucket_url(&self, bucket: &str) -> String {
        let mut url = String::with_capacity(self.endpoint.len() + 1 + bucket.len());
        url.push_str(&self.endpoint);
        url.push('/');
        url.push_str(bucket);
        url
    }

    fn build_object_url(&self, bucket: &str, key: &str) -> String {
        let encoded_key = Self::encode_s3_key(key);
        let mut url = self.build_bucket_url(bucket);
        url.reserve(1 + encoded_key.len());
        url.push('/');
        url.push_str(&encoded_key);
        url
    }

    /// Build the full URL for a ListObjectsV2 request.
    ///
    /// Parameters are emitted in sorted order (c, d, l, m, p).
    pub fn build_list_url(&self, request: &ListRequest, continuation_token: Option<&str>) -> String {
        let mut url = self.build_bucket_url(&request.bucket);
        url.reserve(256);
        url.push_str("/?");

        if let Some(token) = continuation_token {
            url.push_str("continuation-token=");
            uri_encode_into(&mut url, token, true);
            url.push('&');
        }
        if let Some(d) = &request.delimiter {
            url.push_str("delimiter=");
            uri_encode_into(&mut url, d, true);
            url.push('&');
        }
        url.push_str("list-type=2");
        if let Some(max_keys) = request.max_keys {
            let _ = write!(url, "&max-keys={}", max_keys);
        }
        if !request.prefix.is_empty() {
            url.push_str("&prefix=");
            uri_encode_into(&mut url, &request.prefix, true);
        }

        url
    }

    pub fn build_select_url(&self, bucket: &str, key: &str) -> String {
        let mut url = self.build_object_url(bucket, key);
        url.push_str("?select=&select-type=2");
        url
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let url = format!("{}/", self.endpoint);
        let body = self.request_bytes(Method::GET, &url).await?;
        xml::parse_list_buckets(&body)
    }

    async fn list_objects_page(
        &self,
        request: &ListRequest,
        continuation_token: Option<&str>,
    ) -> Result<ListPage> {
        let url = self.build_list_url(request, continuation_token);
        let body = self.request_bytes(Method::GET, &url).await?;
        xml::parse_list_page(&body)
    }

    async fn select_object_content(
        &self,
        request: &SelectRequest,
    ) -> Result<Box<dyn SelectEventStream>> {
        let url = self.build_select_url(&request.bucket, &request.key);
        let body = Bytes::from(xml::build_select_body(request));

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/xml".to_string());
        headers.insert("content-length".to_string(), body.len().to_string());

        let response = self.send_with_retry(Method::POST, &url, headers, body).await?;
        let status = response.status();

        if !status.is_success() {
            let body_bytes = response
                .collect()
                .await
                .map_err(|e| S3Error::InvalidResponse(format!("Body error: {}", e)))?
                .to_bytes();
            return Err(error_from_status(status, &body_bytes));
        }

        debug!(bucket = %request.bucket, key = %request.key, "select stream opened");
        Ok(Box::new(HttpEventStream::new(response.into_body())))
    }
}

fn backoff(attempt: u32) -> Duration {
    let base_ms = 100u64 * (1 << attempt.min(16));
    let jitter_range = base_ms / 5;
    let jitter = rand::rng().random_range(0..=jitter_range);
    Duration::from_millis(base_ms + jitter)
}

/// Map an error status to `S3Response`, using the `<Error>` document when present
fn error_from_status(status: StatusCode, body: &[u8]) -> S3Error {
    match xml::parse_error_document(body) {
        Ok(doc) if !doc.code.is_empty() => S3Error::S3Response {
            status,
            code: doc.code,
            message: doc.message,
        },
        _ => S3Error::S3Response {
            status,
            code: String::new(),
            message: String::from_utf8_lossy(body).to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> S3Client {
        let profile = Profile {
            endpoint: Some("https://s3.example.com/".to_string()),
            access_key: "access_key".to_string(),
            secret_key: "secret_key".to_string(),
            session_token: None,
            region: "us-east-1".to_string(),
        };
        S3Client::new(&profile, &TransportConfig::default()).unwrap()
    }

    #[test]
    fn test_client_creation() {
        let client = test_client();
        assert_eq!(client.endpoint(), "https://s3.example.com");
        assert_eq!(client.region(), "us-east-1");
        assert_eq!(client.timeout, Duration::from_secs(300));
        assert_eq!(client.max_retries, 3);

        let client = client.with_timeout(Duration::from_secs(5)).with_max_retries(0);
        assert_eq!(client.timeout, Duration::from_secs(5));
        assert_eq!(client.max_retries, 0);
    }

    #[test]
    fn test_encode_s3_key_no_encoding() {
        let result = S3Client::encode_s3_key("path/to/file.txt");
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "path/to/file.txt");
    }

    #[test]
    fn test_encode_s3_key_with_encoding() {
        let result = S3Client::encode_s3_key("path/to/file with spaces.json.gz");
        assert!(matches!(result, Cow::Owned(_)));
        assert_eq!(result, "path/to/file%20with%20spaces.json.gz");
    }

    #[test]
    fn test_build_list_url_hierarchical() {
        let client = test_client();
        let request = ListRequest::hierarchical("logs", "2024/");
        assert_eq!(
            client.build_list_url(&request, None),
            "https://s3.example.com/logs/?delimiter=%2F&list-type=2&prefix=2024%2F"
        );
    }

    #[test]
    fn test_build_list_url_with_token() {
        let client = test_client();
        let request = ListRequest::flat("logs", "").with_max_keys(500);
        assert_eq!(
            client.build_list_url(&request, Some("abc/def=")),
            "https://s3.example.com/logs/?continuation-token=abc%2Fdef%3D&list-type=2&max-keys=500"
        );
    }

    #[test]
    fn test_build_select_url() {
        let client = test_client();
        assert_eq!(
            client.build_select_url("data", "events/day 1.json"),
            "https://s3.example.com/data/events/day%201.json?select=&select-type=2"
        );
    }

    #[test]
    fn test_error_from_status_parses_document() {
        let body = b"<?xml version=\"1.0\"?><Error><Code>NoSuchKey</Code><Message>gone</Message></Error>";
        match error_from_status(StatusCode::NOT_FOUND, body) {
            S3Error::S3Response { status, code, message } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(code, "NoSuchKey");
                assert_eq!(message, "gone");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_error_from_status_raw_body() {
        match error_from_status(StatusCode::BAD_GATEWAY, b"upstream down") {
            S3Error::S3Response { code, message, .. } => {
                assert!(code.is_empty());
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_backoff_bounds() {
        for attempt in 0..4 {
            let base = 100u64 * (1 << attempt);
            let delay = backoff(attempt).as_millis() as u64;
            assert!(delay >= base && delay <= base + base / 5);
        }
    }

    #[test]
    fn test_client_is_clone() {
        let client = test_client();
        let _clone = client.clone();
    }
}
