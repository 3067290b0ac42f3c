//! Alertmanager receivers.
//!
//! This module provides the [`AlertmanagerClient`] trait, which delivers one
//! batch of alerts to one receiver, and its HTTP implementation. Clients are
//! created through a [`ClientFactory`] so the engine can build new ones when
//! the receiver list changes.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::alert::PostableAlert;
use crate::error::{AlertError, Result};

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Path of the Alertmanager v2 alert ingestion endpoint.
pub const ALERTS_PATH: &str = "/api/v2/alerts";

/// Default timeout for one request to a receiver.
pub const DEFAULT_RECEIVER_TIMEOUT: Duration = Duration::from_secs(60);

/// A client for a single Alertmanager receiver.
pub trait AlertmanagerClient: Send + Sync + fmt::Debug {
    /// Returns the receiver's base URL.
    fn base_url(&self) -> &str;

    /// Posts a batch of alerts.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Transport` if the receiver cannot be reached, or
    /// `AlertError::ReceiverRejected` if it answers with a non-2xx status.
    fn post_alerts<'a>(&'a self, alerts: &'a [PostableAlert]) -> BoxFuture<'a, Result<()>>;
}

/// Builds clients for receiver URLs.
pub trait ClientFactory: Send + Sync + fmt::Debug {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built.
    fn create(&self, base_url: &str) -> Result<Arc<dyn AlertmanagerClient>>;
}

/// An [`AlertmanagerClient`] that talks HTTP.
#[derive(Debug, Clone)]
pub struct HttpAlertmanagerClient {
    base_url: String,
    endpoint: String,
    http: reqwest::Client,
}

impl HttpAlertmanagerClient {
    /// Creates a client for `base_url` with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlertError::Transport {
                url: base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            endpoint: format!("{}{ALERTS_PATH}", base_url.trim_end_matches('/')),
            base_url,
            http,
        })
    }

    /// Returns the full URL alerts are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, alerts: &[PostableAlert]) -> Result<()> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(alerts)
            .send()
            .await
            .map_err(|e| AlertError::Transport {
                url: self.base_url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(url = %self.base_url, alerts = alerts.len(), %status, "posted alerts");
            return Ok(());
        }

        Err(AlertError::ReceiverRejected {
            url: self.base_url.clone(),
            status: status.as_u16(),
            body: read_error_body(response).await,
        })
    }
}

impl AlertmanagerClient for HttpAlertmanagerClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post_alerts<'a>(&'a self, alerts: &'a [PostableAlert]) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.post(alerts))
    }
}

/// Renders a failed response body: as text for text or JSON content, as a byte dump otherwise.
async fn read_error_body(response: reqwest::Response) -> String {
    let is_text = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/") || ct.contains("json"));

    match response.bytes().await {
        Ok(bytes) if is_text => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(bytes) => format!("{bytes:?}"),
        Err(e) => format!("<failed to read body: {e}>"),
    }
}

/// Creates [`HttpAlertmanagerClient`]s sharing one timeout.
#[derive(Debug, Clone, Copy)]
pub struct HttpClientFactory {
    timeout: Duration,
}

impl HttpClientFactory {
    /// Creates a factory whose clients use `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_RECEIVER_TIMEOUT)
    }
}

impl ClientFactory for HttpClientFactory {
    fn create(&self, base_url: &str) -> Result<Arc<dyn AlertmanagerClient>> {
        Ok(Arc::new(HttpAlertmanagerClient::new(base_url, self.timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// A captured HTTP request.
    struct Captured {
        head: String,
        body: Vec<u8>,
    }

    /// Serves exactly one request with a canned response and returns what was received.
    async fn serve_once(response: &'static str) -> (String, JoinHandle<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];

            let head_end = loop {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);

            while buf.len() < head_end + content_length {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before body");
                buf.extend_from_slice(&chunk[..n]);
            }

            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();

            Captured {
                head,
                body: buf[head_end..head_end + content_length].to_vec(),
            }
        });

        (format!("http://{addr}"), handle)
    }

    fn batch() -> Vec<PostableAlert> {
        vec![PostableAlert {
            labels: BTreeMap::from([("severity".to_string(), "info".to_string())]),
            annotations: BTreeMap::from([("remediation".to_string(), "TEST".to_string())]),
            starts_at: Utc::now(),
            ends_at: None,
            generator_url: None,
        }]
    }

    mod http_client_tests {
        use super::*;

        #[test]
        fn endpoint_joins_path() {
            let client =
                HttpAlertmanagerClient::new("http://am:9093/", DEFAULT_RECEIVER_TIMEOUT).unwrap();
            assert_eq!(client.endpoint(), "http://am:9093/api/v2/alerts");
            assert_eq!(client.base_url(), "http://am:9093/");
        }

        #[tokio::test]
        async fn posts_json_to_alerts_endpoint() {
            let (url, server) =
                serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
            let client = HttpAlertmanagerClient::new(&url, DEFAULT_RECEIVER_TIMEOUT).unwrap();

            client.post_alerts(&batch()).await.unwrap();

            let captured = server.await.unwrap();
            assert!(captured.head.starts_with("POST /api/v2/alerts HTTP/1.1"));
            assert!(captured
                .head
                .to_ascii_lowercase()
                .contains("content-type: application/json"));

            let sent: Vec<PostableAlert> = serde_json::from_slice(&captured.body).unwrap();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].labels["severity"], "info");
        }

        #[tokio::test]
        async fn empty_batch_is_posted_as_empty_array() {
            let (url, server) = serve_once(
                "HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            )
            .await;
            let client = HttpAlertmanagerClient::new(&url, DEFAULT_RECEIVER_TIMEOUT).unwrap();

            client.post_alerts(&[]).await.unwrap();

            let captured = server.await.unwrap();
            assert_eq!(captured.body, b"[]");
        }

        #[tokio::test]
        async fn non_2xx_with_text_body() {
            let (url, server) = serve_once(
                "HTTP/1.1 400 Bad Request\r\nContent-Type: application/json\r\n\
                 Content-Length: 21\r\nConnection: close\r\n\r\n{\"error\":\"bad input\"}",
            )
            .await;
            let client = HttpAlertmanagerClient::new(&url, DEFAULT_RECEIVER_TIMEOUT).unwrap();

            let err = client.post_alerts(&batch()).await.unwrap_err();
            server.await.unwrap();

            match err {
                AlertError::ReceiverRejected { status, body, .. } => {
                    assert_eq!(status, 400);
                    assert_eq!(body, "{\"error\":\"bad input\"}");
                }
                other => panic!("expected ReceiverRejected, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn non_2xx_with_binary_body_is_dumped() {
            let (url, server) = serve_once(
                "HTTP/1.1 500 Internal Server Error\r\nContent-Type: application/octet-stream\r\n\
                 Content-Length: 3\r\nConnection: close\r\n\r\nabc",
            )
            .await;
            let client = HttpAlertmanagerClient::new(&url, DEFAULT_RECEIVER_TIMEOUT).unwrap();

            let err = client.post_alerts(&batch()).await.unwrap_err();
            server.await.unwrap();

            match err {
                AlertError::ReceiverRejected { status, body, .. } => {
                    assert_eq!(status, 500);
                    assert_eq!(body, "b\"abc\"");
                }
                other => panic!("expected ReceiverRejected, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn unreachable_receiver_is_transport_error() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            drop(listener);

            let client = HttpAlertmanagerClient::new(&url, Duration::from_secs(5)).unwrap();
            let err = client.post_alerts(&batch()).await.unwrap_err();

            assert!(matches!(err, AlertError::Transport { .. }));
        }
    }

    mod factory_tests {
        use super::*;

        #[test]
        fn factory_creates_client_for_url() {
            let factory = HttpClientFactory::default();
            let client = factory.create("http://am:9093").unwrap();
            assert_eq!(client.base_url(), "http://am:9093");
        }
    }
}
