//! Network fallback client
//!
//! Forwards requests to the real network. Responses are returned whatever
//! their status; only transport failures become errors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::{debug, warn};

use super::errors::FetchError;
use super::types::{Request, Response};

/// HTTP client timeout used when none is configured
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that can perform a live network fetch
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform the request. `request.url` must already be absolute.
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// `reqwest`-backed network
#[derive(Clone)]
pub struct HttpNetwork {
    http_client: Client,
}

impl HttpNetwork {
    /// Create a client with the default timeout
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| FetchError::InvalidMethod(request.method.clone()))?;

        debug!(method = %request.method, url = %request.url, "Fetching from network");

        let mut builder = self.http_client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            warn!(url = %request.url, error = %e, "Network fetch failed");
            FetchError::from(e)
        })?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        let body = response.bytes().await?;

        debug!(url = %url, status = status, size = body.len(), "Network fetch complete");

        Ok(Response {
            url,
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the base URL
    async fn serve_once(raw: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await;
            stream.write_all(raw.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_fetch_returns_body_and_headers() {
        let base = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;

        let network = HttpNetwork::new().unwrap();
        let response = network
            .fetch(&Request::get(&format!("{}index.html", base)))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hello");
        assert_eq!(response.header("content-type"), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_error_status_is_not_an_error() {
        let base = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let network = HttpNetwork::new().unwrap();
        let response = network.fetch(&Request::get(&base)).await.unwrap();
        assert_eq!(response.status, 404);
        assert!(!response.is_ok());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let network = HttpNetwork::new().unwrap();
        let err = network
            .fetch(&Request::get(&format!("http://{}/", addr)))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }

    #[tokio::test]
    async fn test_invalid_method() {
        let network = HttpNetwork::new().unwrap();
        let err = network
            .fetch(&Request::new("BAD METHOD", "http://127.0.0.1:1/"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidMethod(_)));
    }
}
