//! HTTP client that sends every request over a fresh proxied connection

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONNECTION, HOST, USER_AGENT};
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Empty};
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{Result, RotaError};
use crate::proxy::transport::{ProxyTransport, Target};

/// Response of a completed request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub elapsed: Duration,
}

/// Outbound HTTP session abstraction
#[async_trait]
pub trait HttpSender: Send + Sync {
    /// Send a GET request, bounded as a whole by `timeout`
    async fn get(
        &self,
        url: &Url,
        user_agent: Option<&str>,
        timeout: Duration,
    ) -> Result<HttpResponse>;
}

/// HTTP/1.1 client routed through the SOCKS proxy
///
/// Connections are never pooled, so each request gets its own session and
/// cannot pin a circuit that has since been renewed.
#[derive(Clone)]
pub struct SocksHttpClient {
    transport: ProxyTransport,
}

impl SocksHttpClient {
    pub fn new(transport: ProxyTransport) -> Self {
        Self { transport }
    }

    async fn send(&self, url: &Url, user_agent: Option<&str>) -> Result<(StatusCode, Bytes)> {
        let target = Target::from_url(url)?;
        let stream = self.transport.connect(&target).await?;

        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        let mut builder = Request::get(path)
            .header(HOST, target.authority())
            .header(CONNECTION, "close");
        if let Some(user_agent) = user_agent {
            builder = builder.header(USER_AGENT, user_agent);
        }

        let request = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| RotaError::InvalidRequest(format!("Failed to build request: {}", e)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RotaError::Request(format!("Handshake failed: {}", e)))?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection ended: {}", e);
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| RotaError::Request(format!("Request failed: {}", e)))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| RotaError::Request(format!("Failed to read response: {}", e)))?
            .to_bytes();

        Ok((parts.status, body))
    }
}

#[async_trait]
impl HttpSender for SocksHttpClient {
    #[instrument(skip(self, user_agent), fields(url = %url))]
    async fn get(
        &self,
        url: &Url,
        user_agent: Option<&str>,
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let start = Instant::now();
        let (status, body) = tokio::time::timeout(timeout, self.send(url, user_agent))
            .await
            .map_err(|_| RotaError::RequestTimeout)??;

        Ok(HttpResponse {
            status,
            body,
            elapsed: start.elapsed(),
        })
    }
}
