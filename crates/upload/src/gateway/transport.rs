//! HTTP transport for gateway requests
//!
//! [`Transport`] sends one prepared request and returns the reply body as
//! text; [`HttpTransport`] does so with reqwest.

use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use reqwest::{redirect::Policy, Client};
use url::Url;

const USER_AGENT: &str = concat!("cask/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("transport error: {0}")]
    Other(String),
}

/// A fully built, signed request to the gateway
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl GatewayRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Transport collaborator
///
/// Sends a request and hands back the raw response body. Judging the body is
///  left to the caller; only failures to complete the exchange are errors.
///  Timeouts are the transport's business.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: GatewayRequest) -> Result<String, TransportError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(Policy::limited(50))
            .tcp_keepalive(Duration::from_secs(60));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: GatewayRequest) -> Result<String, TransportError> {
        let mut builder = self.client.request(request.method, request.url);
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        let response = builder.body(request.body).send().await?;
        tracing::debug!("gateway replied with status {}", response.status());
        Ok(response.text().await?)
    }
}
