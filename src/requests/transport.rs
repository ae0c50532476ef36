//! The network collaborator that actually performs HTTP calls.

use async_trait::async_trait;
use thiserror::Error;

use super::response::Response;
use crate::route::Method;

/// A fully assembled request handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: Method,
    /// Compiled route path, relative to the API base
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    /// Path with the query string appended, without URL encoding.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}?{}", self.path, query.join("&"))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Failure before any response was received.
#[derive(Debug, Clone, Error)]
#[error("Transport error: {message}")]
pub struct TransportError {
    pub message: String,
    pub timed_out: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: true,
        }
    }
}

/// Performs one HTTP exchange.
///
/// Implementations are invoked from dispatcher worker tasks and must report
/// timeouts as errors rather than hanging or returning a fabricated response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<Response, TransportError>;
}

#[cfg(feature = "reqwest")]
pub use self::http::ReqwestTransport;

#[cfg(feature = "reqwest")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{Transport, TransportError, TransportRequest};
    use crate::requests::{Headers, Response};

    /// Default API base for the platform.
    pub const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";

    /// [`Transport`] backed by a shared `reqwest` client.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
        base_url: String,
    }

    impl ReqwestTransport {
        pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| TransportError::new(e.to_string()))?;
            Ok(Self {
                client,
                base_url: base_url.into(),
            })
        }

        pub fn with_defaults() -> Result<Self, TransportError> {
            Self::new(DEFAULT_BASE_URL, Duration::from_secs(30))
        }
    }

    impl ReqwestTransport {
        /// Resolve `request` against the base URL without sending it.
        pub fn build_request(&self, request: TransportRequest) -> Result<reqwest::Request, TransportError> {
            let url = format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                request.path_and_query()
            );
            let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
                .map_err(|e| TransportError::new(e.to_string()))?;

            let mut builder = self.client.request(method, url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }
            builder.build().map_err(map_error)
        }
    }

    #[async_trait]
    impl Transport for ReqwestTransport {
        async fn send(&self, request: TransportRequest) -> Result<Response, TransportError> {
            let request = self.build_request(request)?;
            let response = self.client.execute(request).await.map_err(map_error)?;
            let status = response.status().as_u16();
            let headers: Headers = response
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
                .collect();
            let body = response.bytes().await.map_err(map_error)?;

            Ok(Response::new(status, headers, body.to_vec()))
        }
    }

    // URLs carry webhook tokens, so they never reach error messages.
    fn map_error(error: reqwest::Error) -> TransportError {
        let timed_out = error.is_timeout();
        let message = error.without_url().to_string();
        if timed_out {
            TransportError::timeout(message)
        } else {
            TransportError::new(message)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_and_query() {
        let mut request = TransportRequest {
            method: Method::Post,
            path: "webhooks/1/abc".to_string(),
            query: Vec::new(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: None,
        };
        assert_eq!(request.path_and_query(), "webhooks/1/abc");

        request.query.push(("wait".to_string(), "true".to_string()));
        assert_eq!(request.path_and_query(), "webhooks/1/abc?wait=true");
        assert_eq!(request.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_transport_error_kinds() {
        assert!(!TransportError::new("refused").timed_out);
        assert!(TransportError::timeout("slow").timed_out);
        assert_eq!(TransportError::new("refused").to_string(), "Transport error: refused");
    }
}
