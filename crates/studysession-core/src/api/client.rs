//! HTTP transport for the study API.
//!
//! `ApiTransport` is the network boundary of the session core: it sends one
//! request and hands back the raw status and body without interpreting them.
//! `HttpClient` is the reqwest-backed implementation used outside tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;

use super::ApiError;

/// Beacons are fired while the process is going away; keep them short.
const BEACON_TIMEOUT_SECS: u64 = 2;

/// A single outbound call, relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }

    /// POST with a typed body.
    pub fn post_json<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidInput(format!("Failed to encode request body: {}", e)))?;
        Ok(Self::post(path, body))
    }
}

/// Status and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-success status into an `ApiError`, passing success through.
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.body))
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        // Empty acknowledgements decode as JSON null
        let body = if self.body.trim().is_empty() { "null" } else { self.body.as_str() };
        serde_json::from_str(body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Send a request, attaching `bearer` as the Authorization credential when present.
    ///
    /// Only transport-level failures are errors; every HTTP status comes back as a response.
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse, ApiError>;

    /// Fire-and-forget delivery that must not wait on the response.
    fn send_beacon(&self, request: ApiRequest, bearer: Option<String>);
}

/// API client for the study backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn build(&self, request: &ApiRequest, bearer: Option<&str>) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(request.method.clone(), self.url(&request.path));
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        builder
    }
}

#[async_trait]
impl ApiTransport for HttpClient {
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse, ApiError> {
        debug!(method = %request.method, path = %request.path, authenticated = bearer.is_some(), "Sending request");

        let response = self.build(request, bearer).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        debug!(path = %request.path, status = status, "Received response");
        Ok(ApiResponse { status, body })
    }

    fn send_beacon(&self, request: ApiRequest, bearer: Option<String>) {
        let builder = self
            .build(&request, bearer.as_deref())
            .timeout(Duration::from_secs(BEACON_TIMEOUT_SECS));

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = builder.send().await {
                        debug!(path = %request.path, error = %e, "Beacon delivery failed");
                    }
                });
            }
            Err(_) => warn!(path = %request.path, "No async runtime available, beacon dropped"),
        }
    }
}

/// Join a base URL and an API path with exactly one slash between them.
pub fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
