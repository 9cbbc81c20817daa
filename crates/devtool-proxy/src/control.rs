//! HTTP client for the proxy control plane.
//!
//! ## Endpoints
//!
//! - `GET /proxy/status` - interception status
//! - `POST /proxy/start` - enable interception
//! - `POST /proxy/stop` - disable interception
//! - `GET /filters` - current filter snapshot
//! - `PUT /filters` - replace the filter snapshot
//! - `GET /sessions` - persisted events
//! - `DELETE /sessions` - drop persisted events
//! - `GET /proxy/cert` - CA certificate bytes
//!
//! Every call is a single request with no retries. Transport failures map to
//! [`ControlError::InvalidResponse`], non-2xx answers to
//! [`ControlError::Http`], and schema mismatches to [`ControlError::Decode`].

use std::time::Duration;

use reqwest::{Method, Url};
use serde::de::DeserializeOwned;

use devtool_core::{NetworkEvent, NetworkFilters, ProxyStatus};

use crate::error::ControlError;

/// Default control-plane host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds `http://{host}:{port}`.
pub(crate) fn base_url(host: &str, port: u16) -> Result<Url, String> {
    Url::parse(&format!("http://{}:{}", host, port))
        .map_err(|e| format!("{}:{}: {}", host, port, e))
}

/// Client for one proxy control plane.
#[derive(Debug, Clone)]
pub struct ControlClient {
    client: reqwest::Client,
    base: Url,
    host: String,
    port: u16,
}

impl ControlClient {
    /// Creates a client for `http://{host}:{port}` with the default timeout.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ControlError> {
        Self::with_timeout(host, port, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a client with a custom per-request timeout.
    pub fn with_timeout(
        host: impl Into<String>,
        port: u16,
        timeout: Duration,
    ) -> Result<Self, ControlError> {
        let host = host.into();
        let base = base_url(&host, port).map_err(ControlError::InvalidUrl)?;

        let client = reqwest::Client::builder()
            .user_agent(format!("DevTool/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ControlError::InvalidResponse(e.to_string()))?;

        Ok(Self {
            client,
            base,
            host,
            port,
        })
    }

    /// Control-plane host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Control-plane port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL of the control plane.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// GET /proxy/status
    pub async fn fetch_status(&self) -> Result<ProxyStatus, ControlError> {
        self.request_json(Method::GET, "/proxy/status", None).await
    }

    /// POST /proxy/start
    pub async fn start_proxy(&self) -> Result<ProxyStatus, ControlError> {
        self.request_json(Method::POST, "/proxy/start", None).await
    }

    /// POST /proxy/stop
    pub async fn stop_proxy(&self) -> Result<ProxyStatus, ControlError> {
        self.request_json(Method::POST, "/proxy/stop", None).await
    }

    /// GET /filters
    pub async fn fetch_filters(&self) -> Result<NetworkFilters, ControlError> {
        self.request_json(Method::GET, "/filters", None).await
    }

    /// PUT /filters, returning the snapshot echoed by the proxy.
    pub async fn update_filters(
        &self,
        filters: &NetworkFilters,
    ) -> Result<NetworkFilters, ControlError> {
        let body = serde_json::to_vec(filters)?;
        self.request_json(Method::PUT, "/filters", Some(body)).await
    }

    /// GET /sessions
    pub async fn fetch_sessions(&self) -> Result<Vec<NetworkEvent>, ControlError> {
        let bytes = self.request(Method::GET, "/sessions", None).await?;
        Ok(NetworkEvent::decode_sessions(&bytes)?)
    }

    /// DELETE /sessions
    pub async fn clear_sessions(&self) -> Result<(), ControlError> {
        self.request(Method::DELETE, "/sessions", None).await?;
        Ok(())
    }

    /// GET /proxy/cert
    pub async fn fetch_certificate(&self) -> Result<Vec<u8>, ControlError> {
        self.request(Method::GET, "/proxy/cert", None).await
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T, ControlError> {
        let bytes = self.request(method, path, body).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, ControlError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| ControlError::InvalidUrl(e.to_string()))?;

        tracing::debug!(%method, %url, "Control plane request");

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(
                status = status.as_u16(),
                "Control plane returned error status"
            );
            return Err(ControlError::Http(status.as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}
