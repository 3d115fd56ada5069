//! Offline sync: batch mapping, single-flight execution, triggers and transport.

mod executor;
mod mapper;
mod retry;
mod trigger;

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{SyncBatchRequest, SyncBatchResponse};
use crate::util::normalize_text_option;

pub use executor::{SyncExecutor, SyncOutcome, SyncSummary};
pub use mapper::{build_sync_batch, to_remote_input};
pub use retry::RetryPolicy;
pub use trigger::{AppLifecycle, Connectivity, SyncTrigger, TriggerController, TriggerOutcome};

/// Path of the batch reconciliation route, relative to the endpoint base URL
pub const SYNC_BATCH_PATH: &str = "/v1/sync/batch";
/// Path of the liveness route used as a connectivity probe
pub const HEALTH_PATH: &str = "/healthz";
/// Header carrying the device identity when the body omits it
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Failure of the batch call as a whole. No per-item detail is available.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid sync endpoint configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sync API error: {0}")]
    Api(String),
    #[error("Invalid sync response payload: {0}")]
    InvalidPayload(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// The authoritative counterpart of the executor.
#[allow(async_fn_in_trait)]
pub trait RemoteEndpoint {
    /// Submit one batch. Per-item rejections are reported in the response;
    /// an `Err` means nothing can be said about any item.
    async fn sync_batch(&self, request: &SyncBatchRequest) -> TransportResult<SyncBatchResponse>;
}

impl<T: RemoteEndpoint> RemoteEndpoint for Arc<T> {
    async fn sync_batch(&self, request: &SyncBatchRequest) -> TransportResult<SyncBatchResponse> {
        (**self).sync_batch(request).await
    }
}

/// HTTP client for a remote `sprout-api` deployment.
#[derive(Clone)]
pub struct HttpSyncEndpoint {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSyncEndpoint {
    /// Build a client for `endpoint`. The transport timeout is the only
    /// bound on how long one attempt may take.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> TransportResult<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        Ok(Self {
            endpoint,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Probe the liveness route. `false` means known-unreachable.
    pub async fn is_reachable(&self) -> bool {
        match self
            .client
            .get(format!("{}{HEALTH_PATH}", self.endpoint))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!(%error, "Sync endpoint probe failed");
                false
            }
        }
    }
}

impl RemoteEndpoint for HttpSyncEndpoint {
    async fn sync_batch(&self, request: &SyncBatchRequest) -> TransportResult<SyncBatchResponse> {
        let mut builder = self
            .client
            .post(format!("{}{SYNC_BATCH_PATH}", self.endpoint))
            .header("Accept", "application/json")
            .json(request);
        if let Some(device_id) = request.device_id.as_deref() {
            builder = builder.header(DEVICE_ID_HEADER, device_id);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Api(parse_api_error(status, &body)));
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|error| TransportError::InvalidPayload(error.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = crate::util::compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

pub(crate) fn normalize_endpoint(raw: String) -> TransportResult<String> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        TransportError::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if crate::util::is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(TransportError::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.com".to_string()).is_err());
    }

    #[test]
    fn normalize_endpoint_trims_trailing_slashes() {
        assert_eq!(
            normalize_endpoint(" https://sync.example.com/ ".to_string()).unwrap(),
            "https://sync.example.com"
        );
    }

    #[test]
    fn parse_api_error_prefers_json_message() {
        assert_eq!(
            parse_api_error(StatusCode::UNAUTHORIZED, r#"{"error":"unknown device"}"#),
            "unknown device (401)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
        assert_eq!(
            parse_api_error(StatusCode::SERVICE_UNAVAILABLE, "maintenance"),
            "maintenance (503)"
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_surfaces_as_transport_error() {
        let endpoint =
            HttpSyncEndpoint::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(!endpoint.is_reachable().await);
        let result = endpoint.sync_batch(&SyncBatchRequest::default()).await;
        assert!(matches!(result, Err(TransportError::Http(_))));
    }
}
