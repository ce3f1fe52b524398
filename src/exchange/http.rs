//! HTTP client for a remote exchange service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::record::ExchangeRecord;
use super::store::BlobStore;
use super::wire::{ConsumeRequest, ConsumeResponse, ErrorBody, PublishRequest};
use crate::logging::redact;
use crate::types::{RelayError, Result};

/// Where and how to reach the exchange service
#[derive(Debug, Clone)]
pub struct HttpBlobStoreConfig {
    /// Base URL, e.g. `https://relay.example.org`
    pub base_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for HttpBlobStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8088".to_string(),
            timeout_secs: 10,
        }
    }
}

/// [`BlobStore`] backed by the `passage` exchange service
///
/// ```rust,no_run
/// use passage::exchange::{HttpBlobStore, HttpBlobStoreConfig};
///
/// # fn example() -> passage::types::Result<()> {
/// let store = HttpBlobStore::new(HttpBlobStoreConfig {
///     base_url: "https://relay.example.org".into(),
///     ..Default::default()
/// })?;
/// # Ok(())
/// # }
/// ```
pub struct HttpBlobStore {
    config: HttpBlobStoreConfig,
    client: Client,
}

impl HttpBlobStore {
    pub fn new(config: HttpBlobStoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn error_for(response: reqwest::Response) -> RelayError {
        let status = response.status();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };

        match status {
            StatusCode::CONFLICT => RelayError::Conflict(message),
            StatusCode::PAYLOAD_TOO_LARGE => RelayError::PayloadTooLarge(message),
            StatusCode::UNPROCESSABLE_ENTITY => RelayError::ExpiryRejected(message),
            _ => RelayError::Exchange(format!("{status}: {message}")),
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn publish(&self, record: ExchangeRecord) -> Result<()> {
        let body = PublishRequest::from_record(&record);
        let response = self
            .client
            .post(self.url("/exchange"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        debug!(code = %redact(&record.code), "Published to remote exchange");
        Ok(())
    }

    async fn consume(&self, code: &str, nonce: &str) -> Result<Option<Vec<u8>>> {
        let body = ConsumeRequest {
            code: code.to_string(),
            nonce: nonce.to_string(),
        };
        let response = self
            .client
            .post(self.url("/exchange/consume"))
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let body: ConsumeResponse = response.json().await?;
        Ok(Some(body.decode()?))
    }
}
