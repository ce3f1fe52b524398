//! JSON bodies spoken between `HttpBlobStore` and the exchange service.
//!
//! Codes travel in request bodies only, never in paths or query strings,
//! so they stay out of access logs.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::ExchangeRecord;
use crate::types::{RelayError, Result};

/// `POST /exchange`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub code: String,
    pub nonce: String,
    /// Base64 (standard alphabet) payload
    pub payload: String,
    pub expires_at: DateTime<Utc>,
}

impl PublishRequest {
    pub fn from_record(record: &ExchangeRecord) -> Self {
        Self {
            code: record.code.clone(),
            nonce: record.nonce.clone(),
            payload: STANDARD.encode(&record.payload),
            expires_at: record.expires_at,
        }
    }

    pub fn into_record(self) -> Result<ExchangeRecord> {
        let payload = STANDARD
            .decode(self.payload.as_bytes())
            .map_err(|_| RelayError::Parameter("payload is not valid base64".to_string()))?;
        Ok(ExchangeRecord::new(self.code, self.nonce, payload, self.expires_at))
    }
}

/// `POST /exchange/consume`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub code: String,
    pub nonce: String,
}

/// Successful consume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeResponse {
    pub payload: String,
}

impl ConsumeResponse {
    pub fn new(payload: &[u8]) -> Self {
        Self {
            payload: STANDARD.encode(payload),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.payload.as_bytes())
            .map_err(|_| RelayError::Exchange("store returned invalid base64".to_string()))
    }
}

/// Error body returned by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
