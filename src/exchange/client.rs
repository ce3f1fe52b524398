//! Code/nonce contract over any [`BlobStore`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::record::{generate_code, ExchangeRecord};
use super::store::BlobStore;
use crate::identity::DelegationChain;
use crate::logging::redact;
use crate::types::{RelayError, Result};

/// Blob exchange client
///
/// Turns store-level answers into the relay's error taxonomy: an absent
/// record becomes [`RelayError::ExchangeNotFound`].
pub struct ExchangeClient<S> {
    store: S,
}

impl<S: BlobStore> ExchangeClient<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn publish(
        &self,
        code: &str,
        nonce: &str,
        bytes: Vec<u8>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        if code.is_empty() || nonce.is_empty() {
            return Err(RelayError::Parameter("code and nonce are required".to_string()));
        }
        let record = ExchangeRecord::new(code.to_string(), nonce.to_string(), bytes, expires_at);
        self.store.publish(record).await
    }

    /// Atomically read and destroy the record.
    pub async fn consume(&self, code: &str, nonce: &str) -> Result<Vec<u8>> {
        match self.store.consume(code, nonce).await? {
            Some(bytes) => Ok(bytes),
            None => {
                debug!(code = %redact(code), "Exchange record absent");
                Err(RelayError::ExchangeNotFound)
            }
        }
    }

    /// Serialize `chain` and park it under a fresh code for `ttl`.
    ///
    /// Returns the code. A collision is retried once with a new code.
    pub async fn publish_chain(
        &self,
        nonce: &str,
        chain: &DelegationChain,
        ttl: Duration,
    ) -> Result<String> {
        let bytes = chain.to_bytes().map_err(RelayError::MalformedChain)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| RelayError::Config(format!("exchange ttl out of range: {e}")))?;
        let expires_at = Utc::now() + ttl;

        let code = generate_code();
        match self.publish(&code, nonce, bytes.clone(), expires_at).await {
            Ok(()) => Ok(code),
            Err(RelayError::Conflict(_)) => {
                warn!(code = %redact(&code), "Exchange code collided, retrying with a fresh code");
                let code = generate_code();
                self.publish(&code, nonce, bytes, expires_at).await?;
                Ok(code)
            }
            Err(e) => Err(e),
        }
    }
}
