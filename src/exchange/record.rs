//! Exchange records and the random tokens that address them.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;

/// Random bytes behind a single-use exchange code (256 bits)
pub const CODE_BYTES: usize = 32;

/// Random bytes behind a relay nonce (128 bits)
pub const NONCE_BYTES: usize = 16;

/// Serialized delegation chain parked in the exchange store
#[derive(Clone)]
pub struct ExchangeRecord {
    /// Random single-use code generated by the relay
    pub code: String,

    /// Caller-supplied nonce correlating the relay attempt
    pub nonce: String,

    /// Serialized `DelegationChain`
    pub payload: Vec<u8>,

    /// After this instant the record is unreadable
    pub expires_at: DateTime<Utc>,
}

impl ExchangeRecord {
    pub fn new(code: String, nonce: String, payload: Vec<u8>, expires_at: DateTime<Utc>) -> Self {
        Self {
            code,
            nonce,
            payload,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for ExchangeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRecord")
            .field("code", &crate::logging::redact(&self.code))
            .field("nonce", &crate::logging::redact(&self.nonce))
            .field("payload_len", &self.payload.len())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn random_hex<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a fresh single-use exchange code.
pub fn generate_code() -> String {
    random_hex::<CODE_BYTES>()
}

/// Generate a fresh relay nonce.
pub fn generate_nonce() -> String {
    random_hex::<NONCE_BYTES>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_lengths() {
        assert_eq!(generate_code().len(), CODE_BYTES * 2);
        assert_eq!(generate_nonce().len(), NONCE_BYTES * 2);
    }

    #[test]
    fn test_codes_do_not_repeat() {
        let codes: HashSet<String> = (0..1000).map(|_| generate_code()).collect();
        assert_eq!(codes.len(), 1000);
    }

    #[test]
    fn test_expiry_is_inclusive() {
        let now = Utc::now();
        let record = ExchangeRecord::new("c".into(), "n".into(), vec![], now);
        assert!(record.is_expired_at(now));
        assert!(!record.is_expired_at(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let code = generate_code();
        let record = ExchangeRecord::new(code.clone(), generate_nonce(), vec![1, 2, 3], Utc::now());
        let debug = format!("{:?}", record);
        assert!(!debug.contains(&code));
        assert!(debug.contains("payload_len: 3"));
    }
}
