//! Single signed delegations.
//!
//! A delegation says "`pubkey` may act for me until `expiration`, optionally
//! only towards `targets`". The delegator signs
//! `DELEGATION_DOMAIN || sha256(canonical statement)`; the JSON form is only
//! a transport and is never what gets signed.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::chain::ChainError;
use super::keys::{KeyPair, PublicKey};
use crate::types::Timestamp;

/// Domain separator prepended to every signed delegation statement
pub const DELEGATION_DOMAIN: &[u8] = b"\x1Apassage-delegation";

/// Authorization statement: `pubkey` may act for the delegator until `expiration`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    /// Key receiving the authority
    pub pubkey: PublicKey,

    /// Expiry, nanoseconds since the Unix epoch (hex encoded on the wire)
    #[serde(with = "hex_u64")]
    pub expiration: Timestamp,

    /// Optional scope constraints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
}

impl Delegation {
    /// Build a statement; the expiration must lie after `now`.
    pub fn new(
        pubkey: PublicKey,
        expiration: Timestamp,
        targets: Option<Vec<String>>,
        now: Timestamp,
    ) -> Result<Self, ChainError> {
        if expiration <= now {
            return Err(ChainError::ExpiresInPast);
        }
        Ok(Self {
            pubkey,
            expiration,
            targets,
        })
    }

    /// Canonical byte encoding: length-prefixed DER key, big-endian expiry,
    /// then a presence flag and length-prefixed targets.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let der = self.pubkey.to_der();
        let mut out = Vec::with_capacity(der.len() + 64);
        out.extend_from_slice(&(der.len() as u32).to_be_bytes());
        out.extend_from_slice(&der);
        out.extend_from_slice(&self.expiration.to_be_bytes());
        match &self.targets {
            None => out.push(0),
            Some(targets) => {
                out.push(1);
                out.extend_from_slice(&(targets.len() as u32).to_be_bytes());
                for target in targets {
                    out.extend_from_slice(&(target.len() as u32).to_be_bytes());
                    out.extend_from_slice(target.as_bytes());
                }
            }
        }
        out
    }

    /// The exact bytes the delegator signs
    pub fn signing_payload(&self) -> Vec<u8> {
        let digest = Sha256::digest(self.canonical_bytes());
        let mut payload = Vec::with_capacity(DELEGATION_DOMAIN.len() + digest.len());
        payload.extend_from_slice(DELEGATION_DOMAIN);
        payload.extend_from_slice(&digest);
        payload
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expiration <= now
    }
}

/// A delegation together with the delegator's signature over it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDelegation {
    pub delegation: Delegation,

    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl SignedDelegation {
    pub fn sign(delegation: Delegation, signer: &KeyPair) -> Self {
        let signature = signer.sign(&delegation.signing_payload()).to_vec();
        Self {
            delegation,
            signature,
        }
    }

    /// Build and sign in one step.
    pub fn issue(
        signer: &KeyPair,
        delegate: PublicKey,
        expiration: Timestamp,
        targets: Option<Vec<String>>,
        now: Timestamp,
    ) -> Result<Self, ChainError> {
        let delegation = Delegation::new(delegate, expiration, targets, now)?;
        Ok(Self::sign(delegation, signer))
    }

    pub fn verify_signature(&self, delegator: &PublicKey) -> bool {
        delegator.verify(&self.delegation.signing_payload(), &self.signature)
    }

    pub fn delegate(&self) -> &PublicKey {
        &self.delegation.pubkey
    }

    pub fn expiration(&self) -> Timestamp {
        self.delegation.expiration
    }
}

/// u64 as a lowercase hex string, so 64-bit nanosecond values survive
/// JSON parsers that only have doubles.
mod hex_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:x}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        u64::from_str_radix(&s, 16).map_err(serde::de::Error::custom)
    }
}
