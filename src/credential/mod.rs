//! App-side credentials
//!
//! A [`Credential`] pairs the app's own target key with the delegation chain
//! the relay obtained for it. Requests signed with the target key carry the
//! chain so a verifier can walk from the provider root down to the signer.

pub mod importer;
pub mod store;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::identity::{ChainError, DelegationChain, KeyPair, PublicKey};
use crate::types::Timestamp;

pub use importer::{
    CredentialImporter, ImporterConfig, PendingRelay, RedirectImport, RedirectMatch, RelayEndpoint,
};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};

/// Domain separator for request signatures
pub const REQUEST_DOMAIN: &[u8] = b"\x0Fpassage-request";

/// Target key plus the chain that authorizes it
pub struct Credential {
    key: KeyPair,
    chain: DelegationChain,
}

impl Credential {
    /// Pair `key` with `chain`; the chain must delegate to exactly this key.
    pub fn new(key: KeyPair, chain: DelegationChain) -> Result<Self, ChainError> {
        if *chain.delegate() != key.public_key() {
            return Err(ChainError::DelegateMismatch);
        }
        Ok(Self { key, chain })
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    /// The provider identity this credential acts as
    pub fn identity(&self) -> &PublicKey {
        self.chain.root()
    }

    pub fn chain(&self) -> &DelegationChain {
        &self.chain
    }

    /// Earliest expiration in the chain
    pub fn expiration(&self) -> Timestamp {
        self.chain.expiration()
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiration() <= now
    }

    pub fn verify(&self, now: Timestamp) -> bool {
        self.chain.verify(now)
    }

    pub fn sign(&self, content: &[u8]) -> SignedRequest {
        SignedRequest {
            signature: self.key.sign(&request_payload(content)).to_vec(),
            content: content.to_vec(),
            sender_pubkey: self.key.public_key(),
            sender_delegation: self.chain.clone(),
        }
    }

    pub(crate) fn to_stored(&self) -> StoredCredential {
        StoredCredential {
            secret_key: hex::encode(self.key.to_secret_bytes().as_slice()),
            chain: self.chain.clone(),
        }
    }

    pub(crate) fn from_stored(stored: &StoredCredential) -> Result<Self, ChainError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&stored.secret_key, &mut bytes)
            .map_err(|_| ChainError::Encoding("secret key is not 32 hex bytes".to_string()))?;
        let key = KeyPair::from_secret_bytes(&bytes);
        bytes.zeroize();
        Self::new(key, stored.chain.clone())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("public_key", &self.key.public_key())
            .field("identity", self.chain.root())
            .field("expiration", &self.chain.expiration())
            .finish()
    }
}

fn request_payload(content: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(content);
    let mut payload = Vec::with_capacity(REQUEST_DOMAIN.len() + digest.len());
    payload.extend_from_slice(REQUEST_DOMAIN);
    payload.extend_from_slice(&digest);
    payload
}

/// Content signed by a credential, with everything needed to verify it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedRequest {
    #[serde(with = "hex::serde")]
    pub content: Vec<u8>,

    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,

    pub sender_pubkey: PublicKey,

    pub sender_delegation: DelegationChain,
}

impl SignedRequest {
    /// Check the chain at `now`, that it ends at the signer, and the signature.
    pub fn verify(&self, now: Timestamp) -> Result<(), ChainError> {
        self.sender_delegation.validate(now)?;
        if *self.sender_delegation.delegate() != self.sender_pubkey {
            return Err(ChainError::DelegateMismatch);
        }
        if !self
            .sender_pubkey
            .verify(&request_payload(&self.content), &self.signature)
        {
            return Err(ChainError::InvalidSignature);
        }
        Ok(())
    }

    /// The provider identity the request acts as
    pub fn identity(&self) -> &PublicKey {
        self.sender_delegation.root()
    }
}

/// On-disk form of a credential
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredCredential {
    secret_key: String,

    #[zeroize(skip)]
    chain: DelegationChain,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::identity::SignedDelegation;
    use crate::types::now_nanos;

    pub(crate) const HOUR: u64 = 3_600_000_000_000;

    /// A credential whose chain expires `ttl` nanoseconds from now
    pub(crate) fn credential_with_ttl(ttl: u64) -> Credential {
        let root = KeyPair::generate();
        let intermediate = KeyPair::generate();
        let target = KeyPair::generate();
        let now = now_nanos();
        let first =
            SignedDelegation::issue(&root, intermediate.public_key(), now + ttl, None, now)
                .unwrap();
        let second =
            SignedDelegation::issue(&intermediate, target.public_key(), now + ttl, None, now)
                .unwrap();
        let chain = DelegationChain::compose(root.public_key(), vec![first, second]).unwrap();
        Credential::new(target, chain).unwrap()
    }

    #[test]
    fn test_new_rejects_foreign_key() {
        let credential = credential_with_ttl(HOUR);
        let chain = credential.chain().clone();
        let result = Credential::new(KeyPair::generate(), chain);
        assert!(matches!(result, Err(ChainError::DelegateMismatch)));
    }

    #[test]
    fn test_signed_request_verifies() {
        let credential = credential_with_ttl(HOUR);
        let request = credential.sign(b"claim reward 42");

        assert_eq!(request.verify(now_nanos()), Ok(()));
        assert_eq!(request.identity(), credential.identity());
    }

    #[test]
    fn test_tampered_request_fails() {
        let credential = credential_with_ttl(HOUR);
        let mut request = credential.sign(b"claim reward 42");
        request.content = b"claim reward 9000".to_vec();
        assert_eq!(request.verify(now_nanos()), Err(ChainError::InvalidSignature));
    }

    #[test]
    fn test_request_fails_after_expiry() {
        let credential = credential_with_ttl(HOUR);
        let request = credential.sign(b"late");
        let later = now_nanos() + 2 * HOUR;

        assert!(credential.is_expired(later));
        assert!(!credential.verify(later));
        assert!(matches!(request.verify(later), Err(ChainError::Expired { .. })));
    }

    #[test]
    fn test_signed_request_json_shape() {
        let request = credential_with_ttl(HOUR).sign(b"hi");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["content"], "6869");
        assert!(json["senderDelegation"]["delegations"].is_array());

        let back: SignedRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_stored_round_trip_keeps_key() {
        let credential = credential_with_ttl(HOUR);
        let restored = Credential::from_stored(&credential.to_stored()).unwrap();
        assert_eq!(restored.public_key(), credential.public_key());
        assert_eq!(restored.chain(), credential.chain());
    }
}
