//! Ed25519 key pairs and algorithm-tagged public keys.
//!
//! Public keys travel as DER-encoded SubjectPublicKeyInfo so the algorithm is
//! part of the bytes. Private keys never leave a `KeyPair` except through
//! [`KeyPair::to_secret_bytes`], which exists only for local credential
//! persistence.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

/// DER prefix of an Ed25519 SubjectPublicKeyInfo (OID 1.3.101.112)
pub const ED25519_DER_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Raw Ed25519 public key length (32 bytes)
pub const PUBLIC_KEY_LEN: usize = 32;

/// DER-encoded public key length (44 bytes)
pub const PUBLIC_KEY_DER_LEN: usize = ED25519_DER_PREFIX.len() + PUBLIC_KEY_LEN;

/// Ed25519 signature length (64 bytes)
pub const SIGNATURE_LEN: usize = 64;

/// Public key parsing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid hex encoding")]
    InvalidHex,

    #[error("expected 44 DER bytes, got {0}")]
    InvalidLength(usize),

    #[error("unsupported key algorithm")]
    UnsupportedAlgorithm,

    #[error("not a valid Ed25519 point")]
    InvalidPoint,
}

/// Ed25519 public key
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Wrap raw key bytes, rejecting bytes that are not a curve point.
    pub fn from_raw(bytes: [u8; PUBLIC_KEY_LEN]) -> Result<Self, KeyError> {
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPoint)?;
        Ok(Self(bytes))
    }

    pub fn as_raw(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// DER SubjectPublicKeyInfo encoding
    pub fn to_der(&self) -> Vec<u8> {
        let mut der = Vec::with_capacity(PUBLIC_KEY_DER_LEN);
        der.extend_from_slice(&ED25519_DER_PREFIX);
        der.extend_from_slice(&self.0);
        der
    }

    pub fn from_der(der: &[u8]) -> Result<Self, KeyError> {
        if der.len() != PUBLIC_KEY_DER_LEN {
            return Err(KeyError::InvalidLength(der.len()));
        }
        let (prefix, raw) = der.split_at(ED25519_DER_PREFIX.len());
        if prefix != ED25519_DER_PREFIX {
            return Err(KeyError::UnsupportedAlgorithm);
        }
        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        bytes.copy_from_slice(raw);
        Self::from_raw(bytes)
    }

    /// Hex of the DER encoding, as used in relay-entry URLs
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_der())
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let der = hex::decode(s).map_err(|_| KeyError::InvalidHex)?;
        Self::from_der(&der)
    }

    /// Verify a signature made by this key
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(sig_bytes) = <[u8; SIGNATURE_LEN]>::try_from(signature) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        key.verify_strict(message, &Signature::from_bytes(&sig_bytes))
            .is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &hex::encode(self.0)[..8])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Ed25519 signing key pair.
///
/// Not `Clone`: each pair has exactly one owner. The signing key is zeroized
/// when the pair is dropped.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS random source.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Export the private key for local persistence only.
    pub fn to_secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_der_hex_round_trip() {
        let key = KeyPair::generate().public_key();
        let hex = key.to_hex();
        assert_eq!(hex.len(), PUBLIC_KEY_DER_LEN * 2);
        assert!(hex.starts_with("302a300506032b6570032100"));
        assert_eq!(PublicKey::from_hex(&hex).unwrap(), key);
    }

    #[test]
    fn test_from_der_rejects_other_algorithms() {
        let mut der = KeyPair::generate().public_key().to_der();
        der[8] = 0x71; // Ed448 OID
        assert_eq!(PublicKey::from_der(&der), Err(KeyError::UnsupportedAlgorithm));
        assert_eq!(PublicKey::from_der(&der[..40]), Err(KeyError::InvalidLength(40)));
        assert_eq!(PublicKey::from_hex("zz"), Err(KeyError::InvalidHex));
    }

    #[test]
    fn test_sign_and_verify() {
        let pair = KeyPair::generate();
        let sig = pair.sign(b"hello");
        assert!(pair.public_key().verify(b"hello", &sig));
        assert!(!pair.public_key().verify(b"hellp", &sig));
        assert!(!pair.public_key().verify(b"hello", &sig[..10]));
    }

    #[test]
    fn test_secret_round_trip() {
        let pair = KeyPair::generate();
        let secret = pair.to_secret_bytes();
        let restored = KeyPair::from_secret_bytes(&secret);
        assert_eq!(restored.public_key(), pair.public_key());
    }

    #[test]
    fn test_debug_hides_secret() {
        let pair = KeyPair::generate();
        let secret_hex = hex::encode(*pair.to_secret_bytes());
        let debug = format!("{:?}", pair);
        assert!(!debug.contains(&secret_hex));
        assert!(debug.contains("PublicKey("));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let key = KeyPair::generate().public_key();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_hex()));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
