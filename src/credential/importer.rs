//! Mobile-side credential importer
//!
//! The app starts a relay with [`PendingRelay::begin`], hands the entry URL
//! to the trusted browser, and feeds whatever comes back through its URL
//! handler to [`CredentialImporter::import_redirect`].

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Credential, CredentialStore};
use crate::exchange::{generate_nonce, BlobStore, ExchangeClient};
use crate::identity::{ChainError, DelegationChain, KeyPair, PublicKey, RELAY_CHAIN_LEN};
use crate::logging::redact;
use crate::relay::{RelayEntry, RelayRedirect, DEFAULT_RETURN_URI};
use crate::types::{now_nanos, RelayError, Result, Timestamp};

/// Where the relay lives and where it should send the browser back to
#[derive(Debug, Clone)]
pub struct RelayEndpoint {
    /// Relay origin, e.g. `https://relay.example.org`
    pub origin: String,

    pub path: String,

    /// App-owned callback URI
    pub return_uri: String,
}

impl Default for RelayEndpoint {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:8080".to_string(),
            path: "/relay".to_string(),
            return_uri: DEFAULT_RETURN_URI.to_string(),
        }
    }
}

/// A relay attempt the app is waiting on
///
/// Owns the fresh target key; it moves into the credential on success and
/// is dropped with the attempt otherwise.
pub struct PendingRelay {
    key: KeyPair,
    nonce: String,
    entry_url: String,
}

/// How a return URI relates to a pending attempt
#[derive(Debug)]
pub enum RedirectMatch {
    /// Ours, and the relay succeeded
    Code(String),

    /// Ours, and the relay reported a failure
    Failed(RelayError),

    /// Malformed, or for some other attempt
    Foreign,
}

impl PendingRelay {
    /// Generate a target key and nonce and build the relay entry URL.
    pub fn begin(endpoint: &RelayEndpoint) -> Result<Self> {
        let key = KeyPair::generate();
        let nonce = generate_nonce();
        let entry = RelayEntry {
            nonce: nonce.clone(),
            public_key: key.public_key(),
            return_uri: endpoint.return_uri.clone(),
        };
        let entry_url = entry.to_url(&endpoint.origin, &endpoint.path)?;

        Ok(Self {
            key,
            nonce,
            entry_url,
        })
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn target_key(&self) -> PublicKey {
        self.key.public_key()
    }

    pub fn entry_url(&self) -> &str {
        &self.entry_url
    }

    /// Classify a return URI. Purely local; never touches the network.
    pub fn match_redirect(&self, uri: &str) -> RedirectMatch {
        let redirect = match RelayRedirect::parse(uri) {
            Ok(redirect) => redirect,
            Err(e) => {
                debug!("Ignoring unparseable redirect: {}", e);
                return RedirectMatch::Foreign;
            }
        };

        if redirect.nonce() != Some(self.nonce.as_str()) {
            return RedirectMatch::Foreign;
        }

        match redirect {
            RelayRedirect::Success { code, .. } => RedirectMatch::Code(code),
            RelayRedirect::Failure { reason, .. } => {
                RedirectMatch::Failed(RelayError::from_reason_code(&reason))
            }
        }
    }
}

impl std::fmt::Debug for PendingRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRelay")
            .field("target_key", &self.key.public_key())
            .field("nonce", &redact(&self.nonce))
            .finish_non_exhaustive()
    }
}

/// What [`CredentialImporter::import_redirect`] did with a redirect
#[derive(Debug)]
pub enum RedirectImport {
    Imported(Credential),

    /// Malformed or addressed to another attempt; the pending attempt is
    /// handed back untouched so the real redirect can still be imported
    Ignored(PendingRelay),
}

impl RedirectImport {
    pub fn into_credential(self) -> Option<Credential> {
        match self {
            Self::Imported(credential) => Some(credential),
            Self::Ignored(_) => None,
        }
    }
}

/// Importer settings
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    /// Provider root every imported chain must start at, if pinned
    pub trusted_root: Option<PublicKey>,

    /// Budget for the consume call
    pub consume_timeout: Duration,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            trusted_root: None,
            consume_timeout: Duration::from_secs(10),
        }
    }
}

/// Mobile-side credential importer
pub struct CredentialImporter<S, C> {
    exchange: ExchangeClient<S>,
    credentials: C,
    config: ImporterConfig,
}

impl<S, C> CredentialImporter<S, C>
where
    S: BlobStore,
    C: CredentialStore,
{
    pub fn new(store: S, credentials: C, config: ImporterConfig) -> Self {
        Self {
            exchange: ExchangeClient::new(store),
            credentials,
            config,
        }
    }

    pub fn credentials(&self) -> &C {
        &self.credentials
    }

    /// Check the redirect against `pending`, then consume and import.
    ///
    /// A redirect that is malformed or carries another attempt's nonce never
    /// reaches the network and gives `pending` back as
    /// [`RedirectImport::Ignored`]. A failure redirect for this attempt ends it.
    pub async fn import_redirect(
        &self,
        pending: PendingRelay,
        uri: &str,
    ) -> Result<RedirectImport> {
        match pending.match_redirect(uri) {
            RedirectMatch::Code(code) => {
                self.import(pending, &code).await.map(RedirectImport::Imported)
            }
            RedirectMatch::Failed(e) => Err(e),
            RedirectMatch::Foreign => {
                debug!(nonce = %redact(&pending.nonce), "Redirect ignored for pending attempt");
                Ok(RedirectImport::Ignored(pending))
            }
        }
    }

    /// Consume `code`, verify the chain and persist the credential.
    pub async fn import(&self, pending: PendingRelay, code: &str) -> Result<Credential> {
        let bytes = match tokio::time::timeout(
            self.config.consume_timeout,
            self.exchange.consume(code, &pending.nonce),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(RelayError::Timeout("exchange consume".to_string())),
        };

        let target = pending.key.public_key();
        let chain = match self.verify_imported(&bytes, &target, now_nanos()) {
            Ok(chain) => chain,
            Err(e) => {
                // Security event: the reason only, never the payload
                warn!(
                    nonce = %redact(&pending.nonce),
                    reason = %e,
                    "Imported delegation chain rejected"
                );
                return Err(RelayError::ChainVerificationFailed(e));
            }
        };

        let credential =
            Credential::new(pending.key, chain).map_err(RelayError::ChainVerificationFailed)?;
        self.credentials.save(&credential).await?;

        info!(
            identity = ?credential.identity(),
            expiration = credential.expiration(),
            "Credential imported"
        );
        Ok(credential)
    }

    fn verify_imported(
        &self,
        bytes: &[u8],
        target: &PublicKey,
        now: Timestamp,
    ) -> std::result::Result<DelegationChain, ChainError> {
        let chain = DelegationChain::from_bytes(bytes)?;

        if chain.len() != RELAY_CHAIN_LEN {
            return Err(ChainError::UnexpectedLength {
                expected: RELAY_CHAIN_LEN,
                actual: chain.len(),
            });
        }
        chain.validate(now)?;
        if chain.delegate() != target {
            return Err(ChainError::DelegateMismatch);
        }
        if let Some(root) = &self.config.trusted_root {
            if chain.root() != root {
                return Err(ChainError::UntrustedRoot);
            }
        }
        Ok(chain)
    }
}
