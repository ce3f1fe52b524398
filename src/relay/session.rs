//! Relay session controller
//!
//! Runs in the provider-trusted top-level browser context:
//!
//! ```text
//!   Starting ─▶ Authenticating ─▶ Storing ─▶ Redirecting ─▶ Complete
//!       │             │              │
//!       └─────────────┴──────────────┴──────────────────────▶ Failed
//! ```
//!
//! The intermediate key lives only inside [`RelaySession::run`]; it signs the
//! second hop and is dropped (zeroized) before the chain is published.

use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::uri::{RelayEntry, RelayRedirect, DEFAULT_RETURN_URI};
use crate::exchange::{BlobStore, ExchangeClient};
use crate::identity::{
    request_delegation, DelegationChain, DelegatorContext, KeyPair, PublicKey, SignedDelegation,
};
use crate::logging::redact;
use crate::types::time::nanos_after;
use crate::types::{now_nanos, RelayError, Result};

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Starting,
    Authenticating,
    Storing,
    Redirecting,
    Complete,
    Failed { reason: &'static str },
}

impl RelayState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed { .. })
    }

    /// Whether the controller may move from `self` to `next`
    pub fn can_advance_to(&self, next: &RelayState) -> bool {
        use RelayState::*;
        match (self, next) {
            (Starting, Authenticating) => true,
            (Authenticating, Storing) => true,
            (Storing, Redirecting) => true,
            (Redirecting, Complete) => true,
            (Starting | Authenticating | Storing, Failed { .. }) => true,
            _ => false,
        }
    }
}

/// Relay timing, lifetimes and the callbacks it may redirect to
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Lifetime requested from the provider for the first hop
    pub delegation_ttl: Duration,

    /// How long the published chain stays consumable
    pub exchange_ttl: Duration,

    /// Budget for the provider login ceremony
    pub authenticate_timeout: Duration,

    /// Budget for the publish
    pub store_timeout: Duration,

    /// Exact app callback URIs accepted as `return`
    pub allowed_return_uris: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            delegation_ttl: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
            exchange_ttl: Duration::from_secs(5 * 60),
            authenticate_timeout: Duration::from_secs(120),
            store_timeout: Duration::from_secs(10),
            allowed_return_uris: vec![DEFAULT_RETURN_URI.to_string()],
        }
    }
}

/// How a relay run ended
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    /// Terminal state
    pub state: RelayState,

    /// Every state the run entered, in order, ending with `state`
    pub trail: Vec<RelayState>,

    /// Where to send the browser; `None` when no allowed return URI was given
    pub redirect: Option<String>,
}

/// State of one run; every transition goes through [`RelayRun::advance`].
struct RelayRun {
    attempt: Uuid,
    trail: Vec<RelayState>,
}

impl RelayRun {
    fn start() -> Self {
        let attempt = Uuid::new_v4();
        debug!(%attempt, state = ?RelayState::Starting, "Relay attempt started");
        Self {
            attempt,
            trail: vec![RelayState::Starting],
        }
    }

    fn current(&self) -> RelayState {
        self.trail.last().copied().unwrap_or(RelayState::Starting)
    }

    fn advance(&mut self, next: RelayState) {
        debug_assert!(
            self.current().can_advance_to(&next),
            "illegal relay transition {:?} -> {:?}",
            self.current(),
            next
        );
        debug!(attempt = %self.attempt, state = ?next, "Relay state");
        self.trail.push(next);
    }

    fn finish(mut self, terminal: RelayState, redirect: Option<String>) -> RelayOutcome {
        self.advance(terminal);
        RelayOutcome {
            state: terminal,
            trail: self.trail,
            redirect,
        }
    }
}

/// Relay session controller
pub struct RelaySession<P, S> {
    provider: P,
    exchange: ExchangeClient<S>,
    config: RelayConfig,
}

impl<P, S> RelaySession<P, S>
where
    P: DelegatorContext,
    S: BlobStore,
{
    pub fn new(provider: P, store: S, config: RelayConfig) -> Self {
        Self {
            provider,
            exchange: ExchangeClient::new(store),
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run one relay attempt for the entry query string.
    ///
    /// Never fails outright: every error becomes a `Failed` outcome with a
    /// best-effort redirect carrying only an opaque reason.
    pub async fn run(&self, query: &str) -> RelayOutcome {
        let mut run = RelayRun::start();
        let allowed = &self.config.allowed_return_uris;

        let entry = match RelayEntry::parse(query, allowed) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(attempt = %run.attempt, error = %e, "Relay entry rejected");
                let redirect = RelayEntry::salvage(query, allowed).map(|(return_uri, nonce)| {
                    RelayRedirect::failure(e.reason_code(), nonce).to_uri(&return_uri)
                });
                return run.finish(
                    RelayState::Failed {
                        reason: e.reason_code(),
                    },
                    redirect,
                );
            }
        };

        match self.relay(&mut run, &entry).await {
            Ok(code) => {
                run.advance(RelayState::Redirecting);
                let redirect = RelayRedirect::Success {
                    code,
                    nonce: entry.nonce.clone(),
                }
                .to_uri(&entry.return_uri);
                info!(attempt = %run.attempt, nonce = %redact(&entry.nonce), "Relay complete");
                run.finish(RelayState::Complete, Some(redirect))
            }
            Err(e) => {
                warn!(
                    attempt = %run.attempt,
                    nonce = %redact(&entry.nonce),
                    reason = e.reason_code(),
                    error = %e,
                    "Relay failed"
                );
                let redirect = RelayRedirect::failure(e.reason_code(), Some(entry.nonce.clone()))
                    .to_uri(&entry.return_uri);
                run.finish(
                    RelayState::Failed {
                        reason: e.reason_code(),
                    },
                    Some(redirect),
                )
            }
        }
    }

    /// Authenticate and store; returns the exchange code.
    async fn relay(&self, run: &mut RelayRun, entry: &RelayEntry) -> Result<String> {
        run.advance(RelayState::Authenticating);
        let intermediate = KeyPair::generate();
        let grant = request_delegation(
            &self.provider,
            &intermediate.public_key(),
            self.config.delegation_ttl,
            self.config.authenticate_timeout,
        )
        .await?;

        run.advance(RelayState::Storing);
        let chain = self.second_hop(intermediate, grant.delegator, grant.delegation, entry)?;

        match tokio::time::timeout(
            self.config.store_timeout,
            self.exchange
                .publish_chain(&entry.nonce, &chain, self.config.exchange_ttl),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout("storing".to_string())),
        }
    }

    /// Sign intermediate -> target and compose the two-hop chain.
    ///
    /// Takes the intermediate key by value so it is gone once this returns.
    fn second_hop(
        &self,
        intermediate: KeyPair,
        root: PublicKey,
        first: SignedDelegation,
        entry: &RelayEntry,
    ) -> Result<DelegationChain> {
        let now = now_nanos();
        // The second hop never outlives the first
        let expiration = nanos_after(now, self.config.delegation_ttl).min(first.expiration());
        let second = SignedDelegation::issue(&intermediate, entry.public_key, expiration, None, now)
            .map_err(RelayError::MalformedChain)?;
        drop(intermediate);

        DelegationChain::compose(root, vec![first, second]).map_err(RelayError::MalformedChain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{generate_nonce, ExchangeRecord, MemoryBlobStore};
    use crate::identity::{DelegationGrant, KeyPairProvider, RELAY_CHAIN_LEN};
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Never finishes the login ceremony
    struct StalledProvider;

    #[async_trait]
    impl DelegatorContext for StalledProvider {
        async fn delegate(&self, _target: &PublicKey, _ttl: Duration) -> Result<DelegationGrant> {
            std::future::pending().await
        }
    }

    /// Accepts the publish but never answers
    struct StalledStore;

    #[async_trait]
    impl BlobStore for StalledStore {
        async fn publish(&self, _record: ExchangeRecord) -> Result<()> {
            std::future::pending().await
        }

        async fn consume(&self, _code: &str, _nonce: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    struct RefusingProvider;

    #[async_trait]
    impl DelegatorContext for RefusingProvider {
        async fn delegate(&self, _target: &PublicKey, _ttl: Duration) -> Result<DelegationGrant> {
            Err(RelayError::ProviderRejected("user cancelled".into()))
        }
    }

    fn entry_query(target: &KeyPair, nonce: &str) -> String {
        let entry = RelayEntry {
            nonce: nonce.to_string(),
            public_key: target.public_key(),
            return_uri: DEFAULT_RETURN_URI.into(),
        };
        let url = entry.to_url("https://relay.example.org", "relay").unwrap();
        url.split_once('?').unwrap().1.to_string()
    }

    #[tokio::test]
    async fn test_relay_publishes_two_hop_chain() {
        let provider = KeyPairProvider::new(Duration::from_secs(30 * 24 * 3600));
        let root = provider.root_public_key();
        let store = Arc::new(MemoryBlobStore::default());
        let session = RelaySession::new(provider, Arc::clone(&store), RelayConfig::default());

        let target = KeyPair::generate();
        let nonce = generate_nonce();
        let outcome = session.run(&entry_query(&target, &nonce)).await;
        assert_eq!(outcome.state, RelayState::Complete);
        assert_eq!(
            outcome.trail,
            vec![
                RelayState::Starting,
                RelayState::Authenticating,
                RelayState::Storing,
                RelayState::Redirecting,
                RelayState::Complete,
            ]
        );

        let redirect = RelayRedirect::parse(&outcome.redirect.unwrap()).unwrap();
        let RelayRedirect::Success { code, nonce: echoed } = redirect else {
            panic!("expected success redirect");
        };
        assert_eq!(echoed, nonce);

        let bytes = store.consume(&code, &nonce).await.unwrap().unwrap();
        let chain = DelegationChain::from_bytes(&bytes).unwrap();
        assert_eq!(chain.len(), RELAY_CHAIN_LEN);
        assert_eq!(chain.root(), &root);
        assert_eq!(chain.delegate(), &target.public_key());
        assert!(chain.verify(now_nanos()));

        let hops = chain.delegations();
        assert!(hops[1].expiration() <= hops[0].expiration());
    }

    #[tokio::test]
    async fn test_refusal_redirects_with_reason() {
        let store = Arc::new(MemoryBlobStore::default());
        let session = RelaySession::new(RefusingProvider, Arc::clone(&store), RelayConfig::default());

        let nonce = generate_nonce();
        let outcome = session.run(&entry_query(&KeyPair::generate(), &nonce)).await;
        assert_eq!(
            outcome.state,
            RelayState::Failed {
                reason: "provider_rejected"
            }
        );
        assert_eq!(
            outcome.trail,
            vec![
                RelayState::Starting,
                RelayState::Authenticating,
                RelayState::Failed {
                    reason: "provider_rejected"
                },
            ]
        );

        let redirect = RelayRedirect::parse(&outcome.redirect.unwrap()).unwrap();
        assert_eq!(
            redirect,
            RelayRedirect::Failure {
                reason: "provider_rejected".into(),
                nonce: Some(nonce),
            }
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_entry_fails_before_provider() {
        let session = RelaySession::new(
            RefusingProvider,
            MemoryBlobStore::default(),
            RelayConfig::default(),
        );

        let outcome = session
            .run("nonce=abc&return=passage%3A%2F%2Frelay%2Fcallback")
            .await;
        assert_eq!(
            outcome.state,
            RelayState::Failed {
                reason: "invalid_request"
            }
        );
        assert_eq!(outcome.trail.len(), 2);
        assert_eq!(
            outcome.redirect.as_deref(),
            Some("passage://relay/callback#code=error%3Ainvalid_request&nonce=abc")
        );

        let hopeless = session.run("garbage").await;
        assert!(hopeless.state.is_terminal());
        assert!(hopeless.redirect.is_none());
    }

    #[tokio::test]
    async fn test_second_hop_is_clamped_to_first() {
        // Provider only grants an hour even though a month is requested
        let provider = KeyPairProvider::new(Duration::from_secs(3600));
        let store = Arc::new(MemoryBlobStore::default());
        let session = RelaySession::new(provider, Arc::clone(&store), RelayConfig::default());

        let target = KeyPair::generate();
        let nonce = generate_nonce();
        let outcome = session.run(&entry_query(&target, &nonce)).await;
        let RelayRedirect::Success { code, .. } =
            RelayRedirect::parse(&outcome.redirect.unwrap()).unwrap()
        else {
            panic!("expected success redirect");
        };

        let bytes = store.consume(&code, &nonce).await.unwrap().unwrap();
        let chain = DelegationChain::from_bytes(&bytes).unwrap();
        let hops = chain.delegations();
        assert_eq!(hops[1].expiration(), hops[0].expiration());
    }

    #[tokio::test]
    async fn test_unregistered_return_never_receives_code() {
        let provider = KeyPairProvider::new(Duration::from_secs(3600));
        let store = Arc::new(MemoryBlobStore::default());
        let session = RelaySession::new(provider, Arc::clone(&store), RelayConfig::default());

        let query = format!(
            "nonce=abc&publicKey={}&return={}",
            KeyPair::generate().public_key().to_hex(),
            urlencoding::encode("https://attacker.example/steal")
        );
        let outcome = session.run(&query).await;

        assert_eq!(
            outcome.state,
            RelayState::Failed {
                reason: "invalid_request"
            }
        );
        assert!(outcome.redirect.is_none());
        assert!(!outcome.trail.contains(&RelayState::Authenticating));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_configured_return_uri_is_accepted() {
        let provider = KeyPairProvider::new(Duration::from_secs(3600));
        let config = RelayConfig {
            allowed_return_uris: vec!["otherapp://signin".to_string()],
            ..Default::default()
        };
        let session = RelaySession::new(provider, MemoryBlobStore::default(), config);

        let entry = RelayEntry {
            nonce: generate_nonce(),
            public_key: KeyPair::generate().public_key(),
            return_uri: "otherapp://signin".into(),
        };
        let url = entry.to_url("https://relay.example.org", "relay").unwrap();
        let outcome = session.run(url.split_once('?').unwrap().1).await;

        assert_eq!(outcome.state, RelayState::Complete);
        assert!(outcome.redirect.unwrap().starts_with("otherapp://signin#code="));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_login_times_out() {
        let store = Arc::new(MemoryBlobStore::default());
        let session = RelaySession::new(StalledProvider, Arc::clone(&store), RelayConfig::default());

        let nonce = generate_nonce();
        let outcome = session.run(&entry_query(&KeyPair::generate(), &nonce)).await;

        assert_eq!(outcome.state, RelayState::Failed { reason: "timeout" });
        assert_eq!(
            outcome.trail[..2],
            [RelayState::Starting, RelayState::Authenticating]
        );
        assert_eq!(
            RelayRedirect::parse(&outcome.redirect.unwrap()).unwrap(),
            RelayRedirect::Failure {
                reason: "timeout".into(),
                nonce: Some(nonce),
            }
        );
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_publish_times_out() {
        let provider = KeyPairProvider::new(Duration::from_secs(3600));
        let session = RelaySession::new(provider, StalledStore, RelayConfig::default());

        let outcome = session
            .run(&entry_query(&KeyPair::generate(), &generate_nonce()))
            .await;

        assert_eq!(outcome.state, RelayState::Failed { reason: "timeout" });
        assert_eq!(
            outcome.trail,
            vec![
                RelayState::Starting,
                RelayState::Authenticating,
                RelayState::Storing,
                RelayState::Failed { reason: "timeout" },
            ]
        );
    }

    #[test]
    fn test_transitions() {
        assert!(RelayState::Starting.can_advance_to(&RelayState::Authenticating));
        assert!(RelayState::Storing.can_advance_to(&RelayState::Failed { reason: "timeout" }));
        assert!(!RelayState::Starting.can_advance_to(&RelayState::Complete));
        assert!(!RelayState::Redirecting.can_advance_to(&RelayState::Failed { reason: "x" }));
        assert!(!RelayState::Complete.can_advance_to(&RelayState::Starting));
    }
}
