//! Fallback coordinator
//!
//! Drives sign-in from the app: one relay attempt, at most one retry with a
//! fresh key and nonce, then the provider's direct login inside the app's own
//! context. The redirect channel is lossy, so every wait is bounded and a
//! silent relay surfaces as [`RelayError::TransportLost`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::credential::{
    Credential, CredentialImporter, CredentialStore, PendingRelay, RedirectMatch, RelayEndpoint,
};
use crate::exchange::BlobStore;
use crate::logging::redact;
use crate::types::{RelayError, Result};

/// Opens the relay entry URL in a provider-trusted browser session
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn open(&self, entry_url: &str) -> Result<()>;
}

/// Provider-native login run inside the app's own context
#[async_trait]
pub trait DirectLogin: Send + Sync {
    async fn sign_in(&self) -> Result<Credential>;
}

#[async_trait]
impl<T: RelayTransport + ?Sized> RelayTransport for Arc<T> {
    async fn open(&self, entry_url: &str) -> Result<()> {
        (**self).open(entry_url).await
    }
}

#[async_trait]
impl<T: DirectLogin + ?Sized> DirectLogin for Arc<T> {
    async fn sign_in(&self) -> Result<Credential> {
        (**self).sign_in().await
    }
}

/// What happens after the first relay attempt fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Retry once straight away
    #[default]
    Automatic,

    /// Stop and let the user choose between [`FallbackCoordinator::retry`]
    /// and [`FallbackCoordinator::sign_in_directly`]
    AskUser,

    /// Go to direct login after the first failure
    Disabled,
}

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub endpoint: RelayEndpoint,

    /// How long to wait for the return redirect
    pub relay_wait: Duration,

    pub retry: RetryPolicy,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            endpoint: RelayEndpoint::default(),
            relay_wait: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Where the coordinator is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Relaying { attempt: u8, nonce: String },
    AwaitingUser { reason: &'static str },
    DirectLogin,
    SignedIn,
    Failed { reason: &'static str },
}

/// Result of a sign-in step
#[derive(Debug)]
pub enum SignInOutcome {
    /// The relay delivered a credential
    Relayed(Credential),

    /// Direct login delivered a credential
    Direct(Credential),

    /// The first relay attempt failed and the user must choose what next
    RetryAvailable(RelayError),
}

impl SignInOutcome {
    pub fn credential(&self) -> Option<&Credential> {
        match self {
            Self::Relayed(c) | Self::Direct(c) => Some(c),
            Self::RetryAvailable(_) => None,
        }
    }

    pub fn into_credential(self) -> Option<Credential> {
        match self {
            Self::Relayed(c) | Self::Direct(c) => Some(c),
            Self::RetryAvailable(_) => None,
        }
    }
}

/// Fallback coordinator
///
/// Owns the "relay in progress" state and the receiving end of the app's
/// redirect channel; whatever handles the app's deep links sends the raw
/// URI into the paired `mpsc::Sender`.
pub struct FallbackCoordinator<T, D, S, C> {
    transport: T,
    direct: D,
    importer: CredentialImporter<S, C>,
    redirects: mpsc::Receiver<String>,
    config: FallbackConfig,
    state: CoordinatorState,
}

impl<T, D, S, C> FallbackCoordinator<T, D, S, C>
where
    T: RelayTransport,
    D: DirectLogin,
    S: BlobStore,
    C: CredentialStore,
{
    pub fn new(
        transport: T,
        direct: D,
        importer: CredentialImporter<S, C>,
        redirects: mpsc::Receiver<String>,
        config: FallbackConfig,
    ) -> Self {
        Self {
            transport,
            direct,
            importer,
            redirects,
            config,
            state: CoordinatorState::Idle,
        }
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    /// Start sign-in from scratch.
    pub async fn sign_in(&mut self) -> Result<SignInOutcome> {
        let error = match self.attempt(1).await {
            Ok(credential) => return Ok(self.signed_in(SignInOutcome::Relayed(credential))),
            Err(e) => e,
        };

        if !error.allows_relay_retry() {
            return self.sign_in_directly().await;
        }

        match self.config.retry {
            RetryPolicy::Automatic => self.retry_then_direct().await,
            RetryPolicy::AskUser => {
                self.state = CoordinatorState::AwaitingUser {
                    reason: error.reason_code(),
                };
                Ok(SignInOutcome::RetryAvailable(error))
            }
            RetryPolicy::Disabled => self.sign_in_directly().await,
        }
    }

    /// Run the single permitted retry after [`SignInOutcome::RetryAvailable`].
    pub async fn retry(&mut self) -> Result<SignInOutcome> {
        if !matches!(self.state, CoordinatorState::AwaitingUser { .. }) {
            return Err(RelayError::Parameter(
                "no relay attempt is awaiting a retry".to_string(),
            ));
        }
        self.retry_then_direct().await
    }

    /// Skip (or abandon) the relay and use the provider's own login.
    pub async fn sign_in_directly(&mut self) -> Result<SignInOutcome> {
        self.state = CoordinatorState::DirectLogin;
        info!("Falling back to direct provider login");

        match self.direct.sign_in().await {
            Ok(credential) => {
                self.importer.credentials().save(&credential).await?;
                Ok(self.signed_in(SignInOutcome::Direct(credential)))
            }
            Err(e) => {
                warn!(reason = e.reason_code(), "Direct login failed: {}", e);
                self.state = CoordinatorState::Failed {
                    reason: e.reason_code(),
                };
                Err(e)
            }
        }
    }

    async fn retry_then_direct(&mut self) -> Result<SignInOutcome> {
        match self.attempt(2).await {
            Ok(credential) => Ok(self.signed_in(SignInOutcome::Relayed(credential))),
            Err(_) => self.sign_in_directly().await,
        }
    }

    fn signed_in(&mut self, outcome: SignInOutcome) -> SignInOutcome {
        self.state = CoordinatorState::SignedIn;
        outcome
    }

    /// One full relay handshake with a fresh key and nonce.
    async fn attempt(&mut self, attempt: u8) -> Result<Credential> {
        let pending = PendingRelay::begin(&self.config.endpoint)?;
        self.state = CoordinatorState::Relaying {
            attempt,
            nonce: pending.nonce().to_string(),
        };
        info!(attempt, nonce = %redact(pending.nonce()), "Relay attempt started");

        let result = self.run_attempt(pending).await;
        if let Err(e) = &result {
            if e.is_security_event() {
                warn!(attempt, reason = e.reason_code(), "Relay attempt failed verification");
            } else {
                warn!(attempt, reason = e.reason_code(), "Relay attempt failed: {}", e);
            }
        }
        result
    }

    async fn run_attempt(&mut self, pending: PendingRelay) -> Result<Credential> {
        self.transport.open(pending.entry_url()).await?;

        let code = match tokio::time::timeout(
            self.config.relay_wait,
            wait_for_redirect(&mut self.redirects, &pending),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(RelayError::TransportLost),
        };

        self.importer.import(pending, &code).await
    }
}

/// Wait for this attempt's redirect, skipping anything addressed elsewhere.
async fn wait_for_redirect(
    redirects: &mut mpsc::Receiver<String>,
    pending: &PendingRelay,
) -> Result<String> {
    while let Some(uri) = redirects.recv().await {
        match pending.match_redirect(&uri) {
            RedirectMatch::Code(code) => return Ok(code),
            RedirectMatch::Failed(e) => return Err(e),
            RedirectMatch::Foreign => {
                debug!("Ignoring redirect for another relay attempt");
            }
        }
    }
    Err(RelayError::TransportLost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::tests::{credential_with_ttl, HOUR};
    use crate::credential::{ImporterConfig, MemoryCredentialStore};
    use crate::exchange::MemoryBlobStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Never delivers a redirect
    #[derive(Default)]
    struct SilentTransport {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl RelayTransport for SilentTransport {
        async fn open(&self, _entry_url: &str) -> Result<()> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Delivers a failure redirect for whatever nonce it was opened with
    struct RefusedTransport {
        redirects: mpsc::Sender<String>,
        opened: AtomicUsize,
    }

    #[async_trait]
    impl RelayTransport for RefusedTransport {
        async fn open(&self, entry_url: &str) -> Result<()> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (_, query) = entry_url.split_once('?').unwrap_or_default();
            let allowed = [crate::relay::DEFAULT_RETURN_URI.to_string()];
            let entry = crate::relay::RelayEntry::parse(query, &allowed)?;
            let uri = crate::relay::RelayRedirect::failure("provider_rejected", Some(entry.nonce))
                .to_uri(&entry.return_uri);
            self.redirects
                .send(uri)
                .await
                .map_err(|_| RelayError::TransportLost)
        }
    }

    struct WorkingDirectLogin;

    #[async_trait]
    impl DirectLogin for WorkingDirectLogin {
        async fn sign_in(&self) -> Result<Credential> {
            Ok(credential_with_ttl(HOUR))
        }
    }

    fn importer() -> CredentialImporter<Arc<MemoryBlobStore>, Arc<MemoryCredentialStore>> {
        CredentialImporter::new(
            Arc::new(MemoryBlobStore::default()),
            Arc::new(MemoryCredentialStore::new()),
            ImporterConfig::default(),
        )
    }

    fn config(retry: RetryPolicy) -> FallbackConfig {
        FallbackConfig {
            relay_wait: Duration::from_secs(30),
            retry,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_relay_retries_once_then_goes_direct() {
        let (_tx, rx) = mpsc::channel(4);
        let transport = Arc::new(SilentTransport::default());
        let mut coordinator = FallbackCoordinator::new(
            Arc::clone(&transport),
            WorkingDirectLogin,
            importer(),
            rx,
            config(RetryPolicy::Automatic),
        );

        let outcome = coordinator.sign_in().await.unwrap();
        assert!(matches!(outcome, SignInOutcome::Direct(_)));
        assert_eq!(transport.opened.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.state(), &CoordinatorState::SignedIn);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_retry_goes_direct_after_one_attempt() {
        let (_tx, rx) = mpsc::channel(4);
        let transport = Arc::new(SilentTransport::default());
        let mut coordinator = FallbackCoordinator::new(
            Arc::clone(&transport),
            WorkingDirectLogin,
            importer(),
            rx,
            config(RetryPolicy::Disabled),
        );

        let outcome = coordinator.sign_in().await.unwrap();
        assert!(matches!(outcome, SignInOutcome::Direct(_)));
        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ask_user_pauses_with_reason() {
        let (tx, rx) = mpsc::channel(4);
        let transport = Arc::new(RefusedTransport {
            redirects: tx,
            opened: AtomicUsize::new(0),
        });
        let mut coordinator = FallbackCoordinator::new(
            Arc::clone(&transport),
            WorkingDirectLogin,
            importer(),
            rx,
            config(RetryPolicy::AskUser),
        );

        let outcome = coordinator.sign_in().await.unwrap();
        assert!(matches!(
            outcome,
            SignInOutcome::RetryAvailable(RelayError::ProviderRejected(_))
        ));
        assert_eq!(
            coordinator.state(),
            &CoordinatorState::AwaitingUser {
                reason: "provider_rejected"
            }
        );

        // The retry is refused too, so the user lands on direct login
        let outcome = coordinator.retry().await.unwrap();
        assert!(matches!(outcome, SignInOutcome::Direct(_)));
        assert_eq!(transport.opened.load(Ordering::SeqCst), 2);

        // Only one retry per sign-in
        assert!(matches!(coordinator.retry().await, Err(RelayError::Parameter(_))));
    }

    #[tokio::test]
    async fn test_direct_login_is_persisted() {
        let (_tx, rx) = mpsc::channel(1);
        let credentials = Arc::new(MemoryCredentialStore::new());
        let importer = CredentialImporter::new(
            Arc::new(MemoryBlobStore::default()),
            Arc::clone(&credentials),
            ImporterConfig::default(),
        );
        let mut coordinator = FallbackCoordinator::new(
            SilentTransport::default(),
            WorkingDirectLogin,
            importer,
            rx,
            config(RetryPolicy::Disabled),
        );

        let outcome = coordinator.sign_in_directly().await.unwrap();
        let credential = outcome.into_credential().unwrap();
        let stored = credentials.load().await.unwrap().unwrap();
        assert_eq!(stored.public_key(), credential.public_key());
    }

    #[tokio::test]
    async fn test_closed_channel_is_transport_lost() {
        let (tx, rx) = mpsc::channel::<String>(1);
        drop(tx);
        let pending = PendingRelay::begin(&RelayEndpoint::default()).unwrap();
        let mut rx = rx;
        let result = wait_for_redirect(&mut rx, &pending).await;
        assert!(matches!(result, Err(RelayError::TransportLost)));
    }
}
