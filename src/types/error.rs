//! Error types for Passage
//!
//! Every failure the relay can hit is classified into one of these variants.
//! The variant, not its message, decides what crosses a trust boundary: the
//! relay only ever emits `reason_code()`, and people only ever see
//! `user_message()`.

use hyper::StatusCode;

use crate::identity::ChainError;

/// Main error type for relay operations
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Relay-entry or return parameters were missing or malformed
    #[error("Invalid relay parameters: {0}")]
    Parameter(String),

    /// The provider (or the user at the provider) refused to delegate
    #[error("Provider rejected delegation: {0}")]
    ProviderRejected(String),

    /// A step did not finish inside its wall-clock budget
    #[error("Timed out during {0}")]
    Timeout(String),

    /// The exchange record is missing, expired or already consumed
    #[error("Exchange record not found")]
    ExchangeNotFound,

    /// An imported chain failed signature, expiry or binding checks
    #[error("Chain verification failed: {0}")]
    ChainVerificationFailed(ChainError),

    /// The return redirect never arrived
    #[error("Return redirect never arrived")]
    TransportLost,

    /// Delegations could not be composed into a chain
    #[error("Malformed delegation chain: {0}")]
    MalformedChain(ChainError),

    /// The exchange store could not be reached or answered unexpectedly
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// A live exchange record already uses this code
    #[error("Exchange conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Record expiry is in the past or beyond what the store accepts
    #[error("Expiry rejected: {0}")]
    ExpiryRejected(String),

    /// Local credential persistence failed
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Parameter(_) => StatusCode::BAD_REQUEST,
            Self::ProviderRejected(_) => StatusCode::FORBIDDEN,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ExchangeNotFound => StatusCode::NOT_FOUND,
            Self::ChainVerificationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::TransportLost => StatusCode::GATEWAY_TIMEOUT,
            Self::MalformedChain(_) => StatusCode::BAD_REQUEST,
            Self::Exchange(_) => StatusCode::BAD_GATEWAY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ExpiryRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short, non-sensitive token carried in a failure redirect as `error:<reason>`.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Parameter(_) => "invalid_request",
            Self::ProviderRejected(_) => "provider_rejected",
            Self::Timeout(_) => "timeout",
            Self::ExchangeNotFound => "exchange_not_found",
            Self::ChainVerificationFailed(_) => "verification_failed",
            Self::TransportLost => "transport_lost",
            Self::MalformedChain(_) => "malformed_chain",
            Self::Exchange(_)
            | Self::Conflict(_)
            | Self::PayloadTooLarge(_)
            | Self::ExpiryRejected(_) => "exchange_failed",
            Self::Storage(_) => "storage_failed",
            Self::Config(_) | Self::Internal(_) => "internal",
        }
    }

    /// Map a reason token received from the relay back into the taxonomy.
    ///
    /// Unknown tokens become `ProviderRejected` so the coordinator treats them
    /// as an ordinary, retryable relay failure.
    pub fn from_reason_code(reason: &str) -> Self {
        let origin = "reported by relay".to_string();
        match reason {
            "invalid_request" => Self::Parameter(origin),
            "provider_rejected" => Self::ProviderRejected(origin),
            "timeout" => Self::Timeout("relay".to_string()),
            "exchange_not_found" => Self::ExchangeNotFound,
            "transport_lost" => Self::TransportLost,
            "malformed_chain" => Self::MalformedChain(ChainError::Encoding(origin)),
            "verification_failed" => {
                Self::ChainVerificationFailed(ChainError::Encoding(origin))
            }
            "exchange_failed" => Self::Exchange(origin),
            "storage_failed" => Self::Storage(origin),
            "internal" => Self::Internal(origin),
            _ => Self::ProviderRejected(format!("unrecognised relay reason: {reason}")),
        }
    }

    /// Whether a person can sensibly just try again.
    pub fn is_user_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderRejected(_)
                | Self::Timeout(_)
                | Self::ExchangeNotFound
                | Self::TransportLost
                | Self::Exchange(_)
        )
    }

    /// Security-relevant failures: logged without payloads, never retried silently.
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::ChainVerificationFailed(_) | Self::MalformedChain(_)
        )
    }

    /// Whether the whole relay handshake may be attempted again with fresh keys.
    ///
    /// Parameter errors are fatal: a second handshake would be built from the
    /// same broken inputs.
    pub fn allows_relay_retry(&self) -> bool {
        !matches!(self, Self::Parameter(_) | Self::Config(_))
    }

    /// Generic text safe to show to a person.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ChainVerificationFailed(_) | Self::MalformedChain(_) => {
                "Sign-in could not be verified."
            }
            Self::ExchangeNotFound => "Your sign-in session expired. Please try again.",
            Self::ProviderRejected(_) => "Sign-in was cancelled or declined.",
            Self::Timeout(_) | Self::TransportLost => "Sign-in took too long. Please try again.",
            Self::Parameter(_) => "Sign-in could not be started.",
            _ => "Something went wrong while signing in.",
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for RelayError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout("exchange request".to_string())
        } else {
            Self::Exchange(err.to_string())
        }
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_round_trip() {
        let errors = [
            RelayError::Parameter("missing nonce".into()),
            RelayError::ProviderRejected("user closed window".into()),
            RelayError::Timeout("authenticating".into()),
            RelayError::ExchangeNotFound,
            RelayError::TransportLost,
        ];

        for err in errors {
            let back = RelayError::from_reason_code(err.reason_code());
            assert_eq!(back.reason_code(), err.reason_code());
        }
    }

    #[test]
    fn test_reason_code_never_echoes_details() {
        let err = RelayError::ProviderRejected("secret-token-abc".into());
        assert!(!err.reason_code().contains("secret"));
        assert!(!err.user_message().contains("secret"));
    }

    #[test]
    fn test_unknown_reason_is_retryable() {
        let err = RelayError::from_reason_code("something_new");
        assert!(err.is_user_retryable());
        assert!(err.allows_relay_retry());
    }

    #[test]
    fn test_classification() {
        let verification = RelayError::ChainVerificationFailed(ChainError::Empty);
        assert!(verification.is_security_event());
        assert!(!verification.is_user_retryable());
        assert!(verification.allows_relay_retry());

        let parameter = RelayError::Parameter("bad".into());
        assert!(!parameter.allows_relay_retry());
        assert_eq!(parameter.status_code(), StatusCode::BAD_REQUEST);

        assert_eq!(
            RelayError::Conflict("dup".into()).status_code(),
            StatusCode::CONFLICT
        );
    }
}
