//! Trusted-context side of the relay

pub mod session;
pub mod uri;

pub use session::{RelayConfig, RelayOutcome, RelaySession, RelayState};
pub use uri::{sanitize_reason, RelayEntry, RelayRedirect, DEFAULT_RETURN_URI, ERROR_CODE_PREFIX};
