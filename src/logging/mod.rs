//! Logging infrastructure for Passage
//!
//! Structured `tracing` output. Codes, nonces and keys are bearer material for
//! the relay, so they only ever reach logs through [`redact`].

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Characters of a token kept in log output
const REDACTED_PREFIX_LEN: usize = 6;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `passage=<level>,info`.
pub fn init(log_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("passage={},info", log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Short prefix of a secret token, safe for logs.
pub fn redact(token: &str) -> String {
    match token.char_indices().nth(REDACTED_PREFIX_LEN) {
        Some((cut, _)) => format!("{}…", &token[..cut]),
        None => "…".to_string(),
    }
}
