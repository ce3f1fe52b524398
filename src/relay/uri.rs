//! Relay entry and return URIs
//!
//! Entry: `<origin>/<path>?nonce=..&publicKey=<hex DER>&return=<callback URI>`
//!
//! Return: `<callback URI>#code=<code>&nonce=<nonce>`, or on failure
//! `#code=error:<reason>&nonce=<nonce>`. Values ride in the fragment so they
//! are never sent to any server by the app's URL handler.

use serde::{Deserialize, Serialize};

use crate::identity::PublicKey;
use crate::types::{RelayError, Result};

/// Prefix marking a failure code in the return fragment
pub const ERROR_CODE_PREFIX: &str = "error:";

/// Longest reason token carried in a failure redirect
pub const MAX_REASON_LEN: usize = 32;

/// App callback the relay redirects to unless configured otherwise
pub const DEFAULT_RETURN_URI: &str = "passage://relay/callback";

const MAX_NONCE_LEN: usize = 128;

/// Parameters handed to the relay by the app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEntry {
    pub nonce: String,
    /// The app's target key, the leaf of the finished chain
    pub public_key: PublicKey,
    pub return_uri: String,
}

#[derive(Serialize, Deserialize)]
struct EntryQuery {
    nonce: Option<String>,
    #[serde(rename = "publicKey")]
    public_key: Option<String>,
    #[serde(rename = "return")]
    return_uri: Option<String>,
}

impl RelayEntry {
    /// Build the URL the trusted browser session is opened on.
    pub fn to_url(&self, origin: &str, path: &str) -> Result<String> {
        let query = serde_urlencoded::to_string(EntryQuery {
            nonce: Some(self.nonce.clone()),
            public_key: Some(self.public_key.to_hex()),
            return_uri: Some(self.return_uri.clone()),
        })
        .map_err(|e| RelayError::Internal(format!("failed to encode relay query: {e}")))?;

        Ok(format!(
            "{}/{}?{}",
            origin.trim_end_matches('/'),
            path.trim_start_matches('/'),
            query
        ))
    }

    /// Parse and validate a relay entry query string (with or without `?`).
    ///
    /// The `return` value must be one of `allowed_returns` exactly; the
    /// exchange code is only ever handed to a registered app callback.
    pub fn parse(query: &str, allowed_returns: &[String]) -> Result<Self> {
        let raw = parse_query(query)?;

        let nonce = raw
            .nonce
            .filter(|n| valid_nonce(n))
            .ok_or_else(|| RelayError::Parameter("missing or malformed nonce".to_string()))?;
        let public_key = raw
            .public_key
            .as_deref()
            .and_then(|hex| PublicKey::from_hex(hex).ok())
            .ok_or_else(|| RelayError::Parameter("missing or malformed publicKey".to_string()))?;
        let return_uri = raw
            .return_uri
            .filter(|uri| valid_return_uri(uri))
            .ok_or_else(|| RelayError::Parameter("missing or malformed return URI".to_string()))?;
        if !is_allowed_return(&return_uri, allowed_returns) {
            return Err(RelayError::Parameter(
                "return URI is not a registered app callback".to_string(),
            ));
        }

        Ok(Self {
            nonce,
            public_key,
            return_uri,
        })
    }

    /// Salvage whatever is needed to report a failure back to the caller.
    ///
    /// Returns the return URI (only if allowed) and the nonce (if present)
    /// from a query that failed [`RelayEntry::parse`].
    pub fn salvage(query: &str, allowed_returns: &[String]) -> Option<(String, Option<String>)> {
        let raw = parse_query(query).ok()?;
        let return_uri = raw
            .return_uri
            .filter(|uri| valid_return_uri(uri) && is_allowed_return(uri, allowed_returns))?;
        Some((return_uri, raw.nonce.filter(|n| valid_nonce(n))))
    }
}

fn parse_query(query: &str) -> Result<EntryQuery> {
    let query = query.strip_prefix('?').unwrap_or(query);
    serde_urlencoded::from_str(query)
        .map_err(|_| RelayError::Parameter("malformed relay query".to_string()))
}

fn valid_nonce(nonce: &str) -> bool {
    !nonce.is_empty()
        && nonce.len() <= MAX_NONCE_LEN
        && nonce.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn valid_return_uri(uri: &str) -> bool {
    match uri.split_once("://") {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && scheme
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'))
                && !rest.is_empty()
                && !uri.contains('#')
        }
        None => false,
    }
}

fn is_allowed_return(uri: &str, allowed_returns: &[String]) -> bool {
    allowed_returns.iter().any(|allowed| allowed == uri)
}

/// Reduce an arbitrary reason to a short `[a-z0-9_]` token.
pub fn sanitize_reason(reason: &str) -> String {
    let cleaned: String = reason
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .take(MAX_REASON_LEN)
        .collect();
    if cleaned.is_empty() {
        "internal".to_string()
    } else {
        cleaned
    }
}

/// What the relay sends back through the return URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayRedirect {
    Success { code: String, nonce: String },
    Failure { reason: String, nonce: Option<String> },
}

impl RelayRedirect {
    pub fn failure(reason: &str, nonce: Option<String>) -> Self {
        Self::Failure {
            reason: sanitize_reason(reason),
            nonce,
        }
    }

    pub fn nonce(&self) -> Option<&str> {
        match self {
            Self::Success { nonce, .. } => Some(nonce),
            Self::Failure { nonce, .. } => nonce.as_deref(),
        }
    }

    /// Append the fragment to `return_uri`.
    pub fn to_uri(&self, return_uri: &str) -> String {
        let (code, nonce) = match self {
            Self::Success { code, nonce } => (code.clone(), Some(nonce.as_str())),
            Self::Failure { reason, nonce } => {
                (format!("{ERROR_CODE_PREFIX}{reason}"), nonce.as_deref())
            }
        };

        let mut uri = format!("{}#code={}", return_uri, urlencoding::encode(&code));
        if let Some(nonce) = nonce {
            uri.push_str("&nonce=");
            uri.push_str(&urlencoding::encode(nonce));
        }
        uri
    }

    /// Parse the fragment of a return URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let (_, fragment) = uri
            .split_once('#')
            .ok_or_else(|| RelayError::Parameter("return URI has no fragment".to_string()))?;

        let mut code = None;
        let mut nonce = None;
        for pair in fragment.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = urlencoding::decode(value)
                .map_err(|_| RelayError::Parameter("malformed return fragment".to_string()))?
                .into_owned();
            match key {
                "code" => code = Some(value),
                "nonce" => nonce = Some(value),
                _ => {}
            }
        }

        let nonce = nonce.filter(|n| !n.is_empty());
        match code.filter(|c| !c.is_empty()) {
            Some(code) => match code.strip_prefix(ERROR_CODE_PREFIX) {
                Some(reason) => Ok(Self::failure(reason, nonce)),
                None => {
                    let nonce = nonce.ok_or_else(|| {
                        RelayError::Parameter("return fragment has no nonce".to_string())
                    })?;
                    Ok(Self::Success { code, nonce })
                }
            },
            None => Err(RelayError::Parameter(
                "return fragment has no code".to_string(),
            )),
        }
    }
}
