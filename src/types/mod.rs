//! Shared types for Passage

pub mod error;
pub mod time;

pub use error::{RelayError, Result};
pub use time::{now_nanos, Timestamp};
