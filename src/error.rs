//! Error taxonomy for the synchronization engine.
//!
//! Every recoverable failure maps to exactly one of these variants, and every
//! variant has exactly one recovery action: advance to the next fallback tier
//! (or, for `Auth`, invalidate the session so the next cycle re-authenticates).
//! None of these surface to the dashboard consumer as fatal errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
  /// Timeout, connection error, or non-2xx response from the feed endpoint.
  #[error("network failure: {0}")]
  Network(String),

  /// Login rejected, or an authenticated request rejected as unauthorized.
  #[error("authentication failure: {0}")]
  Auth(String),

  /// Response body failed to parse as the expected JSON shape.
  #[error("malformed payload: {0}")]
  MalformedPayload(String),

  /// Cache miss (exact or fuzzy lookup found nothing).
  #[error("not found in cache")]
  NotFound,

  /// Durable store read/write error.
  #[error("storage failure: {0}")]
  Storage(String),
}

impl SyncError {
  pub fn is_auth(&self) -> bool {
    matches!(self, SyncError::Auth(_))
  }
}

impl From<rusqlite::Error> for SyncError {
  fn from(e: rusqlite::Error) -> Self {
    match e {
      rusqlite::Error::QueryReturnedNoRows => SyncError::NotFound,
      other => SyncError::Storage(other.to_string()),
    }
  }
}

impl From<reqwest::Error> for SyncError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      SyncError::MalformedPayload(e.to_string())
    } else {
      // Timeouts and connect errors are treated identically to any other
      // network failure: fall through to the next tier.
      SyncError::Network(e.to_string())
    }
  }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
