//! Error types for `accommod-engine`.

use std::time::Duration;

use accommod_core::journal::JournalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("journal error: {0}")]
  Journal(#[source] JournalError),

  /// The event refers to something that no longer exists. Never retried.
  #[error("stale event: {0}")]
  StaleEvent(String),

  #[error("concurrent writes kept winning on {0}")]
  Conflict(String),

  #[error("handler timed out after {0:?}")]
  Timeout(Duration),

  #[error("event bus is closed")]
  BusClosed,
}

impl Error {
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  /// Whether the bus should try the delivery again.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Store(_) | Self::Journal(_) | Self::Conflict(_) | Self::Timeout(_) => true,
      Self::StaleEvent(_) | Self::BusClosed => false,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
