//! Durable record of published events and of deliveries that gave up.
//!
//! Unlike [`crate::store::AccommodationStore`], this trait is object safe:
//! the bus holds it as `Arc<dyn EventJournal>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Envelope;

pub type JournalError = Box<dyn std::error::Error + Send + Sync>;

/// A delivery that exhausted its retries or failed fatally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
  pub dead_letter_id: Uuid,
  pub envelope:       Envelope,
  /// Name of the handler that failed.
  pub handler:        String,
  pub error:          String,
  pub attempts:       u32,
  pub failed_at:      DateTime<Utc>,
}

#[async_trait]
pub trait EventJournal: Send + Sync {
  /// Persist a freshly published envelope as pending.
  async fn append(&self, envelope: &Envelope) -> Result<(), JournalError>;

  /// Mark an envelope as fully delivered. Idempotent.
  async fn complete(&self, event_id: Uuid) -> Result<(), JournalError>;

  /// Envelopes appended but never completed, oldest first.
  async fn pending(&self) -> Result<Vec<Envelope>, JournalError>;

  async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), JournalError>;

  async fn dead_letters(&self) -> Result<Vec<DeadLetter>, JournalError>;
}
