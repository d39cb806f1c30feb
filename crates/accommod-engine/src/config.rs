//! Bus tuning, deserialised from the `[bus]` table of `config.toml`.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
  /// Deliveries attempted per (envelope, handler) before dead-lettering.
  pub max_attempts:       u32,
  pub backoff_base_ms:    u64,
  pub backoff_max_ms:     u64,
  /// Execution budget of one handler invocation.
  pub handler_timeout_ms: u64,
  pub lanes_per_handler:  usize,
  /// Page size for bulk walks (migrations, re-trigger).
  pub batch_size:         usize,
}

impl Default for BusConfig {
  fn default() -> Self {
    Self {
      max_attempts:       5,
      backoff_base_ms:    200,
      backoff_max_ms:     30_000,
      handler_timeout_ms: 10_000,
      lanes_per_handler:  8,
      batch_size:         200,
    }
  }
}

impl BusConfig {
  pub fn handler_timeout(&self) -> Duration { Duration::from_millis(self.handler_timeout_ms) }

  /// Delay before attempt `attempt + 1`: `base * 2^(attempt - 1)`, capped.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let ms = self
      .backoff_base_ms
      .saturating_mul(1u64 << exponent)
      .min(self.backoff_max_ms);
    Duration::from_millis(ms)
  }

  /// At least one lane, whatever the file says.
  pub fn lanes(&self) -> usize { self.lanes_per_handler.max(1) }
}
