//! Persisted completion markers for one-time data migrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the migration log. A job is applied once per version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
  pub name:         String,
  pub version:      u32,
  pub completed_at: DateTime<Utc>,
  /// Number of items the job processed.
  pub items:        u64,
}
