//! Error types for `accommod-core`.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("period end {end} is not after its start {start}")]
  InvalidPeriod { start: NaiveDate, end: NaiveDate },

  #[error("unknown {kind} discriminant: {value:?}")]
  UnknownDiscriminant { kind: &'static str, value: String },

  #[error("invalid academic year: {0:?}")]
  InvalidAcademicYear(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
