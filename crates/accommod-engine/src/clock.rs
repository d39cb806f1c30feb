//! The date handlers evaluate derived state at.

use chrono::{NaiveDate, Utc};

#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
  /// Today in UTC.
  #[default]
  System,
  /// A pinned date, for tests and replays.
  Fixed(NaiveDate),
}

impl Clock {
  pub fn today(self) -> NaiveDate {
    match self {
      Self::System => Utc::now().date_naive(),
      Self::Fixed(date) => date,
    }
  }
}
