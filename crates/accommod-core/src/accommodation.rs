//! Accommodations granted to beneficiaries.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoStaticStr};
use uuid::Uuid;

use crate::calendar::Period;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccommodationDomain {
  /// Exam conditions (extra time, separate room, ...). Only these feed the
  /// exam-accommodation decision.
  Exam,
  Pedagogical,
  Support,
}

impl AccommodationDomain {
  pub fn discriminant(self) -> &'static str { self.into() }

  pub fn from_discriminant(s: &str) -> crate::Result<Self> {
    match s {
      "exam" => Ok(Self::Exam),
      "pedagogical" => Ok(Self::Pedagogical),
      "support" => Ok(Self::Support),
      other => Err(crate::Error::UnknownDiscriminant {
        kind:  "accommodation domain",
        value: other.to_string(),
      }),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accommodation {
  pub accommodation_id: Uuid,
  pub uid:              String,
  pub domain:           AccommodationDomain,
  pub label:            String,
  pub period:           Period,
  pub modified_at:      DateTime<Utc>,
}

impl Accommodation {
  pub fn is_active_exam(&self, date: NaiveDate) -> bool {
    self.domain == AccommodationDomain::Exam && self.period.covers(date)
  }
}
