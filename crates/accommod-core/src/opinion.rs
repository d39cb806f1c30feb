//! Medical/social opinions and the derived opinion state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use uuid::Uuid;

use crate::calendar::Period;

/// A medical or social assessment, valid over `period`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opinion {
  pub opinion_id:  Uuid,
  pub uid:         String,
  pub period:      Period,
  pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OpinionStatus {
  /// The subject has no opinion at all.
  None,
  /// An opinion exists but only starts later.
  Pending,
  /// At least one opinion covers the evaluated date.
  InProgress,
  /// Every opinion is over.
  Ended,
}

impl OpinionStatus {
  pub fn discriminant(self) -> &'static str { self.into() }

  pub fn from_discriminant(s: &str) -> crate::Result<Self> {
    match s {
      "none" => Ok(Self::None),
      "pending" => Ok(Self::Pending),
      "in_progress" => Ok(Self::InProgress),
      "ended" => Ok(Self::Ended),
      other => Err(crate::Error::UnknownDiscriminant {
        kind:  "opinion status",
        value: other.to_string(),
      }),
    }
  }
}

/// The opinion a status was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpinionRef {
  pub opinion_id: Uuid,
  pub period:     Period,
}

/// Output of [`resolve_opinion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpinionResolution {
  pub status:  OpinionStatus,
  pub opinion: Option<OpinionRef>,
}

/// The persisted opinion state of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpinionState {
  pub uid:         String,
  pub status:      OpinionStatus,
  pub opinion:     Option<OpinionRef>,
  pub computed_at: DateTime<Utc>,
  /// CAS token; 0 until first persisted.
  pub version:     i64,
}

impl OpinionState {
  pub fn empty(uid: impl Into<String>) -> Self {
    Self {
      uid:         uid.into(),
      status:      OpinionStatus::None,
      opinion:     None,
      computed_at: Utc::now(),
      version:     0,
    }
  }

  pub fn resolution(&self) -> OpinionResolution {
    OpinionResolution { status: self.status, opinion: self.opinion }
  }

  /// Project the stored state onto `date` using only the stored winning
  /// opinion. Never consults the opinion records themselves.
  pub fn status_on(&self, date: NaiveDate) -> OpinionStatus {
    match self.opinion {
      Some(op) if op.period.covers(date) => OpinionStatus::InProgress,
      Some(op) if date < op.period.start => OpinionStatus::Pending,
      Some(_) => OpinionStatus::Ended,
      None => self.status,
    }
  }
}

/// Derive the opinion status of a subject on `date`.
///
/// Overlapping opinions are resolved deterministically: the most recently
/// modified one wins, then the greatest id.
pub fn resolve_opinion(opinions: &[Opinion], date: NaiveDate) -> OpinionResolution {
  let winner = |op: &Opinion| OpinionRef { opinion_id: op.opinion_id, period: op.period };

  if let Some(op) = opinions
    .iter()
    .filter(|op| op.period.covers(date))
    .max_by_key(|op| (op.modified_at, op.opinion_id))
  {
    return OpinionResolution {
      status:  OpinionStatus::InProgress,
      opinion: Some(winner(op)),
    };
  }

  if let Some(op) = opinions
    .iter()
    .filter(|op| op.period.start > date)
    .min_by_key(|op| (op.period.start, std::cmp::Reverse(op.modified_at)))
  {
    return OpinionResolution {
      status:  OpinionStatus::Pending,
      opinion: Some(winner(op)),
    };
  }

  // Everything left ended before `date`; bounded ends are guaranteed here.
  match opinions
    .iter()
    .max_by_key(|op| (op.period.end, op.modified_at, op.opinion_id))
  {
    Some(op) => OpinionResolution {
      status:  OpinionStatus::Ended,
      opinion: Some(winner(op)),
    },
    None => OpinionResolution { status: OpinionStatus::None, opinion: None },
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
  }

  fn opinion(start: NaiveDate, end: Option<NaiveDate>, modified_secs: i64) -> Opinion {
    Opinion {
      opinion_id:  Uuid::new_v4(),
      uid:         "alice".into(),
      period:      Period::new(start, end).unwrap(),
      modified_at: Utc.timestamp_opt(modified_secs, 0).unwrap(),
    }
  }

  #[test]
  fn no_opinion_is_none() {
    let r = resolve_opinion(&[], d(2025, 1, 10));
    assert_eq!(r.status, OpinionStatus::None);
    assert!(r.opinion.is_none());
  }

  #[test]
  fn covering_opinion_is_in_progress() {
    let op = opinion(d(2025, 1, 1), Some(d(2025, 7, 1)), 1);
    let r = resolve_opinion(std::slice::from_ref(&op), d(2025, 1, 10));
    assert_eq!(r.status, OpinionStatus::InProgress);
    assert_eq!(r.opinion.unwrap().opinion_id, op.opinion_id);
  }

  #[test]
  fn most_recently_modified_overlap_wins() {
    let older = opinion(d(2024, 9, 1), None, 1_000);
    let newer = opinion(d(2025, 1, 1), Some(d(2025, 3, 1)), 2_000);
    let r = resolve_opinion(&[newer.clone(), older], d(2025, 1, 10));
    assert_eq!(r.status, OpinionStatus::InProgress);
    assert_eq!(r.opinion.unwrap().opinion_id, newer.opinion_id);
  }

  #[test]
  fn future_opinion_is_pending_and_past_one_is_ended() {
    let future = opinion(d(2025, 6, 1), None, 1);
    assert_eq!(
      resolve_opinion(&[future], d(2025, 1, 10)).status,
      OpinionStatus::Pending
    );

    let past = opinion(d(2024, 1, 1), Some(d(2024, 6, 1)), 1);
    assert_eq!(
      resolve_opinion(&[past], d(2025, 1, 10)).status,
      OpinionStatus::Ended
    );
  }

  #[test]
  fn stored_state_projects_onto_other_dates() {
    let op = opinion(d(2025, 1, 1), Some(d(2025, 7, 1)), 1);
    let resolution = resolve_opinion(std::slice::from_ref(&op), d(2025, 1, 10));
    let state = OpinionState {
      status: resolution.status,
      opinion: resolution.opinion,
      ..OpinionState::empty("alice")
    };
    assert_eq!(state.status_on(d(2024, 12, 31)), OpinionStatus::Pending);
    assert_eq!(state.status_on(d(2025, 3, 1)), OpinionStatus::InProgress);
    assert_eq!(state.status_on(d(2025, 7, 1)), OpinionStatus::Ended);
    assert_eq!(OpinionState::empty("bob").status_on(d(2025, 1, 1)), OpinionStatus::None);
  }
}
