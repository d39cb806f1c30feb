//! Exam-accommodation decisions: one per (subject, academic year).
//!
//! The decision tracks whether an official accommodation document has to be
//! produced for the year. Its existence and status are derived from the
//! subject's opinion state and active exam accommodations, except for the
//! `Validated` and `Edited` statuses which are set by people.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::IntoStaticStr;
use uuid::Uuid;

use crate::{
  accommodation::Accommodation,
  calendar::AcademicYear,
  opinion::{Opinion, OpinionResolution, OpinionStatus, resolve_opinion},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DecisionStatus {
  /// Waiting for the committee.
  PendingValidation,
  /// Validated by the committee, document not yet produced.
  Validated,
  /// Document produced and published. Never deleted by a recompute.
  Edited,
}

impl DecisionStatus {
  pub fn is_terminal(self) -> bool { matches!(self, Self::Edited) }

  pub fn discriminant(self) -> &'static str { self.into() }

  pub fn from_discriminant(s: &str) -> crate::Result<Self> {
    match s {
      "pending_validation" => Ok(Self::PendingValidation),
      "validated" => Ok(Self::Validated),
      "edited" => Ok(Self::Edited),
      other => Err(crate::Error::UnknownDiscriminant {
        kind:  "decision status",
        value: other.to_string(),
      }),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
  pub decision_id:  Uuid,
  pub uid:          String,
  pub year:         AcademicYear,
  pub status:       DecisionStatus,
  /// Digest of the facts the decision was last derived from.
  pub facts_digest: String,
  pub modified_at:  DateTime<Utc>,
  /// CAS token; 0 until first persisted.
  pub version:      i64,
}

impl Decision {
  pub fn pending(uid: impl Into<String>, year: AcademicYear, facts_digest: String) -> Self {
    Self {
      decision_id: Uuid::new_v4(),
      uid: uid.into(),
      year,
      status: DecisionStatus::PendingValidation,
      facts_digest,
      modified_at: Utc::now(),
      version: 0,
    }
  }
}

// ─── Rule ────────────────────────────────────────────────────────────────────

/// The facts a decision is derived from, evaluated at one reference date.
#[derive(Debug, Clone)]
pub struct DecisionFacts<'a> {
  pub reference_date:      NaiveDate,
  pub opinion:             OpinionResolution,
  pub exam_accommodations: Vec<&'a Accommodation>,
}

impl<'a> DecisionFacts<'a> {
  /// Gather the facts for `year` as seen on `today`.
  pub fn gather(
    year: AcademicYear,
    today: NaiveDate,
    opinions: &[Opinion],
    accommodations: &'a [Accommodation],
  ) -> Self {
    let reference_date = year.reference_date(today);
    let mut exam_accommodations: Vec<&Accommodation> = accommodations
      .iter()
      .filter(|a| a.is_active_exam(reference_date))
      .collect();
    exam_accommodations.sort_by_key(|a| a.accommodation_id);

    Self {
      reference_date,
      opinion: resolve_opinion(opinions, reference_date),
      exam_accommodations,
    }
  }

  /// Whether a decision should exist for these facts.
  pub fn qualifies(&self) -> bool {
    self.opinion.status == OpinionStatus::InProgress || !self.exam_accommodations.is_empty()
  }

  /// Stable digest over the inputs; order-independent in the accommodations.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.opinion.status.discriminant().as_bytes());
    if let Some(op) = self.opinion.opinion {
      hasher.update(op.opinion_id.as_bytes());
    }
    for a in &self.exam_accommodations {
      hasher.update(a.accommodation_id.as_bytes());
      hasher.update(a.modified_at.timestamp_micros().to_le_bytes());
    }
    hex::encode(hasher.finalize())
  }
}

/// What a recompute must do to the stored decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionPlan {
  /// Nothing to write.
  Keep,
  /// No decision yet; create one pending validation.
  Create { facts_digest: String },
  /// The facts changed since the decision was derived; a fresh decision is
  /// needed, so it goes back to pending validation.
  Refresh { facts_digest: String },
  /// The decision no longer has a reason to exist.
  Delete,
}

pub fn plan_decision(existing: Option<&Decision>, facts: &DecisionFacts<'_>) -> DecisionPlan {
  if !facts.qualifies() {
    return match existing {
      Some(d) if !d.status.is_terminal() => DecisionPlan::Delete,
      _ => DecisionPlan::Keep,
    };
  }

  let facts_digest = facts.digest();
  match existing {
    None => DecisionPlan::Create { facts_digest },
    Some(d) if d.facts_digest == facts_digest => DecisionPlan::Keep,
    Some(_) => DecisionPlan::Refresh { facts_digest },
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::{accommodation::AccommodationDomain, calendar::Period};

  fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
  }

  fn opinion(start: NaiveDate) -> Opinion {
    Opinion {
      opinion_id:  Uuid::new_v4(),
      uid:         "alice".into(),
      period:      Period::open(start),
      modified_at: Utc.timestamp_opt(1_000, 0).unwrap(),
    }
  }

  fn exam(start: NaiveDate) -> Accommodation {
    Accommodation {
      accommodation_id: Uuid::new_v4(),
      uid:              "alice".into(),
      domain:           AccommodationDomain::Exam,
      label:            "extra time".into(),
      period:           Period::open(start),
      modified_at:      Utc.timestamp_opt(1_000, 0).unwrap(),
    }
  }

  const YEAR: AcademicYear = AcademicYear::new(2024);

  #[test]
  fn nothing_qualifying_and_no_decision_keeps() {
    let facts = DecisionFacts::gather(YEAR, d(2025, 1, 10), &[], &[]);
    assert_eq!(plan_decision(None, &facts), DecisionPlan::Keep);
  }

  #[test]
  fn opinion_in_progress_creates() {
    let opinions = [opinion(d(2025, 1, 10))];
    let facts = DecisionFacts::gather(YEAR, d(2025, 1, 10), &opinions, &[]);
    assert!(matches!(plan_decision(None, &facts), DecisionPlan::Create { .. }));
  }

  #[test]
  fn non_exam_accommodation_does_not_qualify() {
    let mut acc = exam(d(2024, 9, 1));
    acc.domain = AccommodationDomain::Pedagogical;
    let facts = DecisionFacts::gather(YEAR, d(2025, 1, 10), &[], std::slice::from_ref(&acc));
    assert!(!facts.qualifies());
  }

  #[test]
  fn edited_decision_is_never_deleted() {
    let facts = DecisionFacts::gather(YEAR, d(2025, 1, 10), &[], &[]);
    let mut decision = Decision::pending("alice", YEAR, "x".into());
    decision.status = DecisionStatus::Edited;
    assert_eq!(plan_decision(Some(&decision), &facts), DecisionPlan::Keep);

    decision.status = DecisionStatus::Validated;
    assert_eq!(plan_decision(Some(&decision), &facts), DecisionPlan::Delete);
  }

  #[test]
  fn unchanged_facts_keep_and_changed_facts_refresh() {
    let accs = [exam(d(2024, 9, 1))];
    let facts = DecisionFacts::gather(YEAR, d(2025, 1, 10), &[], &accs);
    let mut decision = Decision::pending("alice", YEAR, facts.digest());
    decision.status = DecisionStatus::Edited;
    assert_eq!(plan_decision(Some(&decision), &facts), DecisionPlan::Keep);

    let more = [accs[0].clone(), exam(d(2024, 10, 1))];
    let facts = DecisionFacts::gather(YEAR, d(2025, 1, 10), &[], &more);
    assert!(matches!(
      plan_decision(Some(&decision), &facts),
      DecisionPlan::Refresh { .. }
    ));
  }

  #[test]
  fn past_year_is_evaluated_at_its_start() {
    let accs = [exam(d(2025, 1, 1))];
    let facts = DecisionFacts::gather(YEAR, d(2026, 3, 1), &[], &accs);
    assert_eq!(facts.reference_date, d(2024, 9, 1));
    assert!(!facts.qualifies());
  }

  #[test]
  fn digest_ignores_accommodation_order() {
    let a = exam(d(2024, 9, 1));
    let b = exam(d(2024, 9, 2));
    let one = [a.clone(), b.clone()];
    let two = [b, a];
    let today = d(2025, 1, 10);
    assert_eq!(
      DecisionFacts::gather(YEAR, today, &[], &one).digest(),
      DecisionFacts::gather(YEAR, today, &[], &two).digest()
    );
  }
}
