//! Subjects and the period-bounded facts that feed the role computation.
//!
//! A subject is identified by its external `uid` (directory login), which
//! never changes once the subject exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoStaticStr};
use uuid::Uuid;

use crate::calendar::Period;

/// A user or other principal whose derived state is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
  pub uid:          String,
  pub display_name: String,
  pub created_at:   DateTime<Utc>,
  /// Platform administrator.
  pub admin:        bool,
  /// Declared member of the accessibility team.
  pub manager:      bool,
  /// Temporary reinforcement staff.
  pub renfort:      bool,
  /// Services the subject belongs to. Entries may dangle if a service was
  /// removed; the role computation ignores those.
  pub services:     Vec<Uuid>,
}

impl Subject {
  pub fn new(uid: impl Into<String>, display_name: impl Into<String>) -> Self {
    Self {
      uid:          uid.into(),
      display_name: display_name.into(),
      created_at:   Utc::now(),
      admin:        false,
      manager:      false,
      renfort:      false,
      services:     Vec::new(),
    }
  }
}

/// An organisational unit whose members manage accommodations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
  pub service_id: Uuid,
  pub name:       String,
  pub active:     bool,
}

// ─── Assignments ─────────────────────────────────────────────────────────────

/// What a period-bounded assignment makes the subject.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AssignmentKind {
  /// Seat on the accommodation committee.
  Committee,
  /// Beneficiary profile (the subject receives accommodations).
  Beneficiary,
  /// Intervenant (note-taker, tutor, ...) assigned to beneficiaries.
  Intervention,
}

impl AssignmentKind {
  pub fn discriminant(self) -> &'static str { self.into() }

  pub fn from_discriminant(s: &str) -> crate::Result<Self> {
    match s {
      "committee" => Ok(Self::Committee),
      "beneficiary" => Ok(Self::Beneficiary),
      "intervention" => Ok(Self::Intervention),
      other => Err(crate::Error::UnknownDiscriminant {
        kind:  "assignment kind",
        value: other.to_string(),
      }),
    }
  }
}

/// A role-relevant fact about a subject that only holds during `period`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
  pub assignment_id: Uuid,
  pub uid:           String,
  pub kind:          AssignmentKind,
  /// Free text: committee name, beneficiary profile, intervention type.
  pub label:         String,
  pub period:        Period,
}
