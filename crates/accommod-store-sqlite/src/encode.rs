//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, calendar dates ISO 8601 (`YYYY-MM-DD`),
//! UUIDs hyphenated lowercase, lists compact JSON.

use std::collections::BTreeSet;

use accommod_core::{
  accommodation::{Accommodation, AccommodationDomain},
  calendar::{AcademicYear, Period},
  decision::{Decision, DecisionStatus},
  opinion::{Opinion, OpinionRef, OpinionState, OpinionStatus},
  request::{Answer, Request, RequestState},
  role::{Role, RoleSet},
  subject::{Assignment, AssignmentKind, Subject},
};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_period(start: &str, end: Option<&str>) -> Result<Period> {
  let start = decode_date(start)?;
  let end = end.map(decode_date).transpose()?;
  Ok(Period::new(start, end)?)
}

pub fn encode_uuids(ids: &[Uuid]) -> Result<String> { Ok(serde_json::to_string(ids)?) }

pub fn encode_roles(roles: &BTreeSet<Role>) -> Result<String> {
  Ok(serde_json::to_string(roles)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `subjects` row.
pub struct RawSubject {
  pub uid:          String,
  pub display_name: String,
  pub created_at:   String,
  pub admin:        bool,
  pub manager:      bool,
  pub renfort:      bool,
  pub services:     String,
}

impl RawSubject {
  pub const COLUMNS: &'static str =
    "uid, display_name, created_at, admin, manager, renfort, services";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      uid:          row.get(0)?,
      display_name: row.get(1)?,
      created_at:   row.get(2)?,
      admin:        row.get(3)?,
      manager:      row.get(4)?,
      renfort:      row.get(5)?,
      services:     row.get(6)?,
    })
  }

  pub fn into_subject(self) -> Result<Subject> {
    Ok(Subject {
      uid:          self.uid,
      display_name: self.display_name,
      created_at:   decode_dt(&self.created_at)?,
      admin:        self.admin,
      manager:      self.manager,
      renfort:      self.renfort,
      services:     serde_json::from_str(&self.services)?,
    })
  }
}

pub struct RawAssignment {
  pub assignment_id: String,
  pub uid:           String,
  pub kind:          String,
  pub label:         String,
  pub start_date:    String,
  pub end_date:      Option<String>,
}

impl RawAssignment {
  pub const COLUMNS: &'static str = "assignment_id, uid, kind, label, start_date, end_date";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      assignment_id: row.get(0)?,
      uid:           row.get(1)?,
      kind:          row.get(2)?,
      label:         row.get(3)?,
      start_date:    row.get(4)?,
      end_date:      row.get(5)?,
    })
  }

  pub fn into_assignment(self) -> Result<Assignment> {
    Ok(Assignment {
      assignment_id: decode_uuid(&self.assignment_id)?,
      uid:           self.uid,
      kind:          AssignmentKind::from_discriminant(&self.kind)?,
      label:         self.label,
      period:        decode_period(&self.start_date, self.end_date.as_deref())?,
    })
  }
}

pub struct RawRequest {
  pub request_id:         String,
  pub uid:                String,
  pub state:              String,
  pub required_questions: String,
  pub modified_at:        String,
  pub version:            i64,
}

impl RawRequest {
  pub const COLUMNS: &'static str =
    "request_id, uid, state, required_questions, modified_at, version";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      request_id:         row.get(0)?,
      uid:                row.get(1)?,
      state:              row.get(2)?,
      required_questions: row.get(3)?,
      modified_at:        row.get(4)?,
      version:            row.get(5)?,
    })
  }

  pub fn into_request(self) -> Result<Request> {
    Ok(Request {
      request_id:         decode_uuid(&self.request_id)?,
      uid:                self.uid,
      state:              RequestState::from_discriminant(&self.state)?,
      required_questions: serde_json::from_str(&self.required_questions)?,
      modified_at:        decode_dt(&self.modified_at)?,
      version:            self.version,
    })
  }
}

pub struct RawAnswer {
  pub request_id:   String,
  pub question_id:  String,
  pub value_json:   String,
  pub submitted_at: String,
}

impl RawAnswer {
  pub fn into_answer(self) -> Result<Answer> {
    Ok(Answer {
      request_id:   decode_uuid(&self.request_id)?,
      question_id:  self.question_id,
      value:        serde_json::from_str(&self.value_json)?,
      submitted_at: decode_dt(&self.submitted_at)?,
    })
  }
}

pub struct RawOpinion {
  pub opinion_id:  String,
  pub uid:         String,
  pub start_date:  String,
  pub end_date:    Option<String>,
  pub modified_at: String,
}

impl RawOpinion {
  pub const COLUMNS: &'static str = "opinion_id, uid, start_date, end_date, modified_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      opinion_id:  row.get(0)?,
      uid:         row.get(1)?,
      start_date:  row.get(2)?,
      end_date:    row.get(3)?,
      modified_at: row.get(4)?,
    })
  }

  pub fn into_opinion(self) -> Result<Opinion> {
    Ok(Opinion {
      opinion_id:  decode_uuid(&self.opinion_id)?,
      uid:         self.uid,
      period:      decode_period(&self.start_date, self.end_date.as_deref())?,
      modified_at: decode_dt(&self.modified_at)?,
    })
  }
}

pub struct RawAccommodation {
  pub accommodation_id: String,
  pub uid:              String,
  pub domain:           String,
  pub label:            String,
  pub start_date:       String,
  pub end_date:         Option<String>,
  pub modified_at:      String,
}

impl RawAccommodation {
  pub const COLUMNS: &'static str =
    "accommodation_id, uid, domain, label, start_date, end_date, modified_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      accommodation_id: row.get(0)?,
      uid:              row.get(1)?,
      domain:           row.get(2)?,
      label:            row.get(3)?,
      start_date:       row.get(4)?,
      end_date:         row.get(5)?,
      modified_at:      row.get(6)?,
    })
  }

  pub fn into_accommodation(self) -> Result<Accommodation> {
    Ok(Accommodation {
      accommodation_id: decode_uuid(&self.accommodation_id)?,
      uid:              self.uid,
      domain:           AccommodationDomain::from_discriminant(&self.domain)?,
      label:            self.label,
      period:           decode_period(&self.start_date, self.end_date.as_deref())?,
      modified_at:      decode_dt(&self.modified_at)?,
    })
  }
}

pub struct RawRoleSet {
  pub uid:         String,
  pub roles:       String,
  pub computed_at: String,
  pub version:     i64,
}

impl RawRoleSet {
  pub fn into_role_set(self) -> Result<RoleSet> {
    Ok(RoleSet {
      uid:         self.uid,
      roles:       serde_json::from_str(&self.roles)?,
      computed_at: decode_dt(&self.computed_at)?,
      version:     self.version,
    })
  }
}

pub struct RawOpinionState {
  pub uid:           String,
  pub status:        String,
  pub opinion_id:    Option<String>,
  pub opinion_start: Option<String>,
  pub opinion_end:   Option<String>,
  pub computed_at:   String,
  pub version:       i64,
}

impl RawOpinionState {
  pub fn into_state(self) -> Result<OpinionState> {
    let opinion = match (self.opinion_id, self.opinion_start) {
      (Some(id), Some(start)) => Some(OpinionRef {
        opinion_id: decode_uuid(&id)?,
        period:     decode_period(&start, self.opinion_end.as_deref())?,
      }),
      _ => None,
    };
    Ok(OpinionState {
      uid: self.uid,
      status: OpinionStatus::from_discriminant(&self.status)?,
      opinion,
      computed_at: decode_dt(&self.computed_at)?,
      version: self.version,
    })
  }
}

pub struct RawDecision {
  pub decision_id:  String,
  pub uid:          String,
  pub start_year:   i32,
  pub status:       String,
  pub facts_digest: String,
  pub modified_at:  String,
  pub version:      i64,
}

impl RawDecision {
  pub const COLUMNS: &'static str =
    "decision_id, uid, start_year, status, facts_digest, modified_at, version";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      decision_id:  row.get(0)?,
      uid:          row.get(1)?,
      start_year:   row.get(2)?,
      status:       row.get(3)?,
      facts_digest: row.get(4)?,
      modified_at:  row.get(5)?,
      version:      row.get(6)?,
    })
  }

  pub fn into_decision(self) -> Result<Decision> {
    Ok(Decision {
      decision_id:  decode_uuid(&self.decision_id)?,
      uid:          self.uid,
      year:         AcademicYear::new(self.start_year),
      status:       DecisionStatus::from_discriminant(&self.status)?,
      facts_digest: self.facts_digest,
      modified_at:  decode_dt(&self.modified_at)?,
      version:      self.version,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dates_roundtrip_as_iso() {
    let d = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
    assert_eq!(encode_date(d), "2024-09-01");
    assert_eq!(decode_date("2024-09-01").unwrap(), d);
    assert!(decode_date("01/09/2024").is_err());
  }

  #[test]
  fn inverted_period_is_rejected_on_read() {
    assert!(decode_period("2025-01-02", Some("2025-01-01")).is_err());
  }
}
