//! Versioned writes of derived rows, encoded up front so they can run on the
//! connection thread either alone or inside an outbox transaction.

use accommod_core::{
  decision::Decision,
  opinion::OpinionState,
  request::Request,
  role::RoleSet,
  store::DerivedWrite,
};
use rusqlite::Connection;

use crate::{
  Result,
  encode::{encode_date, encode_dt, encode_roles, encode_uuid},
};

/// A [`DerivedWrite`] with every column already encoded.
pub(crate) enum EncodedWrite {
  RoleSet {
    uid:         String,
    roles:       String,
    computed_at: String,
    version:     i64,
  },
  OpinionState {
    uid:           String,
    status:        &'static str,
    opinion_id:    Option<String>,
    opinion_start: Option<String>,
    opinion_end:   Option<String>,
    computed_at:   String,
    version:       i64,
  },
  Decision {
    id:          String,
    uid:         String,
    start_year:  i32,
    status:      &'static str,
    digest:      String,
    modified_at: String,
    version:     i64,
  },
  RemoveDecision {
    id:      String,
    version: i64,
  },
  Request {
    id:          String,
    uid:         String,
    state:       &'static str,
    required:    String,
    modified_at: String,
    version:     i64,
  },
}

impl EncodedWrite {
  pub(crate) fn encode(write: &DerivedWrite) -> Result<Self> {
    Ok(match write {
      DerivedWrite::RoleSet(role_set) => Self::role_set(role_set)?,
      DerivedWrite::OpinionState(state) => Self::opinion_state(state),
      DerivedWrite::Decision(decision) => Self::decision(decision),
      DerivedWrite::RemoveDecision(decision) => Self::remove_decision(decision),
      DerivedWrite::Request(request) => Self::request(request)?,
    })
  }

  pub(crate) fn role_set(role_set: &RoleSet) -> Result<Self> {
    Ok(Self::RoleSet {
      uid:         role_set.uid.clone(),
      roles:       encode_roles(&role_set.roles)?,
      computed_at: encode_dt(role_set.computed_at),
      version:     role_set.version,
    })
  }

  pub(crate) fn opinion_state(state: &OpinionState) -> Self {
    Self::OpinionState {
      uid:           state.uid.clone(),
      status:        state.status.discriminant(),
      opinion_id:    state.opinion.map(|op| encode_uuid(op.opinion_id)),
      opinion_start: state.opinion.map(|op| encode_date(op.period.start)),
      opinion_end:   state.opinion.and_then(|op| op.period.end).map(encode_date),
      computed_at:   encode_dt(state.computed_at),
      version:       state.version,
    }
  }

  pub(crate) fn decision(decision: &Decision) -> Self {
    Self::Decision {
      id:          encode_uuid(decision.decision_id),
      uid:         decision.uid.clone(),
      start_year:  decision.year.start_year(),
      status:      decision.status.discriminant(),
      digest:      decision.facts_digest.clone(),
      modified_at: encode_dt(decision.modified_at),
      version:     decision.version,
    }
  }

  pub(crate) fn remove_decision(decision: &Decision) -> Self {
    Self::RemoveDecision { id: encode_uuid(decision.decision_id), version: decision.version }
  }

  pub(crate) fn request(request: &Request) -> Result<Self> {
    Ok(Self::Request {
      id:          encode_uuid(request.request_id),
      uid:         request.uid.clone(),
      state:       request.state.discriminant(),
      required:    serde_json::to_string(&request.required_questions)?,
      modified_at: encode_dt(request.modified_at),
      version:     request.version,
    })
  }

  /// Run the write. A version of 0 inserts; any other version must match the
  /// stored one. Returns whether a row changed.
  pub(crate) fn apply(&self, conn: &Connection) -> rusqlite::Result<bool> {
    let changed = match self {
      Self::RoleSet { uid, roles, computed_at, version: 0 } => conn.execute(
        "INSERT OR IGNORE INTO role_sets (uid, roles, computed_at, version)
         VALUES (?1, ?2, ?3, 1)",
        rusqlite::params![uid, roles, computed_at],
      )?,
      Self::RoleSet { uid, roles, computed_at, version } => conn.execute(
        "UPDATE role_sets SET roles = ?2, computed_at = ?3, version = version + 1
         WHERE uid = ?1 AND version = ?4",
        rusqlite::params![uid, roles, computed_at, version],
      )?,

      Self::OpinionState {
        uid,
        status,
        opinion_id,
        opinion_start,
        opinion_end,
        computed_at,
        version: 0,
      } => conn.execute(
        "INSERT OR IGNORE INTO opinion_states
           (uid, status, opinion_id, opinion_start, opinion_end, computed_at, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
        rusqlite::params![uid, status, opinion_id, opinion_start, opinion_end, computed_at],
      )?,
      Self::OpinionState {
        uid,
        status,
        opinion_id,
        opinion_start,
        opinion_end,
        computed_at,
        version,
      } => conn.execute(
        "UPDATE opinion_states
         SET status = ?2, opinion_id = ?3, opinion_start = ?4, opinion_end = ?5,
             computed_at = ?6, version = version + 1
         WHERE uid = ?1 AND version = ?7",
        rusqlite::params![
          uid,
          status,
          opinion_id,
          opinion_start,
          opinion_end,
          computed_at,
          version,
        ],
      )?,

      Self::Decision { id, uid, start_year, status, digest, modified_at, version: 0 } => conn
        .execute(
          "INSERT OR IGNORE INTO decisions
             (decision_id, uid, start_year, status, facts_digest, modified_at, version)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
          rusqlite::params![id, uid, start_year, status, digest, modified_at],
        )?,
      Self::Decision { id, status, digest, modified_at, version, .. } => conn.execute(
        "UPDATE decisions
         SET status = ?2, facts_digest = ?3, modified_at = ?4, version = version + 1
         WHERE decision_id = ?1 AND version = ?5",
        rusqlite::params![id, status, digest, modified_at, version],
      )?,
      Self::RemoveDecision { id, version } => conn.execute(
        "DELETE FROM decisions WHERE decision_id = ?1 AND version = ?2",
        rusqlite::params![id, version],
      )?,

      Self::Request { id, uid, state, required, modified_at, version: 0 } => conn.execute(
        "INSERT OR IGNORE INTO requests
           (request_id, uid, state, required_questions, modified_at, version)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)",
        rusqlite::params![id, uid, state, required, modified_at],
      )?,
      Self::Request { id, uid, state, required, modified_at, version } => conn.execute(
        "UPDATE requests
         SET uid = ?2, state = ?3, required_questions = ?4, modified_at = ?5,
             version = version + 1
         WHERE request_id = ?1 AND version = ?6",
        rusqlite::params![id, uid, state, required, modified_at, version],
      )?,
    };
    Ok(changed == 1)
  }
}
