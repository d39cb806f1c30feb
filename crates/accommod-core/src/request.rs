//! Accommodation requests and questionnaire answers.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestState {
  /// The applicant is still filling in the questionnaire.
  Draft,
  /// Every required question is answered; waiting for the team.
  Received,
  Validated,
  Rejected,
  Cancelled,
}

impl RequestState {
  pub fn discriminant(self) -> &'static str { self.into() }

  pub fn from_discriminant(s: &str) -> crate::Result<Self> {
    match s {
      "draft" => Ok(Self::Draft),
      "received" => Ok(Self::Received),
      "validated" => Ok(Self::Validated),
      "rejected" => Ok(Self::Rejected),
      "cancelled" => Ok(Self::Cancelled),
      other => Err(crate::Error::UnknownDiscriminant {
        kind:  "request state",
        value: other.to_string(),
      }),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
  pub request_id:         Uuid,
  pub uid:                String,
  pub state:              RequestState,
  /// Question codes that must be answered before the request is received.
  pub required_questions: Vec<String>,
  pub modified_at:        DateTime<Utc>,
  /// CAS token; 0 until first persisted.
  pub version:            i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
  pub request_id:   Uuid,
  pub question_id:  String,
  pub value:        serde_json::Value,
  pub submitted_at: DateTime<Utc>,
}

/// The state `request` should move to given its current answers, if any.
///
/// Only drafts progress automatically; every later transition is an explicit
/// team action.
pub fn next_state(request: &Request, answers: &[Answer]) -> Option<RequestState> {
  if request.state != RequestState::Draft {
    return None;
  }
  let answered: HashSet<&str> = answers
    .iter()
    .filter(|a| a.request_id == request.request_id && !a.value.is_null())
    .map(|a| a.question_id.as_str())
    .collect();
  request
    .required_questions
    .iter()
    .all(|q| answered.contains(q.as_str()))
    .then_some(RequestState::Received)
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn request(required: &[&str]) -> Request {
    Request {
      request_id:         Uuid::new_v4(),
      uid:                "alice".into(),
      state:              RequestState::Draft,
      required_questions: required.iter().map(|q| q.to_string()).collect(),
      modified_at:        Utc::now(),
      version:            1,
    }
  }

  fn answer(request: &Request, question: &str, value: serde_json::Value) -> Answer {
    Answer {
      request_id:   request.request_id,
      question_id:  question.into(),
      value,
      submitted_at: Utc::now(),
    }
  }

  #[test]
  fn draft_with_all_answers_is_received() {
    let r = request(&["q1", "q2"]);
    let answers = vec![answer(&r, "q1", json!("yes")), answer(&r, "q2", json!(3))];
    assert_eq!(next_state(&r, &answers), Some(RequestState::Received));
  }

  #[test]
  fn missing_or_null_answer_keeps_draft() {
    let r = request(&["q1", "q2"]);
    let answers = vec![answer(&r, "q1", json!("yes")), answer(&r, "q2", json!(null))];
    assert_eq!(next_state(&r, &answers), None);
  }

  #[test]
  fn non_draft_never_progresses() {
    let mut r = request(&[]);
    r.state = RequestState::Validated;
    assert_eq!(next_state(&r, &[]), None);
  }
}
