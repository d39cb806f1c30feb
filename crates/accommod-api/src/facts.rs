//! Handlers for the source facts derived state is computed from.
//!
//! | Method   | Path | Publishes |
//! |----------|------|-----------|
//! | `PUT`    | `/assignments/:id` | `RoleAssignmentChanged` |
//! | `DELETE` | `/assignments/:id` | `RoleAssignmentChanged` |
//! | `PUT`    | `/opinions/:id` | `OpinionModified` |
//! | `DELETE` | `/opinions/:id` | `OpinionModified` |
//! | `PUT`    | `/accommodations/:id` | `AccommodationModified` |
//! | `DELETE` | `/accommodations/:id` | `AccommodationModified` |
//!
//! Every write returns as soon as the fact is stored and the event journaled.

use accommod_core::{
  accommodation::{Accommodation, AccommodationDomain},
  calendar::Period,
  event::{AssignmentCause, DomainEvent},
  opinion::Opinion,
  subject::{Assignment, AssignmentKind},
};
use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, Backend, Result, error::ApiError};

async fn require_subject<S: Backend>(state: &AppState<S>, uid: &str) -> Result<()> {
  state
    .store
    .find_subject(uid)
    .await
    .map_err(ApiError::store)?
    .map(|_| ())
    .ok_or_else(|| ApiError::NotFound(format!("user {uid} not found")))
}

fn cause_of(kind: AssignmentKind) -> AssignmentCause {
  match kind {
    AssignmentKind::Committee => AssignmentCause::Committee,
    AssignmentKind::Beneficiary => AssignmentCause::Profile,
    AssignmentKind::Intervention => AssignmentCause::Intervention,
  }
}

// ─── Assignments ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AssignmentBody {
  pub uid:   String,
  pub kind:  AssignmentKind,
  #[serde(default)]
  pub label: String,
  pub start: NaiveDate,
  pub end:   Option<NaiveDate>,
}

/// `PUT /assignments/:id`
pub async fn put_assignment<S: Backend>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<AssignmentBody>,
) -> Result<Json<Assignment>> {
  let period = Period::new(body.start, body.end)?;
  require_subject(&state, &body.uid).await?;

  // Moving an assignment to another subject changes both.
  let previous = state.store.find_assignment(id).await.map_err(ApiError::store)?;

  let assignment = Assignment {
    assignment_id: id,
    uid: body.uid,
    kind: body.kind,
    label: body.label,
    period,
  };
  state.store.save_assignment(&assignment).await.map_err(ApiError::store)?;

  if let Some(previous) = previous
    && previous.uid != assignment.uid
  {
    state
      .publisher
      .publish(DomainEvent::RoleAssignmentChanged {
        uid:   previous.uid,
        cause: cause_of(previous.kind),
      })
      .await?;
  }
  state
    .publisher
    .publish(DomainEvent::RoleAssignmentChanged {
      uid:   assignment.uid.clone(),
      cause: cause_of(assignment.kind),
    })
    .await?;

  Ok(Json(assignment))
}

/// `DELETE /assignments/:id`
pub async fn delete_assignment<S: Backend>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode> {
  let assignment = state
    .store
    .find_assignment(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("assignment {id} not found")))?;

  state.store.remove_assignment(id).await.map_err(ApiError::store)?;
  state
    .publisher
    .publish(DomainEvent::RoleAssignmentChanged {
      uid:   assignment.uid,
      cause: cause_of(assignment.kind),
    })
    .await?;

  Ok(StatusCode::NO_CONTENT)
}

// ─── Opinions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct OpinionBody {
  pub uid:   String,
  pub start: NaiveDate,
  pub end:   Option<NaiveDate>,
}

/// `PUT /opinions/:id`
pub async fn put_opinion<S: Backend>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<OpinionBody>,
) -> Result<Json<Opinion>> {
  let period = Period::new(body.start, body.end)?;
  require_subject(&state, &body.uid).await?;

  let previous = state.store.find_opinion(id).await.map_err(ApiError::store)?;
  let opinion = Opinion {
    opinion_id: id,
    uid: body.uid,
    period,
    modified_at: Utc::now(),
  };
  state.store.save_opinion(&opinion).await.map_err(ApiError::store)?;

  if let Some(previous) = previous
    && previous.uid != opinion.uid
  {
    state
      .publisher
      .publish(DomainEvent::OpinionModified { opinion_id: id, uid: previous.uid })
      .await?;
  }
  state
    .publisher
    .publish(DomainEvent::OpinionModified { opinion_id: id, uid: opinion.uid.clone() })
    .await?;

  Ok(Json(opinion))
}

/// `DELETE /opinions/:id`
pub async fn delete_opinion<S: Backend>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode> {
  let opinion = state
    .store
    .find_opinion(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("opinion {id} not found")))?;

  state.store.remove_opinion(id).await.map_err(ApiError::store)?;
  state
    .publisher
    .publish(DomainEvent::OpinionModified { opinion_id: id, uid: opinion.uid })
    .await?;

  Ok(StatusCode::NO_CONTENT)
}

// ─── Accommodations ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AccommodationBody {
  pub uid:    String,
  pub domain: AccommodationDomain,
  pub label:  String,
  pub start:  NaiveDate,
  pub end:    Option<NaiveDate>,
}

/// `PUT /accommodations/:id`
pub async fn put_accommodation<S: Backend>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<AccommodationBody>,
) -> Result<Json<Accommodation>> {
  let period = Period::new(body.start, body.end)?;
  require_subject(&state, &body.uid).await?;

  let previous = state.store.find_accommodation(id).await.map_err(ApiError::store)?;
  let accommodation = Accommodation {
    accommodation_id: id,
    uid: body.uid,
    domain: body.domain,
    label: body.label,
    period,
    modified_at: Utc::now(),
  };
  state
    .store
    .save_accommodation(&accommodation)
    .await
    .map_err(ApiError::store)?;

  // Leaving the exam domain matters as much as entering it.
  let was_exam = previous
    .as_ref()
    .is_some_and(|p| p.domain == AccommodationDomain::Exam);
  let impacts_decision = was_exam || accommodation.domain == AccommodationDomain::Exam;

  if let Some(previous) = previous
    && previous.uid != accommodation.uid
  {
    state
      .publisher
      .publish(DomainEvent::AccommodationModified {
        accommodation_id: id,
        uid: previous.uid,
        impacts_decision,
      })
      .await?;
  }
  state
    .publisher
    .publish(DomainEvent::AccommodationModified {
      accommodation_id: id,
      uid: accommodation.uid.clone(),
      impacts_decision,
    })
    .await?;

  Ok(Json(accommodation))
}

/// `DELETE /accommodations/:id`
pub async fn delete_accommodation<S: Backend>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode> {
  let accommodation = state
    .store
    .find_accommodation(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("accommodation {id} not found")))?;

  state
    .store
    .remove_accommodation(id)
    .await
    .map_err(ApiError::store)?;
  state
    .publisher
    .publish(DomainEvent::AccommodationModified {
      accommodation_id: id,
      uid:              accommodation.uid,
      impacts_decision: accommodation.domain == AccommodationDomain::Exam,
    })
    .await?;

  Ok(StatusCode::NO_CONTENT)
}
