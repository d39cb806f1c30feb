//! Handlers for `/requests` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/requests/:id` | Cached, 404 if not found |
//! | `PUT`  | `/requests/:id` | Body: [`RequestBody`]; `409` on a concurrent write |
//! | `POST` | `/requests/:id/answers` | Body: [`AnswerBody`]; `202`, progress is asynchronous |

use accommod_core::{
  event::{AssignmentCause, DomainEvent, Resource},
  request::{Answer, Request, RequestState},
  store::DerivedWrite,
};
use axum::{
  Json,
  extract::{Path, State},
  http::{HeaderMap, StatusCode},
  response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, Backend, Result, cached, error::ApiError};

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /requests/:id`
pub async fn get_one<S: Backend>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
  headers: HeaderMap,
) -> Result<Response> {
  let resource = Resource::Request { request_id: id };
  let store = state.store.clone();

  cached::serve(&state.cache, &headers, resource.iri(), move || async move {
    let request = store
      .find_request(id)
      .await
      .map_err(ApiError::store)?
      .ok_or_else(|| ApiError::NotFound(format!("request {id} not found")))?;
    Ok((request, vec![resource.iri()]))
  })
  .await
}

// ─── Upsert ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RequestBody {
  pub uid:                String,
  /// Defaults to the stored state, or `draft` for a new request.
  pub state:              Option<RequestState>,
  #[serde(default)]
  pub required_questions: Vec<String>,
}

/// `PUT /requests/:id`
pub async fn upsert<S: Backend>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<RequestBody>,
) -> Result<impl IntoResponse> {
  state
    .store
    .find_subject(&body.uid)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("user {} not found", body.uid)))?;

  let existing = state.store.find_request(id).await.map_err(ApiError::store)?;
  let created = existing.is_none();
  let request = Request {
    request_id:         id,
    uid:                body.uid,
    state:              body
      .state
      .or(existing.as_ref().map(|r| r.state))
      .unwrap_or(RequestState::Draft),
    required_questions: body.required_questions,
    modified_at:        Utc::now(),
    version:            existing.map_or(0, |r| r.version),
  };

  let events = vec![
    DomainEvent::ResourceModified { resource: Resource::Request { request_id: id } },
    DomainEvent::RoleAssignmentChanged {
      uid:   request.uid.clone(),
      cause: AssignmentCause::RequestState,
    },
  ];
  if !state.commit(DerivedWrite::Request(request.clone()), events).await? {
    return Err(ApiError::Conflict(format!("request {id} was modified concurrently")));
  }
  let request = Request { version: request.version + 1, ..request };

  let status = if created { StatusCode::CREATED } else { StatusCode::OK };
  Ok((status, Json(request)))
}

// ─── Answers ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AnswerBody {
  pub question_id: String,
  pub value:       serde_json::Value,
}

/// `POST /requests/:id/answers`
pub async fn answer<S: Backend>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
  Json(body): Json<AnswerBody>,
) -> Result<StatusCode> {
  let request = state
    .store
    .find_request(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("request {id} not found")))?;

  let answer = Answer {
    request_id:   id,
    question_id:  body.question_id,
    value:        body.value,
    submitted_at: Utc::now(),
  };
  state.store.save_answer(&answer).await.map_err(ApiError::store)?;
  state
    .publisher
    .publish(DomainEvent::QuestionnaireAnswerSubmitted {
      request_id:  id,
      uid:         request.uid,
      question_id: answer.question_id,
    })
    .await?;

  Ok(StatusCode::ACCEPTED)
}
