//! Handlers for `/users/:uid/decisions` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/users/:uid/decisions` | Every year, oldest first; cached |
//! | `GET`  | `/users/:uid/decisions/:year` | `:year` is `2024` or `2024-2025`; cached |
//! | `POST` | `/users/:uid/decisions/:year/status` | Body: `{"status":"validated"}` |

use accommod_core::{
  calendar::AcademicYear,
  decision::{Decision, DecisionStatus},
  event::{DomainEvent, Resource},
  store::DerivedWrite,
};
use accommod_engine::accessors::DerivedState;
use axum::{
  Json,
  extract::{Path, State},
  http::HeaderMap,
  response::Response,
};
use chrono::Utc;
use serde::Deserialize;

use crate::{AppState, Backend, Result, cached, error::ApiError};

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /users/:uid/decisions`
pub async fn list<S: Backend>(
  State(state): State<AppState<S>>,
  Path(uid): Path<String>,
  headers: HeaderMap,
) -> Result<Response> {
  let collection = Resource::Decision { uid: uid.clone(), year: AcademicYear::current(state.clock.today()) }
    .collection_iri();
  let store = state.store.clone();

  cached::serve(&state.cache, &headers, collection.clone(), move || async move {
    let decisions = DerivedState::new(store).decisions(&uid).await?;
    let tags = std::iter::once(collection)
      .chain(decisions.iter().map(|d| Resource::Decision { uid: uid.clone(), year: d.year }.iri()))
      .collect();
    Ok((decisions, tags))
  })
  .await
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /users/:uid/decisions/:year`
pub async fn get_one<S: Backend>(
  State(state): State<AppState<S>>,
  Path((uid, year)): Path<(String, String)>,
  headers: HeaderMap,
) -> Result<Response> {
  let year: AcademicYear = year.parse()?;
  let resource = Resource::Decision { uid: uid.clone(), year };
  let store = state.store.clone();

  cached::serve(&state.cache, &headers, resource.iri(), move || async move {
    let decision = DerivedState::new(store)
      .current_decision(&uid, year)
      .await?
      .ok_or_else(|| ApiError::NotFound(format!("no decision for {uid} in {year}")))?;
    Ok((decision, vec![resource.iri()]))
  })
  .await
}

// ─── Status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StatusBody {
  pub status: DecisionStatus,
}

/// `POST /users/:uid/decisions/:year/status`
///
/// The external validation and editing workflow. An `edited` decision is
/// never deleted by a recompute.
pub async fn set_status<S: Backend>(
  State(state): State<AppState<S>>,
  Path((uid, year)): Path<(String, String)>,
  Json(body): Json<StatusBody>,
) -> Result<Json<Decision>> {
  let year: AcademicYear = year.parse()?;
  let decision = state
    .store
    .find_decision(&uid, year)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("no decision for {uid} in {year}")))?;

  if decision.status == body.status {
    return Ok(Json(decision));
  }

  let updated = Decision { status: body.status, modified_at: Utc::now(), ..decision };
  let events = vec![
    DomainEvent::ResourceModified { resource: Resource::Decision { uid: uid.clone(), year } },
    DomainEvent::ResourceModified { resource: Resource::User { uid: uid.clone() } },
  ];
  if !state.commit(DerivedWrite::Decision(updated.clone()), events).await? {
    return Err(ApiError::Conflict(format!("decision for {uid} in {year} was modified concurrently")));
  }
  tracing::info!(%uid, %year, status = ?updated.status, "decision status set");

  Ok(Json(Decision { version: updated.version + 1, ..updated }))
}
