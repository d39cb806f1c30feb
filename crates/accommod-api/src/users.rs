//! Handlers for `/users` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/users` | Optional `?offset=&limit=`; cached |
//! | `GET`  | `/users/:uid` | Profile plus derived state; cached, 404 if not found |
//! | `PUT`  | `/users/:uid` | Body: [`UserBody`]; 201 when created |

use std::collections::BTreeSet;

use accommod_core::{
  calendar::AcademicYear,
  decision::Decision,
  event::{DomainEvent, Resource},
  opinion::{OpinionRef, OpinionStatus},
  role::Role,
  store::Page,
  subject::Subject,
};
use accommod_engine::accessors::DerivedState;
use axum::{
  Json,
  extract::{Path, Query, State},
  http::{HeaderMap, StatusCode},
  response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, Backend, Result, cached, error::ApiError};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  #[serde(default)]
  pub offset: usize,
  pub limit:  Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
  pub uid:          String,
  pub display_name: String,
  pub primary_role: Role,
}

/// `GET /users[?offset=<n>&limit=<n>]`
pub async fn list<S: Backend>(
  State(state): State<AppState<S>>,
  Query(params): Query<ListParams>,
  headers: HeaderMap,
) -> Result<Response> {
  let page = Page {
    offset: params.offset,
    limit:  params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
  };
  let key = format!("/users?offset={}&limit={}", page.offset, page.limit);
  let store = state.store.clone();

  cached::serve(&state.cache, &headers, key, move || async move {
    let subjects = store.list_subjects(page).await.map_err(ApiError::store)?;
    let derived = DerivedState::new(store);

    let mut tags = vec![Resource::User { uid: String::new() }.collection_iri()];
    let mut summaries = Vec::with_capacity(subjects.len());
    for subject in subjects {
      let roles = derived.current_role_set(&subject.uid).await?;
      tags.push(Resource::User { uid: subject.uid.clone() }.iri());
      summaries.push(UserSummary {
        primary_role: roles.primary(),
        uid:          subject.uid,
        display_name: subject.display_name,
      });
    }
    Ok((summaries, tags))
  })
  .await
}

// ─── Get one ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct OpinionView {
  pub status:  OpinionStatus,
  pub opinion: Option<OpinionRef>,
}

/// A subject with everything derived from its facts.
#[derive(Debug, Serialize)]
pub struct UserView {
  #[serde(flatten)]
  pub subject:      Subject,
  pub roles:        BTreeSet<Role>,
  pub primary_role: Role,
  pub opinion:      OpinionView,
  pub decisions:    Vec<Decision>,
}

/// `GET /users/:uid`
pub async fn get_one<S: Backend>(
  State(state): State<AppState<S>>,
  Path(uid): Path<String>,
  headers: HeaderMap,
) -> Result<Response> {
  let resource = Resource::User { uid: uid.clone() };
  let store = state.store.clone();
  let today = state.clock.today();

  cached::serve(&state.cache, &headers, resource.iri(), move || async move {
    let subject = store
      .find_subject(&uid)
      .await
      .map_err(ApiError::store)?
      .ok_or_else(|| ApiError::NotFound(format!("user {uid} not found")))?;

    let derived = DerivedState::new(store.clone());
    let role_set = derived.current_role_set(&uid).await?;
    let status = derived.current_opinion_state(&uid, today).await?;
    let opinion = store
      .find_opinion_state(&uid)
      .await
      .map_err(ApiError::store)?
      .and_then(|s| s.opinion);
    let decisions = derived.decisions(&uid).await?;

    let view = UserView {
      subject,
      primary_role: role_set.primary(),
      roles: role_set.roles,
      opinion: OpinionView { status, opinion },
      decisions,
    };
    let decision_list = Resource::Decision { uid, year: AcademicYear::current(today) };
    Ok((view, vec![resource.iri(), decision_list.collection_iri()]))
  })
  .await
}

// ─── Upsert ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UserBody {
  pub display_name: String,
  #[serde(default)]
  pub admin:        bool,
  #[serde(default)]
  pub manager:      bool,
  #[serde(default)]
  pub renfort:      bool,
  #[serde(default)]
  pub services:     Vec<Uuid>,
}

/// `PUT /users/:uid`
pub async fn upsert<S: Backend>(
  State(state): State<AppState<S>>,
  Path(uid): Path<String>,
  Json(body): Json<UserBody>,
) -> Result<impl IntoResponse> {
  let existing = state.store.find_subject(&uid).await.map_err(ApiError::store)?;
  let subject = Subject {
    display_name: body.display_name,
    admin: body.admin,
    manager: body.manager,
    renfort: body.renfort,
    services: body.services,
    ..existing.unwrap_or_else(|| Subject::new(uid.clone(), String::new()))
  };

  let created = state.store.save_subject(&subject).await.map_err(ApiError::store)?;

  let resource = Resource::User { uid: uid.clone() };
  state.publisher.publish(DomainEvent::UserModified { uid }).await?;
  state
    .publisher
    .publish(DomainEvent::ResourceModified { resource: resource.clone() })
    .await?;
  if created {
    state
      .publisher
      .publish(DomainEvent::ResourceCollectionModified { resource })
      .await?;
  }

  let status = if created { StatusCode::CREATED } else { StatusCode::OK };
  Ok((status, Json(subject)))
}
