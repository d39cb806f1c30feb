//! Domain events and the resources they invalidate.
//!
//! Events carry identifiers, never snapshots: a handler always re-reads the
//! current facts, so a late or repeated delivery cannot apply stale data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{EnumDiscriminants, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::calendar::{AcademicYear, Period};

// ─── Resources ───────────────────────────────────────────────────────────────

/// A serialized resource exposed by the read API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resource {
  User { uid: String },
  Decision { uid: String, year: AcademicYear },
  Request { request_id: Uuid },
}

impl Resource {
  /// Stable identity used as a cache tag.
  pub fn iri(&self) -> String {
    match self {
      Self::User { uid } => format!("/users/{uid}"),
      Self::Decision { uid, year } => {
        format!("/users/{uid}/decisions/{}", year.start_year())
      }
      Self::Request { request_id } => format!("/requests/{request_id}"),
    }
  }

  /// Identity of the collection listing this resource.
  pub fn collection_iri(&self) -> String {
    match self {
      Self::User { .. } => "/users".to_string(),
      Self::Decision { uid, .. } => format!("/users/{uid}/decisions"),
      Self::Request { .. } => "/requests".to_string(),
    }
  }
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Why the role-relevant facts of a subject changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentCause {
  Committee,
  Service,
  Profile,
  Intervention,
  RequestState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(EventKind))]
#[strum_discriminants(derive(Hash, EnumString, IntoStaticStr))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
  /// Profile fields of a subject changed (flags, services).
  UserModified { uid: String },
  /// A period-bounded role fact was added, edited or removed.
  RoleAssignmentChanged { uid: String, cause: AssignmentCause },
  /// An opinion was created, edited or deleted.
  OpinionModified { opinion_id: Uuid, uid: String },
  /// The opinion state of a subject was recomputed. `period` is the edited
  /// opinion's validity window, when it still exists.
  OpinionStateRecomputed { uid: String, period: Option<Period> },
  AccommodationModified {
    accommodation_id: Uuid,
    uid:              String,
    impacts_decision: bool,
  },
  QuestionnaireAnswerSubmitted {
    request_id:  Uuid,
    uid:         String,
    question_id: String,
  },
  ResourceModified { resource: Resource },
  ResourceCollectionModified { resource: Resource },
}

impl DomainEvent {
  pub fn kind(&self) -> EventKind { self.into() }

  /// The subject an event is about, if any.
  pub fn subject_uid(&self) -> Option<&str> {
    match self {
      Self::UserModified { uid }
      | Self::RoleAssignmentChanged { uid, .. }
      | Self::OpinionModified { uid, .. }
      | Self::OpinionStateRecomputed { uid, .. }
      | Self::AccommodationModified { uid, .. }
      | Self::QuestionnaireAnswerSubmitted { uid, .. } => Some(uid),
      Self::ResourceModified { resource }
      | Self::ResourceCollectionModified { resource } => match resource {
        Resource::User { uid } | Resource::Decision { uid, .. } => Some(uid),
        Resource::Request { .. } => None,
      },
    }
  }
}

impl EventKind {
  pub fn name(self) -> &'static str { self.into() }
}

/// An event as journaled and delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
  pub event_id:     Uuid,
  pub event:        DomainEvent,
  pub published_at: DateTime<Utc>,
}

impl Envelope {
  pub fn new(event: DomainEvent) -> Self {
    Self { event_id: Uuid::new_v4(), event, published_at: Utc::now() }
  }
}
