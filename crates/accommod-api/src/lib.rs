//! JSON REST API for the accommodation service.
//!
//! Exposes an axum [`Router`] backed by any store implementing both
//! [`AccommodationStore`] and [`EventJournal`]. Mutations persist the fact,
//! publish the matching domain event and return at once; derived values
//! (roles, opinion state, decisions) catch up asynchronously on the bus.
//! Reads are served from a [`ResourceCache`] with strong ETags.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", accommod_api::api_router(state))
//! ```

pub mod admin;
pub mod cached;
pub mod decisions;
pub mod error;
pub mod facts;
pub mod requests;
pub mod users;


use std::sync::Arc;

use accommod_core::{
  event::{DomainEvent, Envelope},
  journal::EventJournal,
  store::{AccommodationStore, DerivedWrite},
};
use accommod_engine::{bus::Publisher, cache::ResourceCache, clock::Clock};
use axum::{
  Router,
  routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Storage the API needs: the fact store plus the event journal.
pub trait Backend: AccommodationStore + EventJournal + 'static {}

impl<T: AccommodationStore + EventJournal + 'static> Backend for T {}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub store:     Arc<S>,
  pub publisher: Publisher,
  pub cache:     Arc<ResourceCache>,
  pub clock:     Clock,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:     self.store.clone(),
      publisher: self.publisher.clone(),
      cache:     self.cache.clone(),
      clock:     self.clock,
    }
  }
}

impl<S: Backend> AppState<S> {
  pub fn new(store: Arc<S>, publisher: Publisher, cache: Arc<ResourceCache>) -> Self {
    Self { store, publisher, cache, clock: Clock::System }
  }

  pub fn with_clock(self, clock: Clock) -> Self { Self { clock, ..self } }

  /// Apply a versioned write together with the events announcing it.
  /// Returns `false` when the version check fails; nothing is published then.
  pub(crate) async fn commit(&self, write: DerivedWrite, events: Vec<DomainEvent>) -> Result<bool> {
    let outbox: Vec<Envelope> = events.into_iter().map(Envelope::new).collect();
    if !self.store.commit_derived(&write, &outbox).await.map_err(ApiError::store)? {
      return Ok(false);
    }
    for envelope in outbox {
      self.publisher.enqueue(envelope)?;
    }
    Ok(true)
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `state`.
pub fn api_router<S: Backend>(state: AppState<S>) -> Router<()> {
  Router::new()
    // Users and their derived state
    .route("/users", get(users::list::<S>))
    .route("/users/{uid}", get(users::get_one::<S>).put(users::upsert::<S>))
    .route("/users/{uid}/decisions", get(decisions::list::<S>))
    .route("/users/{uid}/decisions/{year}", get(decisions::get_one::<S>))
    .route("/users/{uid}/decisions/{year}/status", post(decisions::set_status::<S>))
    // Source facts
    .route(
      "/assignments/{id}",
      put(facts::put_assignment::<S>).delete(facts::delete_assignment::<S>),
    )
    .route("/opinions/{id}", put(facts::put_opinion::<S>).delete(facts::delete_opinion::<S>))
    .route(
      "/accommodations/{id}",
      put(facts::put_accommodation::<S>).delete(facts::delete_accommodation::<S>),
    )
    // Requests
    .route("/requests/{id}", get(requests::get_one::<S>).put(requests::upsert::<S>))
    .route("/requests/{id}/answers", post(requests::answer::<S>))
    // Reference data and operations
    .route("/options/{table}", get(admin::options::<S>))
    .route("/dead-letters", get(admin::dead_letters::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
