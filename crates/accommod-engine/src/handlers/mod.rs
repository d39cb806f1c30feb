//! Recompute handlers and the cache invalidator.
//!
//! | Handler | Consumes | Writes | Emits |
//! |---|---|---|---|
//! | [`RoleRecompute`] | `UserModified`, `RoleAssignmentChanged` | role set | `ResourceModified(User)` |
//! | [`OpinionRecompute`] | `OpinionModified` | opinion state | `ResourceModified(User)`, `OpinionStateRecomputed` |
//! | [`DecisionRecompute`] | `OpinionStateRecomputed`, `AccommodationModified` | decisions | `ResourceModified(Decision, User)`, `ResourceCollectionModified(Decision)` |
//! | [`RequestProgress`] | `QuestionnaireAnswerSubmitted` | request state | `ResourceModified(Request)`, `RoleAssignmentChanged` |
//! | [`CacheInvalidator`] | `ResourceModified`, `ResourceCollectionModified` | cache | nothing |
//!
//! Every handler re-reads the facts it needs, writes derived rows with a
//! version check inside a bounded retry loop, and emits nothing when the
//! recomputed value equals the stored one. The events announcing a write are
//! journaled in the same transaction as the write itself, so a retry after a
//! failure never finds the row updated but its announcement missing.

mod decision;
mod invalidator;
mod opinion;
mod request;
mod role;

use std::sync::Arc;

use accommod_core::{
  event::{DomainEvent, Envelope, EventKind},
  store::{AccommodationStore, DerivedWrite},
  subject::Subject,
};

pub use decision::{DecisionChange, DecisionRecompute};
pub use invalidator::CacheInvalidator;
pub use opinion::OpinionRecompute;
pub use request::RequestProgress;
pub use role::RoleRecompute;

use crate::{Error, Result, bus::{Publisher, Registry}, cache::ResourceCache, clock::Clock};

/// Read-modify-write attempts on one derived row before giving the delivery
/// back to the bus as a conflict.
pub const CAS_ATTEMPTS: u32 = 3;

/// What every recompute handler needs.
pub struct Context<S> {
  pub store:     Arc<S>,
  pub publisher: Publisher,
  pub clock:     Clock,
}

impl<S> Clone for Context<S> {
  fn clone(&self) -> Self {
    Self {
      store:     self.store.clone(),
      publisher: self.publisher.clone(),
      clock:     self.clock,
    }
  }
}

impl<S: AccommodationStore> Context<S> {
  pub fn new(store: Arc<S>, publisher: Publisher) -> Self {
    Self { store, publisher, clock: Clock::System }
  }

  pub fn with_clock(self, clock: Clock) -> Self { Self { clock, ..self } }

  async fn emit(&self, event: DomainEvent) -> Result<()> {
    self.publisher.publish(event).await.map(|_| ())
  }

  /// Apply `write` and, if it wins its version check, journal `events` in
  /// the same transaction and queue them. Returns whether it applied.
  async fn commit(&self, write: DerivedWrite, events: Vec<DomainEvent>) -> Result<bool> {
    let outbox: Vec<Envelope> = events.into_iter().map(Envelope::new).collect();
    if !self.store.commit_derived(&write, &outbox).await.map_err(Error::store)? {
      return Ok(false);
    }
    for envelope in outbox {
      self.publisher.enqueue(envelope)?;
    }
    Ok(true)
  }

  /// The subject an event names. Its absence makes the event stale.
  async fn require_subject(&self, uid: &str) -> Result<Subject> {
    self
      .store
      .find_subject(uid)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::StaleEvent(format!("subject {uid} no longer exists")))
  }
}

/// Subscribe every handler to the kinds it consumes.
pub fn register_all<S>(registry: &mut Registry, ctx: Context<S>, cache: Arc<ResourceCache>)
where
  S: AccommodationStore + 'static,
{
  let roles = Arc::new(RoleRecompute::new(ctx.clone()));
  let opinion = Arc::new(OpinionRecompute::new(ctx.clone()));
  let decision = Arc::new(DecisionRecompute::new(ctx.clone()));
  let request = Arc::new(RequestProgress::new(ctx));
  let invalidator = Arc::new(CacheInvalidator::new(cache));

  registry
    .subscribe(EventKind::UserModified, roles.clone())
    .subscribe(EventKind::RoleAssignmentChanged, roles)
    .subscribe(EventKind::OpinionModified, opinion)
    .subscribe(EventKind::OpinionStateRecomputed, decision.clone())
    .subscribe(EventKind::AccommodationModified, decision)
    .subscribe(EventKind::QuestionnaireAnswerSubmitted, request)
    .subscribe(EventKind::ResourceModified, invalidator.clone())
    .subscribe(EventKind::ResourceCollectionModified, invalidator);
}
