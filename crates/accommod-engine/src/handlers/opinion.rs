use accommod_core::{
  event::{DomainEvent, Envelope, Resource},
  opinion::{OpinionState, resolve_opinion},
  store::{AccommodationStore, DerivedWrite},
};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{CAS_ATTEMPTS, Context};
use crate::{Error, Result, bus::EventHandler};

/// Derives the opinion state of a subject, then hands over to the decision
/// handler by publishing `OpinionStateRecomputed`.
pub struct OpinionRecompute<S> {
  ctx: Context<S>,
}

impl<S: AccommodationStore> OpinionRecompute<S> {
  pub fn new(ctx: Context<S>) -> Self { Self { ctx } }

  /// Returns `true` if the stored state changed, in which case the user is
  /// announced as modified.
  pub async fn recompute(&self, uid: &str) -> Result<bool> {
    let store = &self.ctx.store;
    let today = self.ctx.clock.today();

    for attempt in 1..=CAS_ATTEMPTS {
      let opinions = store.opinions_of(uid).await.map_err(Error::store)?;
      let resolution = resolve_opinion(&opinions, today);

      let current = store
        .find_opinion_state(uid)
        .await
        .map_err(Error::store)?
        .unwrap_or_else(|| OpinionState::empty(uid));
      if current.version > 0 && current.resolution() == resolution {
        tracing::debug!(uid, "opinion state unchanged");
        return Ok(false);
      }

      let next = OpinionState {
        status: resolution.status,
        opinion: resolution.opinion,
        computed_at: Utc::now(),
        ..current
      };
      let status = next.status.discriminant();
      let announce = DomainEvent::ResourceModified { resource: Resource::User { uid: uid.to_owned() } };
      if self.ctx.commit(DerivedWrite::OpinionState(next), vec![announce]).await? {
        tracing::info!(uid, status, "opinion state updated");
        return Ok(true);
      }
      tracing::debug!(uid, attempt, "opinion state changed underneath; re-reading");
    }

    Err(Error::Conflict(format!("opinion state of {uid}")))
  }

  async fn handle_modified(&self, opinion_id: Uuid, uid: &str) -> Result<()> {
    self.ctx.require_subject(uid).await?;
    self.recompute(uid).await?;

    // Gone when the opinion was deleted; the decision handler then works from
    // the years it already knows about.
    let period = self
      .ctx
      .store
      .find_opinion(opinion_id)
      .await
      .map_err(Error::store)?
      .map(|opinion| opinion.period);

    self
      .ctx
      .emit(DomainEvent::OpinionStateRecomputed { uid: uid.to_owned(), period })
      .await
  }
}

#[async_trait]
impl<S> EventHandler for OpinionRecompute<S>
where
  S: AccommodationStore + 'static,
{
  fn name(&self) -> &'static str { "opinion_recompute" }

  fn coalesce_key(&self, event: &DomainEvent) -> Option<String> {
    match event {
      DomainEvent::OpinionModified { opinion_id, uid } => Some(format!("{uid}/{opinion_id}")),
      _ => None,
    }
  }

  async fn handle(&self, envelope: &Envelope) -> Result<()> {
    match &envelope.event {
      DomainEvent::OpinionModified { opinion_id, uid } => {
        self.handle_modified(*opinion_id, uid).await
      }
      _ => Ok(()),
    }
  }
}
