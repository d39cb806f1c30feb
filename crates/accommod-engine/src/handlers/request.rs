use accommod_core::{
  event::{AssignmentCause, DomainEvent, Envelope, Resource},
  request::{Request, next_state},
  store::{AccommodationStore, DerivedWrite},
};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{CAS_ATTEMPTS, Context};
use crate::{Error, Result, bus::EventHandler};

/// Moves a draft request to `Received` once its questionnaire is complete.
pub struct RequestProgress<S> {
  ctx: Context<S>,
}

impl<S: AccommodationStore> RequestProgress<S> {
  pub fn new(ctx: Context<S>) -> Self { Self { ctx } }

  /// Returns the request as stored after a transition, or `None` when it
  /// stays where it is. A transition announces the request and asks for the
  /// owner's roles to be recomputed.
  pub async fn progress(&self, request_id: Uuid) -> Result<Option<Request>> {
    let store = &self.ctx.store;

    for attempt in 1..=CAS_ATTEMPTS {
      let request = store
        .find_request(request_id)
        .await
        .map_err(Error::store)?
        .ok_or_else(|| Error::StaleEvent(format!("request {request_id} no longer exists")))?;
      let answers = store.answers_of(request_id).await.map_err(Error::store)?;

      let Some(state) = next_state(&request, &answers) else {
        return Ok(None);
      };

      let next = Request { state, modified_at: Utc::now(), ..request };
      let events = vec![
        DomainEvent::ResourceModified { resource: Resource::Request { request_id } },
        DomainEvent::RoleAssignmentChanged {
          uid:   next.uid.clone(),
          cause: AssignmentCause::RequestState,
        },
      ];
      if self.ctx.commit(DerivedWrite::Request(next.clone()), events).await? {
        tracing::info!(%request_id, uid = %next.uid, state = state.discriminant(), "request progressed");
        return Ok(Some(Request { version: next.version + 1, ..next }));
      }
      tracing::debug!(%request_id, attempt, "request changed underneath; re-reading");
    }

    Err(Error::Conflict(format!("request {request_id}")))
  }
}

#[async_trait]
impl<S> EventHandler for RequestProgress<S>
where
  S: AccommodationStore + 'static,
{
  fn name(&self) -> &'static str { "request_progress" }

  fn coalesce_key(&self, event: &DomainEvent) -> Option<String> {
    match event {
      DomainEvent::QuestionnaireAnswerSubmitted { request_id, .. } => Some(request_id.to_string()),
      _ => None,
    }
  }

  async fn handle(&self, envelope: &Envelope) -> Result<()> {
    let DomainEvent::QuestionnaireAnswerSubmitted { request_id, .. } = &envelope.event else {
      return Ok(());
    };

    self.progress(*request_id).await?;
    Ok(())
  }
}
