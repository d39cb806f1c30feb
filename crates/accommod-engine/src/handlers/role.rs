use accommod_core::{
  event::{DomainEvent, Envelope, Resource},
  role::{RoleFacts, RoleSet, compute_roles},
  store::{AccommodationStore, DerivedWrite},
  subject::{Service, Subject},
};
use async_trait::async_trait;
use chrono::Utc;

use super::{CAS_ATTEMPTS, Context};
use crate::{Error, Result, bus::EventHandler};

pub struct RoleRecompute<S> {
  ctx: Context<S>,
}

impl<S: AccommodationStore> RoleRecompute<S> {
  pub fn new(ctx: Context<S>) -> Self { Self { ctx } }

  /// Recompute and persist the role set of `uid`, announcing the user as
  /// modified. Returns `true` if the stored set changed.
  pub async fn recompute(&self, uid: &str) -> Result<bool> {
    let store = &self.ctx.store;
    let today = self.ctx.clock.today();

    for attempt in 1..=CAS_ATTEMPTS {
      let subject = self.ctx.require_subject(uid).await?;
      let services = self.resolve_services(&subject).await?;
      let assignments = store.assignments_of(uid).await.map_err(Error::store)?;
      let requests = store.requests_of(uid).await.map_err(Error::store)?;

      let roles = compute_roles(
        &RoleFacts {
          subject:     &subject,
          services:    &services,
          assignments: &assignments,
          requests:    &requests,
        },
        today,
      );

      let current = store
        .find_role_set(uid)
        .await
        .map_err(Error::store)?
        .unwrap_or_else(|| RoleSet::initial(uid));
      if current.version > 0 && current.roles == roles {
        tracing::debug!(uid, "role set unchanged");
        return Ok(false);
      }

      let next = RoleSet { roles, computed_at: Utc::now(), ..current };
      let roles = next.roles.clone();
      let announce = DomainEvent::ResourceModified { resource: Resource::User { uid: uid.to_owned() } };
      if self.ctx.commit(DerivedWrite::RoleSet(next), vec![announce]).await? {
        tracing::info!(uid, ?roles, "role set updated");
        return Ok(true);
      }
      tracing::debug!(uid, attempt, "role set changed underneath; re-reading");
    }

    Err(Error::Conflict(format!("role set of {uid}")))
  }

  /// Services the subject references. Dangling ids are logged and skipped.
  async fn resolve_services(&self, subject: &Subject) -> Result<Vec<Service>> {
    let mut services = Vec::with_capacity(subject.services.len());
    for &service_id in &subject.services {
      match self.ctx.store.find_service(service_id).await.map_err(Error::store)? {
        Some(service) => services.push(service),
        None => tracing::warn!(uid = %subject.uid, %service_id, "referenced service not found; ignored"),
      }
    }
    Ok(services)
  }
}

#[async_trait]
impl<S> EventHandler for RoleRecompute<S>
where
  S: AccommodationStore + 'static,
{
  fn name(&self) -> &'static str { "role_recompute" }

  fn coalesce_key(&self, event: &DomainEvent) -> Option<String> {
    event.subject_uid().map(str::to_owned)
  }

  async fn handle(&self, envelope: &Envelope) -> Result<()> {
    let uid = match &envelope.event {
      DomainEvent::UserModified { uid } | DomainEvent::RoleAssignmentChanged { uid, .. } => uid,
      _ => return Ok(()),
    };

    self.recompute(uid).await?;
    Ok(())
  }
}
