use std::collections::BTreeSet;

use accommod_core::{
  accommodation::AccommodationDomain,
  calendar::{AcademicYear, Period},
  decision::{Decision, DecisionFacts, DecisionPlan, DecisionStatus, plan_decision},
  event::{DomainEvent, Envelope, Resource},
  store::{AccommodationStore, DerivedWrite},
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use super::{CAS_ATTEMPTS, Context};
use crate::{Error, Result, bus::EventHandler};

/// What a recompute did to the decision of one year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionChange {
  Created,
  Refreshed,
  Deleted,
}

pub struct DecisionRecompute<S> {
  ctx: Context<S>,
}

impl<S: AccommodationStore> DecisionRecompute<S> {
  pub fn new(ctx: Context<S>) -> Self { Self { ctx } }

  /// Recompute every year relevant to `uid`. Each change is committed with
  /// the events announcing the decision and its owner.
  ///
  /// The years are those `hint` intersects, those that already carry a
  /// decision, and the one picked from the subject's own active periods.
  pub async fn recompute(
    &self,
    uid: &str,
    hint: Option<Period>,
  ) -> Result<Vec<(AcademicYear, DecisionChange)>> {
    self.ctx.require_subject(uid).await?;
    let store = &self.ctx.store;
    let today = self.ctx.clock.today();

    let opinions = store.opinions_of(uid).await.map_err(Error::store)?;
    let accommodations = store.accommodations_of(uid).await.map_err(Error::store)?;
    let existing = store.decisions_of(uid).await.map_err(Error::store)?;

    let periods: Vec<Period> = opinions
      .iter()
      .map(|o| o.period)
      .chain(
        accommodations
          .iter()
          .filter(|a| a.domain == AccommodationDomain::Exam)
          .map(|a| a.period),
      )
      .collect();

    let mut years: BTreeSet<AcademicYear> = existing.iter().map(|d| d.year).collect();
    if let Some(period) = hint {
      years.extend(AcademicYear::spanning(&period, today));
    }
    years.insert(AcademicYear::for_periods(&periods, today));

    let mut changes = Vec::new();
    for year in years {
      if let Some(change) = self.recompute_year(uid, year, today).await? {
        changes.push((year, change));
      }
    }
    Ok(changes)
  }

  fn announce(uid: &str, year: AcademicYear, change: DecisionChange) -> Vec<DomainEvent> {
    let resource = Resource::Decision { uid: uid.to_owned(), year };
    let mut events = vec![DomainEvent::ResourceModified { resource: resource.clone() }];
    if change != DecisionChange::Refreshed {
      events.push(DomainEvent::ResourceCollectionModified { resource });
    }
    events.push(DomainEvent::ResourceModified { resource: Resource::User { uid: uid.to_owned() } });
    events
  }

  async fn recompute_year(
    &self,
    uid: &str,
    year: AcademicYear,
    today: NaiveDate,
  ) -> Result<Option<DecisionChange>> {
    let store = &self.ctx.store;

    for attempt in 1..=CAS_ATTEMPTS {
      let opinions = store.opinions_of(uid).await.map_err(Error::store)?;
      let accommodations = store.accommodations_of(uid).await.map_err(Error::store)?;
      let existing = store.find_decision(uid, year).await.map_err(Error::store)?;

      let facts = DecisionFacts::gather(year, today, &opinions, &accommodations);
      let (write, change) = match (plan_decision(existing.as_ref(), &facts), existing) {
        (DecisionPlan::Keep, _) => {
          tracing::debug!(uid, %year, "decision unchanged");
          return Ok(None);
        }
        (DecisionPlan::Create { facts_digest }, _) => (
          DerivedWrite::Decision(Decision::pending(uid, year, facts_digest)),
          DecisionChange::Created,
        ),
        (DecisionPlan::Refresh { facts_digest }, Some(decision)) => (
          DerivedWrite::Decision(Decision {
            status: DecisionStatus::PendingValidation,
            facts_digest,
            modified_at: Utc::now(),
            ..decision
          }),
          DecisionChange::Refreshed,
        ),
        (DecisionPlan::Delete, Some(decision)) => {
          (DerivedWrite::RemoveDecision(decision), DecisionChange::Deleted)
        }
        // Refresh and delete are only planned for an existing decision.
        (DecisionPlan::Refresh { .. } | DecisionPlan::Delete, None) => return Ok(None),
      };

      if self.ctx.commit(write, Self::announce(uid, year, change)).await? {
        tracing::info!(uid, %year, ?change, "decision updated");
        return Ok(Some(change));
      }
      tracing::debug!(uid, %year, attempt, "decision changed underneath; re-reading");
    }

    Err(Error::Conflict(format!("decision of {uid} for {year}")))
  }

  async fn accommodation_period(&self, accommodation_id: Uuid) -> Result<Option<Period>> {
    Ok(
      self
        .ctx
        .store
        .find_accommodation(accommodation_id)
        .await
        .map_err(Error::store)?
        .map(|a| a.period),
    )
  }
}

#[async_trait]
impl<S> EventHandler for DecisionRecompute<S>
where
  S: AccommodationStore + 'static,
{
  fn name(&self) -> &'static str { "decision_recompute" }

  fn coalesce_key(&self, event: &DomainEvent) -> Option<String> {
    match event {
      DomainEvent::OpinionStateRecomputed { uid, period } => Some(format!("{uid}/{period:?}")),
      // A queued no-op must never absorb a change that recomputes.
      DomainEvent::AccommodationModified { uid, accommodation_id, impacts_decision: true } => {
        Some(format!("{uid}/{accommodation_id}"))
      }
      _ => None,
    }
  }

  async fn handle(&self, envelope: &Envelope) -> Result<()> {
    match &envelope.event {
      DomainEvent::OpinionStateRecomputed { uid, period } => {
        self.recompute(uid, *period).await?;
      }
      DomainEvent::AccommodationModified { accommodation_id, uid, impacts_decision } => {
        if !impacts_decision {
          tracing::debug!(uid, %accommodation_id, "accommodation change does not affect decisions");
          return Ok(());
        }
        let hint = self.accommodation_period(*accommodation_id).await?;
        self.recompute(uid, hint).await?;
      }
      _ => {}
    }
    Ok(())
  }
}
