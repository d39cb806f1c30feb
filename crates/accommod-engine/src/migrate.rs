//! One-time migration jobs and the bulk re-trigger.
//!
//! A job runs at most once per version: the [`Migrator`] records every
//! completed run in the store's migration log and skips jobs whose recorded
//! version is current. Jobs never write derived state themselves; they
//! publish the events that make the handlers recompute it, so re-running one
//! only causes writes where the stored values are actually stale.

use std::sync::Arc;

use accommod_core::{
  accommodation::AccommodationDomain,
  event::{AssignmentCause, DomainEvent},
  migration::AppliedMigration,
  store::{AccommodationStore, Page},
  subject::Subject,
};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{Error, Result, bus::Publisher};

#[async_trait]
pub trait MigrationJob<S: AccommodationStore>: Send + Sync {
  fn name(&self) -> &'static str;

  fn version(&self) -> u32;

  /// Returns the number of items processed.
  async fn run(&self, store: &S, publisher: &Publisher, batch_size: usize) -> Result<u64>;
}

pub struct Migrator<S: AccommodationStore> {
  store:      Arc<S>,
  publisher:  Publisher,
  batch_size: usize,
  jobs:       Vec<Box<dyn MigrationJob<S>>>,
}

impl<S: AccommodationStore + 'static> Migrator<S> {
  pub fn new(store: Arc<S>, publisher: Publisher, batch_size: usize) -> Self {
    Self { store, publisher, batch_size, jobs: Vec::new() }
  }

  /// The jobs every deployment runs.
  pub fn with_default_jobs(self) -> Self {
    self.with_job(RecomputeAllRoles).with_job(RecomputeAllDerivedState)
  }

  pub fn with_job(mut self, job: impl MigrationJob<S> + 'static) -> Self {
    self.jobs.push(Box::new(job));
    self
  }

  /// Run every job whose current version is not yet recorded. Returns the
  /// log entries written by this call.
  pub async fn run_pending(&self) -> Result<Vec<AppliedMigration>> {
    let mut applied = Vec::new();

    for job in &self.jobs {
      let name = job.name();
      let version = job.version();
      let recorded = self.store.find_migration(name).await.map_err(Error::store)?;
      if let Some(done) = recorded
        && done.version >= version
      {
        tracing::debug!(migration = name, version, "already applied");
        continue;
      }

      tracing::info!(migration = name, version, "running migration");
      let items = job.run(&self.store, &self.publisher, self.batch_size).await?;

      let entry = AppliedMigration {
        name: name.to_string(),
        version,
        completed_at: Utc::now(),
        items,
      };
      self.store.record_migration(&entry).await.map_err(Error::store)?;
      tracing::info!(migration = name, version, items, "migration recorded");
      applied.push(entry);
    }

    Ok(applied)
  }
}

// ─── Jobs ────────────────────────────────────────────────────────────────────

/// Re-derives every subject's role set.
pub struct RecomputeAllRoles;

#[async_trait]
impl<S: AccommodationStore + 'static> MigrationJob<S> for RecomputeAllRoles {
  fn name(&self) -> &'static str { "recompute_all_roles" }

  fn version(&self) -> u32 { 1 }

  async fn run(&self, store: &S, publisher: &Publisher, batch_size: usize) -> Result<u64> {
    let mut pages = SubjectPages::new(batch_size);
    let mut count = 0;
    while let Some(batch) = pages.next_batch(store).await? {
      for subject in batch {
        publisher
          .publish(DomainEvent::RoleAssignmentChanged {
            uid:   subject.uid,
            cause: AssignmentCause::Profile,
          })
          .await?;
        count += 1;
      }
    }
    Ok(count)
  }
}

/// Re-derives roles, opinion states and decisions of every subject.
pub struct RecomputeAllDerivedState;

#[async_trait]
impl<S: AccommodationStore + 'static> MigrationJob<S> for RecomputeAllDerivedState {
  fn name(&self) -> &'static str { "recompute_all_derived_state" }

  fn version(&self) -> u32 { 1 }

  async fn run(&self, store: &S, publisher: &Publisher, batch_size: usize) -> Result<u64> {
    retrigger_all(store, publisher, batch_size).await
  }
}

// ─── Bulk re-trigger ─────────────────────────────────────────────────────────

/// Publish the events that recompute everything derived for every subject.
///
/// Safe to run any number of times: handlers only write (and only announce)
/// values that differ from what is stored.
pub async fn retrigger_all<S: AccommodationStore>(
  store: &S,
  publisher: &Publisher,
  batch_size: usize,
) -> Result<u64> {
  let mut pages = SubjectPages::new(batch_size);
  let mut count = 0;
  while let Some(batch) = pages.next_batch(store).await? {
    for subject in &batch {
      retrigger_subject(store, publisher, &subject.uid).await?;
      count += 1;
    }
    tracing::info!(subjects = count, "re-trigger batch published");
  }
  Ok(count)
}

async fn retrigger_subject<S: AccommodationStore>(
  store: &S,
  publisher: &Publisher,
  uid: &str,
) -> Result<()> {
  publisher.publish(DomainEvent::UserModified { uid: uid.to_owned() }).await?;

  let opinions = store.opinions_of(uid).await.map_err(Error::store)?;
  if opinions.is_empty() {
    // An id that resolves to nothing re-derives the state without a period
    // hint, exactly like the deletion of the last opinion.
    publisher
      .publish(DomainEvent::OpinionModified { opinion_id: Uuid::nil(), uid: uid.to_owned() })
      .await?;
  }
  for opinion in opinions {
    publisher
      .publish(DomainEvent::OpinionModified { opinion_id: opinion.opinion_id, uid: opinion.uid })
      .await?;
  }

  for accommodation in store
    .accommodations_of(uid)
    .await
    .map_err(Error::store)?
    .into_iter()
    .filter(|a| a.domain == AccommodationDomain::Exam)
  {
    publisher
      .publish(DomainEvent::AccommodationModified {
        accommodation_id: accommodation.accommodation_id,
        uid:              accommodation.uid,
        impacts_decision: true,
      })
      .await?;
  }
  Ok(())
}

/// Walks the subject table one bounded page at a time.
struct SubjectPages {
  page: Option<Page>,
}

impl SubjectPages {
  fn new(batch_size: usize) -> Self { Self { page: Some(Page::first(batch_size.max(1))) } }

  async fn next_batch<S: AccommodationStore>(&mut self, store: &S) -> Result<Option<Vec<Subject>>> {
    let Some(page) = self.page else {
      return Ok(None);
    };
    let batch = store.list_subjects(page).await.map_err(Error::store)?;
    self.page = (batch.len() == page.limit).then(|| page.next());
    Ok((!batch.is_empty()).then_some(batch))
  }
}
