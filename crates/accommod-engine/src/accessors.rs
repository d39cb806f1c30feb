//! Read accessors over persisted derived state.
//!
//! These only read. A value that is being recomputed stays at its previous
//! version until the handler's write lands.

use std::sync::Arc;

use accommod_core::{
  calendar::AcademicYear,
  decision::Decision,
  opinion::OpinionStatus,
  role::RoleSet,
  store::AccommodationStore,
};
use chrono::NaiveDate;

use crate::{Error, Result};

pub struct DerivedState<S> {
  store: Arc<S>,
}

impl<S> Clone for DerivedState<S> {
  fn clone(&self) -> Self { Self { store: self.store.clone() } }
}

impl<S: AccommodationStore> DerivedState<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// The stored role set, or the default minimal set if none was written yet.
  pub async fn current_role_set(&self, uid: &str) -> Result<RoleSet> {
    Ok(
      self
        .store
        .find_role_set(uid)
        .await
        .map_err(Error::store)?
        .unwrap_or_else(|| RoleSet::initial(uid)),
    )
  }

  /// The stored opinion state projected onto `date`.
  pub async fn current_opinion_state(&self, uid: &str, date: NaiveDate) -> Result<OpinionStatus> {
    Ok(
      self
        .store
        .find_opinion_state(uid)
        .await
        .map_err(Error::store)?
        .map_or(OpinionStatus::None, |state| state.status_on(date)),
    )
  }

  pub async fn current_decision(&self, uid: &str, year: AcademicYear) -> Result<Option<Decision>> {
    self.store.find_decision(uid, year).await.map_err(Error::store)
  }

  /// Every decision of `uid`, oldest year first.
  pub async fn decisions(&self, uid: &str) -> Result<Vec<Decision>> {
    self.store.decisions_of(uid).await.map_err(Error::store)
  }
}
