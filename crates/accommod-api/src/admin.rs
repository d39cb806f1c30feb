//! Reference options and dead-letter inspection.

use accommod_core::{
  journal::DeadLetter,
  reference::{ReferenceOption, ReferenceTable},
};
use axum::{
  Json,
  extract::{Path, State},
};

use crate::{AppState, Backend, Result, error::ApiError};

/// `GET /options/:table`, e.g. `/options/accommodation-domains`.
pub async fn options<S: Backend>(
  State(state): State<AppState<S>>,
  Path(table): Path<String>,
) -> Result<Json<Vec<ReferenceOption>>> {
  let table: ReferenceTable = table
    .parse()
    .map_err(|_| ApiError::NotFound(format!("unknown reference table {table:?}")))?;
  let options = state
    .store
    .reference_options(table)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(options))
}

/// `GET /dead-letters`
pub async fn dead_letters<S: Backend>(
  State(state): State<AppState<S>>,
) -> Result<Json<Vec<DeadLetter>>> {
  let letters = state.store.dead_letters().await.map_err(ApiError::Store)?;
  Ok(Json(letters))
}
