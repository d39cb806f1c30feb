//! Conditional GET over the [`ResourceCache`].

use std::future::Future;

use accommod_engine::cache::{CachedRepresentation, ResourceCache};
use axum::{
  http::{HeaderMap, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::Result;

/// Serve `key` from the cache, building it with `build` on a miss.
///
/// `build` returns the value and the resource tags it was read from. A
/// matching `If-None-Match` gets `304 Not Modified` without a body.
pub async fn serve<T, F, Fut>(
  cache: &ResourceCache,
  headers: &HeaderMap,
  key: String,
  build: F,
) -> Result<Response>
where
  T: Serialize,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<(T, Vec<String>)>>,
{
  if let Some(hit) = cache.get(&key) {
    tracing::trace!(%key, "cache hit");
    return Ok(respond(&hit, headers));
  }

  let observed = cache.epoch();
  let (value, tags) = build().await?;
  let body = serde_json::to_string(&value)?;
  let representation = cache.insert(&key, body, tags, observed);
  Ok(respond(&representation, headers))
}

fn respond(representation: &CachedRepresentation, headers: &HeaderMap) -> Response {
  let etag = representation.etag.clone();
  if matches_etag(headers, &etag) {
    return (StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response();
  }
  (
    StatusCode::OK,
    [
      (header::ETAG, etag),
      (header::CONTENT_TYPE, "application/json".to_string()),
    ],
    representation.body.clone(),
  )
    .into_response()
}

/// `If-None-Match` with `*` or a list containing `etag`.
fn matches_etag(headers: &HeaderMap, etag: &str) -> bool {
  headers
    .get_all(header::IF_NONE_MATCH)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .flat_map(|v| v.split(','))
    .map(str::trim)
    .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
}

#[cfg(test)]
mod tests {
  use axum::http::HeaderValue;

  use super::*;

  fn with(value: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static(value));
    headers
  }

  #[test]
  fn if_none_match_accepts_lists_and_wildcards() {
    assert!(matches_etag(&with("\"abc\""), "\"abc\""));
    assert!(matches_etag(&with("\"x\", W/\"abc\""), "\"abc\""));
    assert!(matches_etag(&with("*"), "\"abc\""));
    assert!(!matches_etag(&with("\"abd\""), "\"abc\""));
    assert!(!matches_etag(&HeaderMap::new(), "\"abc\""));
  }
}
