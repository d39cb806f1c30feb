//! Tagged cache of serialized read representations.
//!
//! Each entry carries the tags (resource IRIs) it was built from. Invalidating
//! a tag drops every entry carrying it. Invalidation is a set removal and is
//! safe to repeat or to run concurrently.
//!
//! Readers build an entry in three steps: [`ResourceCache::epoch`], read the
//! store, [`ResourceCache::insert`]. If any invalidation happened in between,
//! the insert is refused so a stale body cannot outlive the event that
//! invalidated it.

use std::{
  collections::{HashMap, HashSet},
  sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicU64, Ordering},
  },
};

use sha2::{Digest, Sha256};

/// Strong ETag over a serialized body: the quoted SHA-256 hex digest.
pub fn compute_etag(body: &[u8]) -> String {
  format!("\"{}\"", hex::encode(Sha256::digest(body)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRepresentation {
  pub body: String,
  pub etag: String,
  pub tags: Vec<String>,
}

#[derive(Default)]
struct Entries {
  by_key: HashMap<String, Arc<CachedRepresentation>>,
  by_tag: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
pub struct ResourceCache {
  entries: RwLock<Entries>,
  epoch:   AtomicU64,
}

impl ResourceCache {
  pub fn new() -> Self { Self::default() }

  pub fn get(&self, key: &str) -> Option<Arc<CachedRepresentation>> {
    self
      .entries
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .by_key
      .get(key)
      .cloned()
  }

  /// Snapshot to pass back to [`Self::insert`].
  pub fn epoch(&self) -> u64 { self.epoch.load(Ordering::SeqCst) }

  /// Store `body` under `key` unless an invalidation ran since `observed`.
  /// The representation is returned either way so the caller can serve it.
  pub fn insert(
    &self,
    key: &str,
    body: String,
    tags: Vec<String>,
    observed: u64,
  ) -> Arc<CachedRepresentation> {
    let representation = Arc::new(CachedRepresentation { etag: compute_etag(body.as_bytes()), body, tags });

    let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    if self.epoch.load(Ordering::SeqCst) != observed {
      tracing::debug!(key, "cache insert skipped; invalidated while reading");
      return representation;
    }
    for tag in &representation.tags {
      entries.by_tag.entry(tag.clone()).or_default().insert(key.to_owned());
    }
    entries.by_key.insert(key.to_owned(), representation.clone());
    representation
  }

  /// Drop every entry tagged `tag`. Returns how many went away.
  pub fn invalidate(&self, tag: &str) -> usize {
    let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
    let entries = &mut *guard;
    self.epoch.fetch_add(1, Ordering::SeqCst);

    let Some(keys) = entries.by_tag.remove(tag) else {
      return 0;
    };
    let mut dropped = 0;
    for key in keys {
      let Some(entry) = entries.by_key.remove(&key) else {
        continue;
      };
      dropped += 1;
      for other in entry.tags.iter().filter(|t| t.as_str() != tag) {
        let emptied = entries.by_tag.get_mut(other).is_some_and(|set| {
          set.remove(&key);
          set.is_empty()
        });
        if emptied {
          entries.by_tag.remove(other);
        }
      }
    }
    dropped
  }

  pub fn len(&self) -> usize {
    self.entries.read().unwrap_or_else(PoisonError::into_inner).by_key.len()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tags(list: &[&str]) -> Vec<String> { list.iter().map(|t| t.to_string()).collect() }

  #[test]
  fn etag_is_quoted_and_content_addressed() {
    let a = compute_etag(b"{\"uid\":\"alice\"}");
    assert!(a.starts_with('"') && a.ends_with('"'));
    assert_eq!(a.len(), 66);
    assert_eq!(a, compute_etag(b"{\"uid\":\"alice\"}"));
    assert_ne!(a, compute_etag(b"{\"uid\":\"bob\"}"));
  }

  #[test]
  fn invalidating_a_tag_drops_every_entry_carrying_it() {
    let cache = ResourceCache::new();
    let epoch = cache.epoch();
    cache.insert("/users/alice", "a".into(), tags(&["/users/alice"]), epoch);
    cache.insert("/users", "list".into(), tags(&["/users", "/users/alice", "/users/bob"]), epoch);
    cache.insert("/users/bob", "b".into(), tags(&["/users/bob"]), epoch);
    assert_eq!(cache.len(), 3);

    assert_eq!(cache.invalidate("/users/alice"), 2);
    assert!(cache.get("/users/alice").is_none());
    assert!(cache.get("/users").is_none());
    assert!(cache.get("/users/bob").is_some());

    // Repeating is harmless.
    assert_eq!(cache.invalidate("/users/alice"), 0);
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn insert_after_a_racing_invalidation_is_not_kept() {
    let cache = ResourceCache::new();
    let observed = cache.epoch();
    cache.invalidate("/users/alice");

    let served = cache.insert("/users/alice", "stale".into(), tags(&["/users/alice"]), observed);
    assert_eq!(served.body, "stale");
    assert!(cache.get("/users/alice").is_none());
  }
}
