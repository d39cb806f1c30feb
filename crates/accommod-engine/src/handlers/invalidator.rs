use std::sync::Arc;

use accommod_core::event::{DomainEvent, Envelope};
use async_trait::async_trait;

use crate::{Result, bus::EventHandler, cache::ResourceCache};

/// Drops cached representations when the resources behind them change.
pub struct CacheInvalidator {
  cache: Arc<ResourceCache>,
}

impl CacheInvalidator {
  pub fn new(cache: Arc<ResourceCache>) -> Self { Self { cache } }

  fn tag(event: &DomainEvent) -> Option<String> {
    match event {
      DomainEvent::ResourceModified { resource } => Some(resource.iri()),
      DomainEvent::ResourceCollectionModified { resource } => Some(resource.collection_iri()),
      _ => None,
    }
  }
}

#[async_trait]
impl EventHandler for CacheInvalidator {
  fn name(&self) -> &'static str { "cache_invalidator" }

  fn lane_key(&self, event: &DomainEvent) -> String { Self::tag(event).unwrap_or_default() }

  // Invalidation is a set removal; two queued for the same tag are one.
  fn coalesce_key(&self, event: &DomainEvent) -> Option<String> { Self::tag(event) }

  async fn handle(&self, envelope: &Envelope) -> Result<()> {
    if let Some(tag) = Self::tag(&envelope.event) {
      let dropped = self.cache.invalidate(&tag);
      tracing::debug!(%tag, dropped, "cache invalidated");
    }
    Ok(())
  }
}
