//! In-process domain event bus with a durable journal.
//!
//! - [`Publisher`] journals an envelope, then enqueues it. It never waits
//!   for handlers.
//! - [`EventBus`] fans every envelope out to the handlers registered for its
//!   [`EventKind`]. Each handler owns a fixed set of lanes; deliveries with
//!   the same [`EventHandler::lane_key`] share a lane and run one at a time
//!   in arrival order.
//! - A failed delivery is retried with exponential backoff while its error is
//!   retryable; otherwise, or once attempts run out, it is dead-lettered.
//! - An envelope is marked complete in the journal once every handler is done
//!   with it. Whatever is still pending at startup is replayed.

mod dispatch;
mod publisher;

use std::{collections::HashMap, sync::Arc};

use accommod_core::event::{DomainEvent, Envelope, EventKind};
use async_trait::async_trait;

pub use dispatch::EventBus;
pub use publisher::{Inbox, Publisher};

use crate::Result;

// ─── Handler trait ───────────────────────────────────────────────────────────

#[async_trait]
pub trait EventHandler: Send + Sync {
  /// Stable name, recorded on dead letters.
  fn name(&self) -> &'static str;

  /// Deliveries with equal keys are serialized.
  fn lane_key(&self, event: &DomainEvent) -> String {
    event.subject_uid().unwrap_or_default().to_string()
  }

  /// Deliveries with equal keys are interchangeable: one still waiting in a
  /// lane absorbs any later duplicate. `None` disables coalescing.
  fn coalesce_key(&self, _event: &DomainEvent) -> Option<String> { None }

  async fn handle(&self, envelope: &Envelope) -> Result<()>;
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Which handlers receive which event kinds.
///
/// A handler subscribed to several kinds is registered once and keeps a single
/// set of lanes, so its per-key ordering holds across kinds.
#[derive(Default)]
pub struct Registry {
  handlers: Vec<Arc<dyn EventHandler>>,
  routes:   HashMap<EventKind, Vec<usize>>,
}

impl Registry {
  pub fn new() -> Self { Self::default() }

  pub fn subscribe(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
    let index = match self.handlers.iter().position(|h| h.name() == handler.name()) {
      Some(index) => index,
      None => {
        self.handlers.push(handler);
        self.handlers.len() - 1
      }
    };
    let route = self.routes.entry(kind).or_default();
    if !route.contains(&index) {
      route.push(index);
    }
    self
  }

  pub fn handler_names(&self, kind: EventKind) -> Vec<&'static str> {
    self
      .routes
      .get(&kind)
      .map(|route| route.iter().map(|&i| self.handlers[i].name()).collect())
      .unwrap_or_default()
  }

  pub(crate) fn into_parts(self) -> (Vec<Arc<dyn EventHandler>>, HashMap<EventKind, Vec<usize>>) {
    (self.handlers, self.routes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Named(&'static str);

  #[async_trait]
  impl EventHandler for Named {
    fn name(&self) -> &'static str { self.0 }

    async fn handle(&self, _envelope: &Envelope) -> Result<()> { Ok(()) }
  }

  #[test]
  fn a_handler_is_registered_once_across_kinds() {
    let mut registry = Registry::new();
    registry
      .subscribe(EventKind::UserModified, Arc::new(Named("roles")))
      .subscribe(EventKind::RoleAssignmentChanged, Arc::new(Named("roles")))
      .subscribe(EventKind::UserModified, Arc::new(Named("roles")))
      .subscribe(EventKind::UserModified, Arc::new(Named("audit")));

    assert_eq!(registry.handler_names(EventKind::UserModified), vec!["roles", "audit"]);
    assert_eq!(registry.handler_names(EventKind::RoleAssignmentChanged), vec!["roles"]);
    assert!(registry.handler_names(EventKind::OpinionModified).is_empty());

    let (handlers, _) = registry.into_parts();
    assert_eq!(handlers.len(), 2);
  }
}
