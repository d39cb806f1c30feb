//! The derived-state recomputation engine.
//!
//! Producers [`bus::Publisher::publish`] domain events; the [`bus::EventBus`]
//! delivers them at least once to the recompute [`handlers`], which re-read
//! the current facts from an [`accommod_core::store::AccommodationStore`] and
//! write derived rows only when they change. Every write announces the
//! resources it touched, and the [`handlers::CacheInvalidator`] drops the
//! matching entries from the [`cache::ResourceCache`].
//!
//! # Wiring
//!
//! ```rust,ignore
//! let (publisher, inbox) = Publisher::channel(journal);
//! let mut registry = Registry::new();
//! handlers::register_all(&mut registry, Context::new(store, publisher.clone()), cache);
//! let bus = EventBus::spawn(inbox, registry, config.bus);
//! bus.replay_pending().await?;
//! ```

pub mod accessors;
pub mod bus;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod migrate;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
