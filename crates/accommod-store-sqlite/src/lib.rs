//! SQLite backend for the accommodation store and event journal.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Derived rows are written with
//! version-checked `UPDATE`s so concurrent recomputes cannot lose updates,
//! optionally together with the journal rows announcing them.

mod derived;
mod encode;
mod journal;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
