//! Core types, pure rules and trait definitions for the accommodation
//! derived-state engine.
//!
//! This crate is deliberately free of HTTP, runtime and database
//! dependencies. Every rule that decides a derived value (roles, opinion
//! state, exam-accommodation decisions, academic-year windows) lives here as a
//! plain function so that handlers, accessors and tests all agree on it.

// Native `async fn` in traits; the `Send` bounds are spelled out in the trait
// signatures themselves.
#![allow(async_fn_in_trait)]

pub mod accommodation;
pub mod calendar;
pub mod decision;
pub mod error;
pub mod event;
pub mod journal;
pub mod migration;
pub mod opinion;
pub mod reference;
pub mod request;
pub mod role;
pub mod store;
pub mod subject;

pub use error::{Error, Result};
