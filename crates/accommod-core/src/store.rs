//! The `AccommodationStore` trait.
//!
//! Implemented by storage backends (e.g. `accommod-store-sqlite`). The
//! engine and the API depend on this abstraction only.
//!
//! Source-of-truth facts (subjects, assignments, requests, opinions,
//! accommodations) are plain find/save/remove. Derived rows (role sets,
//! opinion states, decisions) are written with compare-and-swap on their
//! `version`: a save returns `false` when another writer got there first, and
//! the caller is expected to re-read and recompute.
//!
//! [`AccommodationStore::commit_derived`] performs the same versioned writes
//! and journals the events announcing them in one transaction, so a change
//! is never stored without its follow-up events.

use std::future::Future;

use uuid::Uuid;

use crate::{
  accommodation::Accommodation,
  calendar::AcademicYear,
  decision::Decision,
  event::Envelope,
  migration::AppliedMigration,
  opinion::{Opinion, OpinionState},
  reference::{ReferenceOption, ReferenceTable},
  request::{Answer, Request},
  role::RoleSet,
  subject::{Assignment, Service, Subject},
};

/// A page of a listing, used to walk large tables in bounded batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
  pub offset: usize,
  pub limit:  usize,
}

impl Page {
  pub fn first(limit: usize) -> Self { Self { offset: 0, limit } }

  pub fn next(self) -> Self { Self { offset: self.offset + self.limit, ..self } }
}

/// A versioned write of one derived row.
#[derive(Debug, Clone)]
pub enum DerivedWrite {
  RoleSet(RoleSet),
  OpinionState(OpinionState),
  Decision(Decision),
  RemoveDecision(Decision),
  Request(Request),
}

pub trait AccommodationStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Subjects ──────────────────────────────────────────────────────────

  /// Insert or update a subject. A newly created subject also receives its
  /// initial role set. Returns `true` if the subject was created.
  fn save_subject<'a>(
    &'a self,
    subject: &'a Subject,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn find_subject<'a>(
    &'a self,
    uid: &'a str,
  ) -> impl Future<Output = Result<Option<Subject>, Self::Error>> + Send + 'a;

  /// Subjects ordered by uid.
  fn list_subjects(
    &self,
    page: Page,
  ) -> impl Future<Output = Result<Vec<Subject>, Self::Error>> + Send + '_;

  // ── Services ──────────────────────────────────────────────────────────

  fn save_service<'a>(
    &'a self,
    service: &'a Service,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn find_service(
    &self,
    service_id: Uuid,
  ) -> impl Future<Output = Result<Option<Service>, Self::Error>> + Send + '_;

  // ── Assignments ───────────────────────────────────────────────────────

  fn save_assignment<'a>(
    &'a self,
    assignment: &'a Assignment,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn find_assignment(
    &self,
    assignment_id: Uuid,
  ) -> impl Future<Output = Result<Option<Assignment>, Self::Error>> + Send + '_;

  /// Returns `true` if a row was removed.
  fn remove_assignment(
    &self,
    assignment_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn assignments_of<'a>(
    &'a self,
    uid: &'a str,
  ) -> impl Future<Output = Result<Vec<Assignment>, Self::Error>> + Send + 'a;

  // ── Requests and answers ──────────────────────────────────────────────

  /// CAS on `request.version`; a version of 0 inserts. Returns `false` on a
  /// lost race.
  fn save_request<'a>(
    &'a self,
    request: &'a Request,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn find_request(
    &self,
    request_id: Uuid,
  ) -> impl Future<Output = Result<Option<Request>, Self::Error>> + Send + '_;

  fn requests_of<'a>(
    &'a self,
    uid: &'a str,
  ) -> impl Future<Output = Result<Vec<Request>, Self::Error>> + Send + 'a;

  /// Insert or replace the answer to one question.
  fn save_answer<'a>(
    &'a self,
    answer: &'a Answer,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn answers_of(
    &self,
    request_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Answer>, Self::Error>> + Send + '_;

  // ── Opinions ──────────────────────────────────────────────────────────

  fn save_opinion<'a>(
    &'a self,
    opinion: &'a Opinion,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn find_opinion(
    &self,
    opinion_id: Uuid,
  ) -> impl Future<Output = Result<Option<Opinion>, Self::Error>> + Send + '_;

  fn remove_opinion(
    &self,
    opinion_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn opinions_of<'a>(
    &'a self,
    uid: &'a str,
  ) -> impl Future<Output = Result<Vec<Opinion>, Self::Error>> + Send + 'a;

  // ── Accommodations ────────────────────────────────────────────────────

  fn save_accommodation<'a>(
    &'a self,
    accommodation: &'a Accommodation,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn find_accommodation(
    &self,
    accommodation_id: Uuid,
  ) -> impl Future<Output = Result<Option<Accommodation>, Self::Error>> + Send + '_;

  fn remove_accommodation(
    &self,
    accommodation_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn accommodations_of<'a>(
    &'a self,
    uid: &'a str,
  ) -> impl Future<Output = Result<Vec<Accommodation>, Self::Error>> + Send + 'a;

  // ── Derived: role sets ────────────────────────────────────────────────

  fn find_role_set<'a>(
    &'a self,
    uid: &'a str,
  ) -> impl Future<Output = Result<Option<RoleSet>, Self::Error>> + Send + 'a;

  /// CAS on `role_set.version`; a version of 0 inserts.
  fn save_role_set<'a>(
    &'a self,
    role_set: &'a RoleSet,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Derived: opinion states ───────────────────────────────────────────

  fn find_opinion_state<'a>(
    &'a self,
    uid: &'a str,
  ) -> impl Future<Output = Result<Option<OpinionState>, Self::Error>> + Send + 'a;

  /// CAS on `state.version`; a version of 0 inserts.
  fn save_opinion_state<'a>(
    &'a self,
    state: &'a OpinionState,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Derived: decisions ────────────────────────────────────────────────

  fn find_decision<'a>(
    &'a self,
    uid: &'a str,
    year: AcademicYear,
  ) -> impl Future<Output = Result<Option<Decision>, Self::Error>> + Send + 'a;

  /// All decisions of a subject, oldest year first.
  fn decisions_of<'a>(
    &'a self,
    uid: &'a str,
  ) -> impl Future<Output = Result<Vec<Decision>, Self::Error>> + Send + 'a;

  /// CAS on `decision.version`; a version of 0 inserts and fails if the
  /// (subject, year) slot is already taken.
  fn save_decision<'a>(
    &'a self,
    decision: &'a Decision,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Delete only if the stored version still equals `decision.version`.
  fn remove_decision<'a>(
    &'a self,
    decision: &'a Decision,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Apply `write` with the same version check as the matching save, and
  /// if it applies, append `outbox` to the event journal in the same
  /// transaction. Returns whether the write applied; when it did not,
  /// nothing is journaled.
  fn commit_derived<'a>(
    &'a self,
    write: &'a DerivedWrite,
    outbox: &'a [Envelope],
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Migrations ────────────────────────────────────────────────────────

  fn find_migration<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<AppliedMigration>, Self::Error>> + Send + 'a;

  fn record_migration<'a>(
    &'a self,
    migration: &'a AppliedMigration,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Reference tables ──────────────────────────────────────────────────

  fn reference_options(
    &self,
    table: ReferenceTable,
  ) -> impl Future<Output = Result<Vec<ReferenceOption>, Self::Error>> + Send + '_;
}
