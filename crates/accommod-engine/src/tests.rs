//! Handler and bus tests against an in-memory SQLite store.

use std::{
  sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
  },
  time::Duration,
};

use accommod_core::{
  accommodation::{Accommodation, AccommodationDomain},
  calendar::{AcademicYear, Period},
  decision::DecisionStatus,
  event::{DomainEvent, Envelope, EventKind, Resource},
  journal::EventJournal,
  opinion::{Opinion, OpinionStatus},
  request::{Answer, Request, RequestState},
  role::Role,
  store::AccommodationStore,
  subject::{Assignment, AssignmentKind, Subject},
};
use accommod_store_sqlite::SqliteStore;
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use crate::{
  Error, Result,
  accessors::DerivedState,
  bus::{EventBus, EventHandler, Inbox, Publisher, Registry},
  cache::ResourceCache,
  clock::Clock,
  config::BusConfig,
  handlers::{
    self, Context, DecisionChange, DecisionRecompute, OpinionRecompute, RequestProgress,
    RoleRecompute,
  },
  migrate::Migrator,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate { NaiveDate::from_ymd_opt(y, m, day).unwrap() }

const TODAY: (i32, u32, u32) = (2025, 1, 10);
const YEAR: AcademicYear = AcademicYear::new(2024);

fn today() -> NaiveDate { d(TODAY.0, TODAY.1, TODAY.2) }

async fn setup() -> (Arc<SqliteStore>, Context<SqliteStore>, Inbox) {
  let store = Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"));
  let journal: Arc<dyn EventJournal> = store.clone();
  let (publisher, inbox) = Publisher::channel(journal);
  let ctx = Context::new(store.clone(), publisher).with_clock(Clock::Fixed(today()));
  (store, ctx, inbox)
}

async fn subject(store: &SqliteStore, uid: &str) -> Subject {
  let subject = Subject::new(uid, uid);
  store.save_subject(&subject).await.unwrap();
  subject
}

fn opinion(uid: &str, period: Period, modified_secs: i64) -> Opinion {
  Opinion {
    opinion_id:  Uuid::new_v4(),
    uid:         uid.into(),
    period,
    modified_at: Utc.timestamp_opt(modified_secs, 0).unwrap(),
  }
}

fn exam(uid: &str, period: Period) -> Accommodation {
  Accommodation {
    accommodation_id: Uuid::new_v4(),
    uid:              uid.into(),
    domain:           AccommodationDomain::Exam,
    label:            "extra time".into(),
    period,
    modified_at:      Utc.timestamp_opt(1_000, 0).unwrap(),
  }
}

fn events(inbox: &mut Inbox) -> Vec<DomainEvent> {
  inbox.drain().into_iter().map(|e| e.event).collect()
}

fn fast_config() -> BusConfig {
  BusConfig {
    max_attempts:       3,
    backoff_base_ms:    1,
    backoff_max_ms:     5,
    handler_timeout_ms: 2_000,
    lanes_per_handler:  2,
    batch_size:         2,
  }
}

// ─── Decisions ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn no_facts_means_no_decision() {
  let (store, ctx, mut inbox) = setup().await;
  subject(&store, "alice").await;

  let changes = DecisionRecompute::new(ctx).recompute("alice", None).await.unwrap();

  assert!(changes.is_empty());
  assert!(store.decisions_of("alice").await.unwrap().is_empty());
  assert!(events(&mut inbox).is_empty());
}

#[tokio::test]
async fn opinion_in_progress_creates_a_pending_decision() {
  let (store, ctx, mut inbox) = setup().await;
  subject(&store, "alice").await;
  let op = opinion("alice", Period::open(today()), 1_000);
  store.save_opinion(&op).await.unwrap();

  let changes = DecisionRecompute::new(ctx).recompute("alice", Some(op.period)).await.unwrap();
  assert_eq!(changes.len(), 1);

  let decision = store.find_decision("alice", YEAR).await.unwrap().unwrap();
  assert_eq!(decision.status, DecisionStatus::PendingValidation);

  let emitted = events(&mut inbox);
  let decision_resource = Resource::Decision { uid: "alice".into(), year: YEAR };
  assert!(emitted.contains(&DomainEvent::ResourceModified { resource: decision_resource.clone() }));
  assert!(emitted.contains(&DomainEvent::ResourceCollectionModified { resource: decision_resource }));
  assert!(emitted.contains(&DomainEvent::ResourceModified {
    resource: Resource::User { uid: "alice".into() },
  }));
}

#[tokio::test]
async fn second_recompute_writes_and_emits_nothing() {
  let (store, ctx, mut inbox) = setup().await;
  subject(&store, "alice").await;
  store.save_accommodation(&exam("alice", Period::open(d(2024, 9, 1)))).await.unwrap();
  let handler = DecisionRecompute::new(ctx);

  handler.recompute("alice", None).await.unwrap();
  let first = store.find_decision("alice", YEAR).await.unwrap().unwrap();
  events(&mut inbox);

  let changes = handler.recompute("alice", None).await.unwrap();
  assert!(changes.is_empty());
  assert_eq!(store.find_decision("alice", YEAR).await.unwrap().unwrap(), first);
  assert!(events(&mut inbox).is_empty());
}

#[tokio::test]
async fn edited_decision_survives_the_loss_of_its_reasons() {
  let (store, ctx, _inbox) = setup().await;
  subject(&store, "alice").await;
  let op = opinion("alice", Period::open(today()), 1_000);
  store.save_opinion(&op).await.unwrap();
  let handler = DecisionRecompute::new(ctx);
  handler.recompute("alice", Some(op.period)).await.unwrap();

  let mut decision = store.find_decision("alice", YEAR).await.unwrap().unwrap();
  decision.status = DecisionStatus::Edited;
  assert!(store.save_decision(&decision).await.unwrap());

  store.remove_opinion(op.opinion_id).await.unwrap();
  let changes = handler.recompute("alice", None).await.unwrap();

  assert!(changes.is_empty());
  let kept = store.find_decision("alice", YEAR).await.unwrap().unwrap();
  assert_eq!(kept.status, DecisionStatus::Edited);
}

#[tokio::test]
async fn pending_decision_is_deleted_when_nothing_qualifies() {
  let (store, ctx, mut inbox) = setup().await;
  subject(&store, "alice").await;
  let acc = exam("alice", Period::open(d(2024, 9, 1)));
  store.save_accommodation(&acc).await.unwrap();
  let handler = DecisionRecompute::new(ctx);
  handler.recompute("alice", None).await.unwrap();
  events(&mut inbox);

  store.remove_accommodation(acc.accommodation_id).await.unwrap();
  let changes = handler.recompute("alice", None).await.unwrap();

  assert_eq!(changes, vec![(YEAR, DecisionChange::Deleted)]);
  assert!(store.find_decision("alice", YEAR).await.unwrap().is_none());
  assert!(events(&mut inbox).contains(&DomainEvent::ResourceCollectionModified {
    resource: Resource::Decision { uid: "alice".into(), year: YEAR },
  }));
}

#[tokio::test]
async fn opinion_spanning_years_gets_one_decision_per_year() {
  let (store, ctx, _inbox) = setup().await;
  subject(&store, "alice").await;
  // Past years are judged on their first day, when the opinion was running.
  let op = opinion("alice", Period::open(d(2023, 9, 1)), 1_000);
  store.save_opinion(&op).await.unwrap();

  DecisionRecompute::new(ctx).recompute("alice", Some(op.period)).await.unwrap();

  let years: Vec<_> = store
    .decisions_of("alice")
    .await
    .unwrap()
    .into_iter()
    .map(|d| d.year.start_year())
    .collect();
  assert_eq!(years, vec![2023, 2024]);
}

#[tokio::test]
async fn missing_subject_is_a_stale_event() {
  let (_store, ctx, _inbox) = setup().await;

  let err = DecisionRecompute::new(ctx).recompute("ghost", None).await.unwrap_err();
  assert!(matches!(err, Error::StaleEvent(_)));
  assert!(!err.is_retryable());
}

#[tokio::test]
async fn concurrent_recomputes_agree_on_one_decision() {
  let (store, ctx, _inbox) = setup().await;
  subject(&store, "alice").await;
  store.save_accommodation(&exam("alice", Period::open(d(2024, 9, 1)))).await.unwrap();
  let a = DecisionRecompute::new(ctx.clone());
  let b = DecisionRecompute::new(ctx);

  let (ra, rb) = tokio::join!(a.recompute("alice", None), b.recompute("alice", None));
  let created = ra.unwrap().len() + rb.unwrap().len();

  assert_eq!(created, 1);
  assert_eq!(store.decisions_of("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn announcements_survive_a_closed_bus() {
  let (store, ctx, inbox) = setup().await;
  subject(&store, "alice").await;
  store.save_accommodation(&exam("alice", Period::open(d(2024, 9, 1)))).await.unwrap();
  drop(inbox);

  let handler = DecisionRecompute::new(ctx);
  assert!(matches!(handler.recompute("alice", None).await, Err(Error::BusClosed)));
  assert!(store.find_decision("alice", YEAR).await.unwrap().is_some());
  // The retry has nothing left to write; the announcements are journaled.
  assert!(handler.recompute("alice", None).await.unwrap().is_empty());
  assert_eq!(store.pending().await.unwrap().len(), 3);

  let journal: Arc<dyn EventJournal> = store.clone();
  let (publisher, inbox) = Publisher::channel(journal);
  let cache = Arc::new(ResourceCache::new());
  let epoch = cache.epoch();
  cache.insert("/users/alice", "{}".into(), vec!["/users/alice".into()], epoch);
  let mut registry = Registry::new();
  let ctx = Context::new(store.clone(), publisher).with_clock(Clock::Fixed(today()));
  handlers::register_all(&mut registry, ctx, cache.clone());
  let bus = EventBus::spawn(inbox, registry, fast_config());

  assert_eq!(bus.replay_pending().await.unwrap(), 3);
  bus.settled().await;
  assert!(cache.get("/users/alice").is_none());
  assert!(store.pending().await.unwrap().is_empty());
  bus.shutdown().await;
}

// ─── Opinion state ───────────────────────────────────────────────────────────

#[tokio::test]
async fn most_recently_modified_overlapping_opinion_wins() {
  let (store, ctx, _inbox) = setup().await;
  subject(&store, "alice").await;
  let older = opinion("alice", Period::open(d(2024, 10, 1)), 1_000);
  let newer = opinion("alice", Period::open(d(2024, 12, 1)), 2_000);
  store.save_opinion(&newer).await.unwrap();
  store.save_opinion(&older).await.unwrap();

  assert!(OpinionRecompute::new(ctx).recompute("alice").await.unwrap());

  let state = store.find_opinion_state("alice").await.unwrap().unwrap();
  assert_eq!(state.status, OpinionStatus::InProgress);
  assert_eq!(state.opinion.map(|o| o.opinion_id), Some(newer.opinion_id));
}

#[tokio::test]
async fn opinion_handler_chains_into_decision_handler() {
  let (store, ctx, mut inbox) = setup().await;
  subject(&store, "alice").await;
  let op = opinion("alice", Period::open(today()), 1_000);
  store.save_opinion(&op).await.unwrap();
  let handler = OpinionRecompute::new(ctx);

  let envelope = Envelope::new(DomainEvent::OpinionModified { opinion_id: op.opinion_id, uid: "alice".into() });
  handler.handle(&envelope).await.unwrap();
  let emitted = events(&mut inbox);
  assert!(emitted.contains(&DomainEvent::OpinionStateRecomputed {
    uid:    "alice".into(),
    period: Some(op.period),
  }));
  assert!(emitted.contains(&DomainEvent::ResourceModified {
    resource: Resource::User { uid: "alice".into() },
  }));

  // Unchanged state: only the chained event goes out again.
  handler.handle(&envelope).await.unwrap();
  assert_eq!(events(&mut inbox).len(), 1);
}

#[tokio::test]
async fn accessor_projects_the_stored_state_onto_a_date() {
  let (store, ctx, _inbox) = setup().await;
  subject(&store, "alice").await;
  let op = opinion("alice", Period::new(d(2024, 10, 1), Some(d(2025, 6, 1))).unwrap(), 1_000);
  store.save_opinion(&op).await.unwrap();
  OpinionRecompute::new(ctx).recompute("alice").await.unwrap();

  let state = DerivedState::new(store.clone());
  assert_eq!(state.current_opinion_state("alice", today()).await.unwrap(), OpinionStatus::InProgress);
  assert_eq!(state.current_opinion_state("alice", d(2024, 9, 1)).await.unwrap(), OpinionStatus::Pending);
  assert_eq!(state.current_opinion_state("alice", d(2025, 7, 1)).await.unwrap(), OpinionStatus::Ended);
  assert_eq!(state.current_opinion_state("bob", today()).await.unwrap(), OpinionStatus::None);
}

// ─── Roles ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn manager_and_beneficiary_are_held_together() {
  let (store, ctx, mut inbox) = setup().await;
  let mut alice = subject(&store, "alice").await;
  events(&mut inbox);
  let beneficiary = Assignment {
    assignment_id: Uuid::new_v4(),
    uid:           "alice".into(),
    kind:          AssignmentKind::Beneficiary,
    label:         "profile".into(),
    period:        Period::open(d(2024, 9, 1)),
  };
  store.save_assignment(&beneficiary).await.unwrap();
  let handler = RoleRecompute::new(ctx);
  assert!(handler.recompute("alice").await.unwrap());

  alice.manager = true;
  store.save_subject(&alice).await.unwrap();
  assert!(handler.recompute("alice").await.unwrap());

  let roles = store.find_role_set("alice").await.unwrap().unwrap().roles;
  assert!(roles.contains(&Role::Manager));
  assert!(roles.contains(&Role::Beneficiary));
  assert!(roles.contains(&Role::User));
  // Each change is committed together with the user's announcement.
  let user = DomainEvent::ResourceModified { resource: Resource::User { uid: "alice".into() } };
  assert_eq!(events(&mut inbox), vec![user.clone(), user]);
  assert_eq!(store.pending().await.unwrap().len(), 2);
}

#[tokio::test]
async fn removing_the_granting_fact_removes_the_role() {
  let (store, ctx, _inbox) = setup().await;
  subject(&store, "alice").await;
  let committee = Assignment {
    assignment_id: Uuid::new_v4(),
    uid:           "alice".into(),
    kind:          AssignmentKind::Committee,
    label:         "exam committee".into(),
    period:        Period::open(d(2024, 9, 1)),
  };
  store.save_assignment(&committee).await.unwrap();
  let handler = RoleRecompute::new(ctx);
  handler.recompute("alice").await.unwrap();
  assert!(store.find_role_set("alice").await.unwrap().unwrap().roles.contains(&Role::CommitteeMember));

  store.remove_assignment(committee.assignment_id).await.unwrap();
  assert!(handler.recompute("alice").await.unwrap());
  assert!(!store.find_role_set("alice").await.unwrap().unwrap().roles.contains(&Role::CommitteeMember));

  // And nothing further to do.
  assert!(!handler.recompute("alice").await.unwrap());
}

#[tokio::test]
async fn dangling_service_is_ignored() {
  let (store, ctx, _inbox) = setup().await;
  let mut alice = Subject::new("alice", "Alice");
  alice.services = vec![Uuid::new_v4()];
  store.save_subject(&alice).await.unwrap();

  assert!(!RoleRecompute::new(ctx).recompute("alice").await.unwrap());
  let roles = store.find_role_set("alice").await.unwrap().unwrap().roles;
  assert_eq!(roles.into_iter().collect::<Vec<_>>(), vec![Role::User]);
}

// ─── Requests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn completed_questionnaire_moves_request_to_received() {
  let (store, ctx, mut inbox) = setup().await;
  subject(&store, "alice").await;
  let request = Request {
    request_id:         Uuid::new_v4(),
    uid:                "alice".into(),
    state:              RequestState::Draft,
    required_questions: vec!["q1".into(), "q2".into()],
    modified_at:        Utc::now(),
    version:            0,
  };
  store.save_request(&request).await.unwrap();
  let handler = RequestProgress::new(ctx);

  let answer = |q: &str| Answer {
    request_id:   request.request_id,
    question_id:  q.into(),
    value:        serde_json::json!("yes"),
    submitted_at: Utc::now(),
  };
  store.save_answer(&answer("q1")).await.unwrap();
  assert!(handler.progress(request.request_id).await.unwrap().is_none());

  store.save_answer(&answer("q2")).await.unwrap();
  let envelope = Envelope::new(DomainEvent::QuestionnaireAnswerSubmitted {
    request_id:  request.request_id,
    uid:         "alice".into(),
    question_id: "q2".into(),
  });
  handler.handle(&envelope).await.unwrap();

  let stored = store.find_request(request.request_id).await.unwrap().unwrap();
  assert_eq!(stored.state, RequestState::Received);
  let emitted = events(&mut inbox);
  assert_eq!(emitted.len(), 2);
  assert!(matches!(emitted[1], DomainEvent::RoleAssignmentChanged { .. }));
}

// ─── Bus ─────────────────────────────────────────────────────────────────────

enum Behaviour {
  Succeed,
  Retryable,
  Stale,
  Hang,
}

struct Probe {
  name:      &'static str,
  behaviour: Behaviour,
  calls:     AtomicU32,
}

impl Probe {
  fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
    Arc::new(Self { name, behaviour, calls: AtomicU32::new(0) })
  }

  fn calls(&self) -> u32 { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl EventHandler for Probe {
  fn name(&self) -> &'static str { self.name }

  async fn handle(&self, _envelope: &Envelope) -> Result<()> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match self.behaviour {
      Behaviour::Succeed => Ok(()),
      Behaviour::Retryable => Err(Error::Conflict("probe".into())),
      Behaviour::Stale => Err(Error::StaleEvent("probe".into())),
      Behaviour::Hang => {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
      }
    }
  }
}

async fn bus_with(store: &Arc<SqliteStore>, probes: &[Arc<Probe>], config: BusConfig) -> (Publisher, EventBus) {
  let journal: Arc<dyn EventJournal> = store.clone();
  let (publisher, inbox) = Publisher::channel(journal);
  let mut registry = Registry::new();
  for probe in probes {
    registry.subscribe(EventKind::UserModified, probe.clone());
  }
  (publisher, EventBus::spawn(inbox, registry, config))
}

#[tokio::test]
async fn exhausted_retries_dead_letter_without_touching_other_handlers() {
  let (store, _ctx, _inbox) = setup().await;
  let failing = Probe::new("failing", Behaviour::Retryable);
  let healthy = Probe::new("healthy", Behaviour::Succeed);
  let (publisher, bus) = bus_with(&store, &[failing.clone(), healthy.clone()], fast_config()).await;

  publisher.publish(DomainEvent::UserModified { uid: "alice".into() }).await.unwrap();
  bus.settled().await;

  assert_eq!(failing.calls(), 3);
  assert_eq!(healthy.calls(), 1);
  let letters = store.dead_letters().await.unwrap();
  assert_eq!(letters.len(), 1);
  assert_eq!(letters[0].handler, "failing");
  assert_eq!(letters[0].attempts, 3);
  assert!(store.pending().await.unwrap().is_empty());
  bus.shutdown().await;
}

#[tokio::test]
async fn stale_events_are_not_retried() {
  let (store, _ctx, _inbox) = setup().await;
  let stale = Probe::new("stale", Behaviour::Stale);
  let (publisher, bus) = bus_with(&store, &[stale.clone()], fast_config()).await;

  publisher.publish(DomainEvent::UserModified { uid: "ghost".into() }).await.unwrap();
  bus.settled().await;

  assert_eq!(stale.calls(), 1);
  assert_eq!(store.dead_letters().await.unwrap()[0].attempts, 1);
  bus.shutdown().await;
}

#[tokio::test]
async fn slow_handler_times_out_into_the_retry_policy() {
  let (store, _ctx, _inbox) = setup().await;
  let hang = Probe::new("hang", Behaviour::Hang);
  let config = BusConfig { handler_timeout_ms: 20, max_attempts: 2, ..fast_config() };
  let (publisher, bus) = bus_with(&store, &[hang.clone()], config).await;

  publisher.publish(DomainEvent::UserModified { uid: "alice".into() }).await.unwrap();
  bus.settled().await;

  assert_eq!(hang.calls(), 2);
  let letters = store.dead_letters().await.unwrap();
  assert!(letters[0].error.contains("timed out"));
  bus.shutdown().await;
}

#[tokio::test]
async fn pending_envelopes_are_replayed() {
  let (store, _ctx, _inbox) = setup().await;
  let envelope = Envelope::new(DomainEvent::UserModified { uid: "alice".into() });
  store.append(&envelope).await.unwrap();

  let probe = Probe::new("probe", Behaviour::Succeed);
  let (_publisher, bus) = bus_with(&store, &[probe.clone()], fast_config()).await;
  assert_eq!(bus.replay_pending().await.unwrap(), 1);
  bus.settled().await;

  assert_eq!(probe.calls(), 1);
  assert!(store.pending().await.unwrap().is_empty());
  bus.shutdown().await;
}

/// Blocks every call until released; coalesces everything into one key.
struct Gate {
  calls:   AtomicU32,
  started: Notify,
  release: Semaphore,
}

#[async_trait]
impl EventHandler for Gate {
  fn name(&self) -> &'static str { "gate" }

  fn coalesce_key(&self, _event: &DomainEvent) -> Option<String> { Some("same".into()) }

  async fn handle(&self, _envelope: &Envelope) -> Result<()> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.started.notify_one();
    let _permit = self.release.acquire().await.unwrap();
    Ok(())
  }
}

#[tokio::test]
async fn queued_duplicates_are_coalesced() {
  let (store, _ctx, _inbox) = setup().await;
  let gate = Arc::new(Gate { calls: AtomicU32::new(0), started: Notify::new(), release: Semaphore::new(0) });
  let journal: Arc<dyn EventJournal> = store.clone();
  let (publisher, inbox) = Publisher::channel(journal);
  let mut registry = Registry::new();
  registry.subscribe(EventKind::UserModified, gate.clone());
  let bus = EventBus::spawn(inbox, registry, BusConfig { lanes_per_handler: 1, ..fast_config() });

  let event = || DomainEvent::UserModified { uid: "alice".into() };
  publisher.publish(event()).await.unwrap();
  gate.started.notified().await;

  for _ in 0..3 {
    publisher.publish(event()).await.unwrap();
  }
  // One running, one queued; the other two were absorbed.
  while bus.outstanding() > 2 {
    tokio::time::sleep(Duration::from_millis(1)).await;
  }
  gate.release.add_permits(1);
  bus.settled().await;

  assert_eq!(gate.calls.load(Ordering::SeqCst), 2);
  assert!(store.pending().await.unwrap().is_empty());
  bus.shutdown().await;
}

#[tokio::test]
async fn impacting_change_is_not_absorbed_by_a_queued_no_op() {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  subject(&store, "alice").await;
  let journal: Arc<dyn EventJournal> = store.clone();
  let (publisher, inbox) = Publisher::channel(journal);

  let mut accommodation = exam("alice", Period::open(d(2024, 9, 1)));
  accommodation.domain = AccommodationDomain::Pedagogical;
  store.save_accommodation(&accommodation).await.unwrap();
  let modified = |impacts_decision| DomainEvent::AccommodationModified {
    accommodation_id: accommodation.accommodation_id,
    uid: "alice".into(),
    impacts_decision,
  };
  publisher.publish(modified(false)).await.unwrap();

  accommodation.domain = AccommodationDomain::Exam;
  store.save_accommodation(&accommodation).await.unwrap();
  publisher.publish(modified(true)).await.unwrap();

  // Both deliveries sit in the same lane before any worker runs.
  let mut registry = Registry::new();
  let ctx = Context::new(store.clone(), publisher.clone()).with_clock(Clock::Fixed(today()));
  handlers::register_all(&mut registry, ctx, Arc::new(ResourceCache::new()));
  let bus = EventBus::spawn(inbox, registry, fast_config());
  bus.settled().await;

  let decision = store.find_decision("alice", YEAR).await.unwrap().unwrap();
  assert_eq!(decision.status, DecisionStatus::PendingValidation);
  bus.shutdown().await;
}

// ─── Whole pipeline ──────────────────────────────────────────────────────────

async fn pipeline() -> (Arc<SqliteStore>, Publisher, EventBus, Arc<ResourceCache>) {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let journal: Arc<dyn EventJournal> = store.clone();
  let (publisher, inbox) = Publisher::channel(journal);
  let cache = Arc::new(ResourceCache::new());
  let mut registry = Registry::new();
  let ctx = Context::new(store.clone(), publisher.clone()).with_clock(Clock::Fixed(today()));
  handlers::register_all(&mut registry, ctx, cache.clone());
  let bus = EventBus::spawn(inbox, registry, fast_config());
  (store, publisher, bus, cache)
}

#[tokio::test]
async fn opinion_edit_flows_through_to_decision_and_cache() {
  let (store, publisher, bus, cache) = pipeline().await;
  subject(&store, "alice").await;
  let epoch = cache.epoch();
  cache.insert("/users/alice", "{}".into(), vec!["/users/alice".into()], epoch);

  let op = opinion("alice", Period::open(today()), 1_000);
  store.save_opinion(&op).await.unwrap();
  publisher
    .publish(DomainEvent::OpinionModified { opinion_id: op.opinion_id, uid: "alice".into() })
    .await
    .unwrap();
  bus.settled().await;

  let state = store.find_opinion_state("alice").await.unwrap().unwrap();
  assert_eq!(state.status, OpinionStatus::InProgress);
  let decision = store.find_decision("alice", YEAR).await.unwrap().unwrap();
  assert_eq!(decision.status, DecisionStatus::PendingValidation);
  assert!(cache.get("/users/alice").is_none());
  assert!(store.pending().await.unwrap().is_empty());
  assert!(store.dead_letters().await.unwrap().is_empty());
  bus.shutdown().await;
}

#[tokio::test]
async fn answered_questionnaire_grants_applicant_role() {
  let (store, publisher, bus, _cache) = pipeline().await;
  subject(&store, "alice").await;
  let request = Request {
    request_id:         Uuid::new_v4(),
    uid:                "alice".into(),
    state:              RequestState::Draft,
    required_questions: vec!["q1".into()],
    modified_at:        Utc::now(),
    version:            0,
  };
  store.save_request(&request).await.unwrap();
  store
    .save_answer(&Answer {
      request_id:   request.request_id,
      question_id:  "q1".into(),
      value:        serde_json::json!(true),
      submitted_at: Utc::now(),
    })
    .await
    .unwrap();

  publisher
    .publish(DomainEvent::QuestionnaireAnswerSubmitted {
      request_id:  request.request_id,
      uid:         "alice".into(),
      question_id: "q1".into(),
    })
    .await
    .unwrap();
  bus.settled().await;

  let roles = store.find_role_set("alice").await.unwrap().unwrap().roles;
  assert!(roles.contains(&Role::Applicant));
  bus.shutdown().await;
}

#[tokio::test]
async fn event_for_deleted_subject_is_dead_lettered() {
  let (store, publisher, bus, _cache) = pipeline().await;

  publisher.publish(DomainEvent::UserModified { uid: "ghost".into() }).await.unwrap();
  bus.settled().await;

  let letters = store.dead_letters().await.unwrap();
  assert_eq!(letters.len(), 1);
  assert_eq!(letters[0].handler, "role_recompute");
  assert_eq!(letters[0].attempts, 1);
  bus.shutdown().await;
}

// ─── Migrations ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn migrations_run_once_per_version() {
  let (store, ctx, mut inbox) = setup().await;
  for uid in ["alice", "bob", "carol"] {
    subject(&store, uid).await;
  }
  let migrator = Migrator::new(store.clone(), ctx.publisher.clone(), 2).with_default_jobs();

  let applied = migrator.run_pending().await.unwrap();
  assert_eq!(applied.len(), 2);
  assert!(applied.iter().all(|m| m.items == 3));
  // Roles: one event per subject. Derived state: user + opinion per subject.
  assert_eq!(events(&mut inbox).len(), 3 + 6);

  assert!(migrator.run_pending().await.unwrap().is_empty());
  assert!(events(&mut inbox).is_empty());
}

#[tokio::test]
async fn bulk_retrigger_leaves_settled_state_alone() {
  let (store, publisher, bus, _cache) = pipeline().await;
  subject(&store, "alice").await;
  store.save_accommodation(&exam("alice", Period::open(d(2024, 9, 1)))).await.unwrap();

  crate::migrate::retrigger_all(store.as_ref(), &publisher, 10).await.unwrap();
  bus.settled().await;
  let first = store.find_decision("alice", YEAR).await.unwrap().unwrap();

  crate::migrate::retrigger_all(store.as_ref(), &publisher, 10).await.unwrap();
  bus.settled().await;
  assert_eq!(store.find_decision("alice", YEAR).await.unwrap().unwrap(), first);
  bus.shutdown().await;
}
