//! Fan-out, per-handler lanes, retries and dead-lettering.

use std::{
  collections::{HashMap, HashSet},
  hash::{DefaultHasher, Hash, Hasher},
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
};

use accommod_core::{
  event::{DomainEvent, Envelope, EventKind},
  journal::{DeadLetter, EventJournal},
};
use chrono::Utc;
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use super::{EventHandler, Inbox, Registry, publisher::Tracker};
use crate::{Error, Result, config::BusConfig};

// ─── Shared state ────────────────────────────────────────────────────────────

struct Shared {
  journal: Arc<dyn EventJournal>,
  tracker: Arc<Tracker>,
  config:  BusConfig,
}

/// One envelope on its way to every subscribed handler.
struct Delivery {
  envelope:     Arc<Envelope>,
  remaining:    AtomicUsize,
  /// Set when a dead letter could not be stored; the journal entry is then
  /// left pending so a restart retries it.
  keep_pending: AtomicBool,
}

impl Shared {
  /// One handler is done with `delivery`, for good.
  async fn finish(&self, delivery: &Delivery) {
    if delivery.remaining.fetch_sub(1, Ordering::SeqCst) != 1 {
      return;
    }
    let event_id = delivery.envelope.event_id;
    if !delivery.keep_pending.load(Ordering::SeqCst)
      && let Err(e) = self.journal.complete(event_id).await
    {
      tracing::error!(%event_id, error = %e, "could not mark event complete; it will be replayed");
    }
    self.tracker.end();
  }
}

// ─── Lanes ───────────────────────────────────────────────────────────────────

struct Job {
  delivery: Arc<Delivery>,
  attempt:  u32,
  coalesce: Option<String>,
}

enum Push {
  Queued,
  Coalesced(Job),
  Closed,
}

/// A FIFO worker queue. `waiting` holds the coalesce keys of jobs queued but
/// not yet picked up.
#[derive(Clone)]
struct Lane {
  tx:      mpsc::UnboundedSender<Job>,
  waiting: Arc<Mutex<HashSet<String>>>,
}

impl Lane {
  fn push(&self, job: Job) -> Push {
    let mut waiting = self.waiting.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(key) = &job.coalesce {
      if waiting.contains(key) {
        return Push::Coalesced(job);
      }
      waiting.insert(key.clone());
    }
    let key = job.coalesce.clone();
    match self.tx.send(job) {
      Ok(()) => Push::Queued,
      Err(_) => {
        if let Some(key) = key {
          waiting.remove(&key);
        }
        Push::Closed
      }
    }
  }

  fn started(&self, job: &Job) {
    if let Some(key) = &job.coalesce {
      self
        .waiting
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(key);
    }
  }
}

struct HandlerLanes {
  handler: Arc<dyn EventHandler>,
  lanes:   Vec<Lane>,
}

impl HandlerLanes {
  fn lane_for(&self, event: &DomainEvent) -> &Lane {
    let mut hasher = DefaultHasher::new();
    self.handler.lane_key(event).hash(&mut hasher);
    &self.lanes[(hasher.finish() % self.lanes.len() as u64) as usize]
  }
}

// ─── Bus ─────────────────────────────────────────────────────────────────────

/// The running consumer side. Dropping it leaves the tasks running; call
/// [`EventBus::shutdown`] to stop them.
pub struct EventBus {
  tasks:  Vec<JoinHandle<()>>,
  tx:     mpsc::UnboundedSender<Envelope>,
  shared: Arc<Shared>,
}

impl EventBus {
  /// Start the dispatcher and every handler's lanes on the current runtime.
  pub fn spawn(inbox: Inbox, registry: Registry, config: BusConfig) -> Self {
    let Inbox { rx, tx, journal, tracker } = inbox;
    let shared = Arc::new(Shared { journal, tracker, config });
    let (handlers, routes) = registry.into_parts();

    let mut tasks = Vec::new();
    let mut fanout = Vec::with_capacity(handlers.len());
    for handler in handlers {
      let lanes = (0..shared.config.lanes())
        .map(|_| {
          let (lane_tx, lane_rx) = mpsc::unbounded_channel();
          let lane = Lane { tx: lane_tx, waiting: Arc::default() };
          tasks.push(tokio::spawn(run_lane(
            handler.clone(),
            lane.clone(),
            lane_rx,
            shared.clone(),
          )));
          lane
        })
        .collect();
      fanout.push(HandlerLanes { handler, lanes });
    }

    tracing::info!(
      handlers = fanout.len(),
      lanes = shared.config.lanes(),
      "event bus started"
    );
    tasks.push(tokio::spawn(dispatch(rx, fanout, routes, shared.clone())));

    Self { tasks, tx, shared }
  }

  /// Re-dispatch every envelope the journal still holds as pending.
  pub async fn replay_pending(&self) -> Result<usize> {
    let pending = self.shared.journal.pending().await.map_err(Error::Journal)?;
    let count = pending.len();
    for envelope in pending {
      self.shared.tracker.begin();
      if self.tx.send(envelope).is_err() {
        self.shared.tracker.end();
        return Err(Error::BusClosed);
      }
    }
    if count > 0 {
      tracing::info!(count, "replaying pending events");
    }
    Ok(count)
  }

  /// Resolves once nothing published is still being delivered, including
  /// everything the handlers published in turn.
  pub async fn settled(&self) { self.shared.tracker.wait_idle().await }

  pub fn outstanding(&self) -> usize { self.shared.tracker.outstanding() }

  /// Stop the dispatcher and all lanes. Undelivered envelopes stay pending in
  /// the journal.
  pub async fn shutdown(self) {
    for task in &self.tasks {
      task.abort();
    }
    for task in self.tasks {
      let _ = task.await;
    }
    tracing::info!("event bus stopped");
  }
}

// ─── Tasks ───────────────────────────────────────────────────────────────────

async fn dispatch(
  mut rx: mpsc::UnboundedReceiver<Envelope>,
  fanout: Vec<HandlerLanes>,
  routes: HashMap<EventKind, Vec<usize>>,
  shared: Arc<Shared>,
) {
  while let Some(envelope) = rx.recv().await {
    let kind = envelope.event.kind();
    let route = routes.get(&kind).map(Vec::as_slice).unwrap_or_default();
    let delivery = Arc::new(Delivery {
      envelope:     Arc::new(envelope),
      remaining:    AtomicUsize::new(route.len().max(1)),
      keep_pending: AtomicBool::new(false),
    });

    if route.is_empty() {
      tracing::debug!(event_id = %delivery.envelope.event_id, kind = kind.name(), "no subscriber");
      shared.finish(&delivery).await;
      continue;
    }

    for &index in route {
      let target = &fanout[index];
      let event = &delivery.envelope.event;
      let job = Job {
        delivery: delivery.clone(),
        attempt:  1,
        coalesce: target.handler.coalesce_key(event),
      };
      match target.lane_for(event).push(job) {
        Push::Queued => {}
        Push::Coalesced(job) => {
          tracing::debug!(
            handler = target.handler.name(),
            event_id = %delivery.envelope.event_id,
            "coalesced into a queued delivery"
          );
          shared.finish(&job.delivery).await;
        }
        Push::Closed => {
          tracing::warn!(handler = target.handler.name(), "lane closed; event left pending");
        }
      }
    }
  }
}

async fn run_lane(
  handler: Arc<dyn EventHandler>,
  lane: Lane,
  mut rx: mpsc::UnboundedReceiver<Job>,
  shared: Arc<Shared>,
) {
  while let Some(job) = rx.recv().await {
    lane.started(&job);
    deliver(handler.as_ref(), &lane, job, &shared).await;
  }
}

async fn deliver(handler: &dyn EventHandler, lane: &Lane, job: Job, shared: &Arc<Shared>) {
  let name = handler.name();
  let event_id = job.delivery.envelope.event_id;
  let attempt = job.attempt;
  let budget = shared.config.handler_timeout();

  let outcome = match tokio::time::timeout(budget, handler.handle(&job.delivery.envelope)).await {
    Ok(result) => result,
    Err(_) => Err(Error::Timeout(budget)),
  };

  match outcome {
    Ok(()) => {
      tracing::debug!(handler = name, %event_id, attempt, "delivered");
      shared.finish(&job.delivery).await;
    }
    Err(error) if error.is_retryable() && attempt < shared.config.max_attempts => {
      let delay = shared.config.backoff(attempt);
      tracing::warn!(handler = name, %event_id, attempt, %error, ?delay, "delivery failed; retrying");

      let lane = lane.clone();
      let shared = shared.clone();
      let job = Job { attempt: attempt + 1, ..job };
      tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match lane.push(job) {
          Push::Coalesced(job) => shared.finish(&job.delivery).await,
          Push::Queued | Push::Closed => {}
        }
      });
    }
    Err(error) => dead_letter(name, job, error, shared).await,
  }
}

async fn dead_letter(handler: &'static str, job: Job, error: Error, shared: &Shared) {
  let envelope = &job.delivery.envelope;
  tracing::error!(
    handler,
    event_id = %envelope.event_id,
    kind = envelope.event.kind().name(),
    uid = envelope.event.subject_uid().unwrap_or_default(),
    attempts = job.attempt,
    %error,
    "delivery dead-lettered"
  );

  let letter = DeadLetter {
    dead_letter_id: Uuid::new_v4(),
    envelope:       (**envelope).clone(),
    handler:        handler.to_string(),
    error:          error.to_string(),
    attempts:       job.attempt,
    failed_at:      Utc::now(),
  };
  if let Err(e) = shared.journal.dead_letter(&letter).await {
    tracing::error!(handler, event_id = %envelope.event_id, error = %e, "could not store dead letter; event kept pending");
    job.delivery.keep_pending.store(true, Ordering::SeqCst);
  }
  shared.finish(&job.delivery).await;
}
