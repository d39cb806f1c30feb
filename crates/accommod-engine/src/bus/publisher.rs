//! The producer side of the bus.

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use accommod_core::{
  event::{DomainEvent, Envelope},
  journal::EventJournal,
};
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use crate::{Error, Result};

/// Counts envelopes published but not yet fully delivered.
#[derive(Default)]
pub(crate) struct Tracker {
  outstanding: AtomicUsize,
  idle:        Notify,
}

impl Tracker {
  pub(crate) fn begin(&self) { self.outstanding.fetch_add(1, Ordering::SeqCst); }

  pub(crate) fn end(&self) {
    if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
      self.idle.notify_waiters();
    }
  }

  pub(crate) fn outstanding(&self) -> usize { self.outstanding.load(Ordering::SeqCst) }

  pub(crate) async fn wait_idle(&self) {
    loop {
      let notified = self.idle.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();
      if self.outstanding() == 0 {
        return;
      }
      notified.await;
    }
  }
}

/// Cheap to clone; every clone feeds the same bus.
#[derive(Clone)]
pub struct Publisher {
  journal: Arc<dyn EventJournal>,
  tx:      mpsc::UnboundedSender<Envelope>,
  tracker: Arc<Tracker>,
}

/// The receiving end handed to [`super::EventBus::spawn`].
pub struct Inbox {
  pub(crate) rx:      mpsc::UnboundedReceiver<Envelope>,
  pub(crate) tx:      mpsc::UnboundedSender<Envelope>,
  pub(crate) journal: Arc<dyn EventJournal>,
  pub(crate) tracker: Arc<Tracker>,
}

impl Publisher {
  pub fn channel(journal: Arc<dyn EventJournal>) -> (Publisher, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let tracker = Arc::new(Tracker::default());
    let publisher = Publisher {
      journal: journal.clone(),
      tx:      tx.clone(),
      tracker: tracker.clone(),
    };
    (publisher, Inbox { rx, tx, journal, tracker })
  }

  /// Journal `event` and queue it for delivery. Returns once the envelope is
  /// durable; handlers run later.
  pub async fn publish(&self, event: DomainEvent) -> Result<Uuid> {
    let envelope = Envelope::new(event);
    let event_id = envelope.event_id;
    self.journal.append(&envelope).await.map_err(Error::Journal)?;
    self.enqueue(envelope)?;
    Ok(event_id)
  }

  /// Queue an envelope that is already in the journal, e.g. one committed
  /// with a derived write.
  pub fn enqueue(&self, envelope: Envelope) -> Result<()> {
    let event_id = envelope.event_id;
    let kind = envelope.event.kind().name();

    self.tracker.begin();
    if self.tx.send(envelope).is_err() {
      // Left pending in the journal; the next start replays it.
      self.tracker.end();
      tracing::warn!(%event_id, kind, "bus closed; event left in journal");
      return Err(Error::BusClosed);
    }

    tracing::debug!(%event_id, kind, "event published");
    Ok(())
  }
}

impl Inbox {
  /// Take the next queued envelope without waiting. Lets callers drive
  /// handlers by hand instead of spawning a bus.
  pub fn try_recv(&mut self) -> Option<Envelope> {
    let envelope = self.rx.try_recv().ok()?;
    self.tracker.end();
    Some(envelope)
  }

  /// Everything currently queued.
  pub fn drain(&mut self) -> Vec<Envelope> {
    std::iter::from_fn(|| self.try_recv()).collect()
  }
}
