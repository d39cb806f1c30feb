//! [`EventJournal`] on top of the same SQLite file as the facts.

use accommod_core::{
  event::Envelope,
  journal::{DeadLetter, EventJournal, JournalError},
};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
  SqliteStore,
  encode::{decode_dt, decode_uuid, encode_dt, encode_uuid},
};

/// One `event_journal` row, encoded on the async side.
pub(crate) struct JournalRow {
  event_id:     String,
  kind:         &'static str,
  envelope:     String,
  published_at: String,
}

impl JournalRow {
  pub(crate) fn encode(envelope: &Envelope) -> serde_json::Result<Self> {
    Ok(Self {
      event_id:     encode_uuid(envelope.event_id),
      kind:         envelope.event.kind().name(),
      envelope:     serde_json::to_string(envelope)?,
      published_at: encode_dt(envelope.published_at),
    })
  }

  /// Re-appending an envelope already journaled is a no-op.
  pub(crate) fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute(
      "INSERT OR IGNORE INTO event_journal (event_id, kind, envelope, published_at)
       VALUES (?1, ?2, ?3, ?4)",
      rusqlite::params![self.event_id, self.kind, self.envelope, self.published_at],
    )?;
    Ok(())
  }
}

#[async_trait]
impl EventJournal for SqliteStore {
  async fn append(&self, envelope: &Envelope) -> Result<(), JournalError> {
    let row = JournalRow::encode(envelope)?;
    self.conn.call(move |conn| Ok(row.insert(conn)?)).await?;
    Ok(())
  }

  async fn complete(&self, event_id: Uuid) -> Result<(), JournalError> {
    let event_id = encode_uuid(event_id);
    let now = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE event_journal SET completed_at = ?2
           WHERE event_id = ?1 AND completed_at IS NULL",
          rusqlite::params![event_id, now],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn pending(&self) -> Result<Vec<Envelope>, JournalError> {
    let rows: Vec<String> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT envelope FROM event_journal
           WHERE completed_at IS NULL
           ORDER BY published_at, rowid",
        )?;
        let rows = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let envelopes = rows
      .iter()
      .map(|json| serde_json::from_str(json))
      .collect::<Result<Vec<Envelope>, _>>()?;
    Ok(envelopes)
  }

  async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), JournalError> {
    let id        = encode_uuid(letter.dead_letter_id);
    let event_id  = encode_uuid(letter.envelope.event_id);
    let handler   = letter.handler.clone();
    let error     = letter.error.clone();
    let attempts  = letter.attempts;
    let failed_at = encode_dt(letter.failed_at);
    let envelope  = serde_json::to_string(&letter.envelope)?;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO dead_letters
             (dead_letter_id, event_id, handler, error, attempts, failed_at, envelope)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![id, event_id, handler, error, attempts, failed_at, envelope],
        )?;
        Ok(())
      })
      .await?;
    tracing::debug!(handler = %letter.handler, event_id = %letter.envelope.event_id, "dead letter stored");
    Ok(())
  }

  async fn dead_letters(&self) -> Result<Vec<DeadLetter>, JournalError> {
    type Row = (String, String, String, u32, String, String);

    let rows: Vec<Row> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT dead_letter_id, handler, error, attempts, failed_at, envelope
           FROM dead_letters ORDER BY failed_at, rowid",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut letters = Vec::with_capacity(rows.len());
    for (id, handler, error, attempts, failed_at, envelope) in rows {
      letters.push(DeadLetter {
        dead_letter_id: decode_uuid(&id)?,
        envelope: serde_json::from_str(&envelope)?,
        handler,
        error,
        attempts,
        failed_at: decode_dt(&failed_at)?,
      });
    }
    Ok(letters)
  }
}
