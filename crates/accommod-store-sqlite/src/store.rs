//! [`SqliteStore`], the SQLite implementation of [`AccommodationStore`].

use std::path::Path;

use accommod_core::{
  accommodation::Accommodation,
  calendar::AcademicYear,
  decision::Decision,
  event::Envelope,
  migration::AppliedMigration,
  opinion::{Opinion, OpinionState},
  reference::{ReferenceOption, ReferenceTable},
  request::{Answer, Request},
  role::RoleSet,
  store::{AccommodationStore, DerivedWrite, Page},
  subject::{Assignment, Service, Subject},
};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Result,
  derived::EncodedWrite,
  encode::{
    RawAccommodation, RawAnswer, RawAssignment, RawDecision, RawOpinion,
    RawOpinionState, RawRequest, RawRoleSet, RawSubject, decode_dt, encode_date,
    encode_dt, encode_roles, encode_uuid, encode_uuids,
  },
  journal::JournalRow,
  schema::SCHEMA,
};

type RowMapper<R> = fn(&rusqlite::Row<'_>) -> rusqlite::Result<R>;

// ─── Store ───────────────────────────────────────────────────────────────────

/// An accommodation store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    tracing::debug!("sqlite schema initialised");
    Ok(())
  }

  /// Run `sql` with a single text parameter and map every row.
  async fn select_by<R>(&self, sql: String, key: String, map: RowMapper<R>) -> Result<Vec<R>>
  where
    R: Send + 'static,
  {
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![key], map)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(rows)
  }

  /// Like [`Self::select_by`] but expects at most one row.
  async fn select_one_by<R>(&self, sql: String, key: String, map: RowMapper<R>) -> Result<Option<R>>
  where
    R: Send + 'static,
  {
    let row = self
      .conn
      .call(move |conn| Ok(conn.query_row(&sql, rusqlite::params![key], map).optional()?))
      .await?;
    Ok(row)
  }

  async fn write_derived(&self, write: EncodedWrite) -> Result<bool> {
    Ok(self.conn.call(move |conn| Ok(write.apply(conn)?)).await?)
  }

  /// Delete by primary key; `true` if a row went away.
  async fn delete_by(&self, sql: &'static str, key: String) -> Result<bool> {
    let removed = self
      .conn
      .call(move |conn| Ok(conn.execute(sql, rusqlite::params![key])? == 1))
      .await?;
    Ok(removed)
  }
}

fn raw_answer(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAnswer> {
  Ok(RawAnswer {
    request_id:   row.get(0)?,
    question_id:  row.get(1)?,
    value_json:   row.get(2)?,
    submitted_at: row.get(3)?,
  })
}

fn raw_role_set(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRoleSet> {
  Ok(RawRoleSet {
    uid:         row.get(0)?,
    roles:       row.get(1)?,
    computed_at: row.get(2)?,
    version:     row.get(3)?,
  })
}

fn raw_opinion_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawOpinionState> {
  Ok(RawOpinionState {
    uid:           row.get(0)?,
    status:        row.get(1)?,
    opinion_id:    row.get(2)?,
    opinion_start: row.get(3)?,
    opinion_end:   row.get(4)?,
    computed_at:   row.get(5)?,
    version:       row.get(6)?,
  })
}

fn raw_service(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, bool)> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn raw_migration(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, u32, String, i64)> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

// ─── AccommodationStore impl ─────────────────────────────────────────────────

impl AccommodationStore for SqliteStore {
  type Error = crate::Error;

  // ── Subjects ──────────────────────────────────────────────────────────────

  async fn save_subject(&self, subject: &Subject) -> Result<bool> {
    let uid          = subject.uid.clone();
    let display_name = subject.display_name.clone();
    let created_at   = encode_dt(subject.created_at);
    let admin        = subject.admin;
    let manager      = subject.manager;
    let renfort      = subject.renfort;
    let services     = encode_uuids(&subject.services)?;
    let initial      = RoleSet::initial(&subject.uid);
    let roles        = encode_roles(&initial.roles)?;
    let computed_at  = encode_dt(initial.computed_at);

    let created = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let exists = tx
          .query_row(
            "SELECT 1 FROM subjects WHERE uid = ?1",
            rusqlite::params![uid],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);

        if exists {
          tx.execute(
            "UPDATE subjects
             SET display_name = ?2, admin = ?3, manager = ?4, renfort = ?5, services = ?6
             WHERE uid = ?1",
            rusqlite::params![uid, display_name, admin, manager, renfort, services],
          )?;
        } else {
          tx.execute(
            "INSERT INTO subjects (uid, display_name, created_at, admin, manager, renfort, services)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![uid, display_name, created_at, admin, manager, renfort, services],
          )?;
          tx.execute(
            "INSERT OR IGNORE INTO role_sets (uid, roles, computed_at, version)
             VALUES (?1, ?2, ?3, 1)",
            rusqlite::params![uid, roles, computed_at],
          )?;
        }
        tx.commit()?;
        Ok(!exists)
      })
      .await?;

    Ok(created)
  }

  async fn find_subject(&self, uid: &str) -> Result<Option<Subject>> {
    let sql = format!("SELECT {} FROM subjects WHERE uid = ?1", RawSubject::COLUMNS);
    self
      .select_one_by(sql, uid.to_owned(), RawSubject::from_row)
      .await?
      .map(RawSubject::into_subject)
      .transpose()
  }

  async fn list_subjects(&self, page: Page) -> Result<Vec<Subject>> {
    let sql = format!(
      "SELECT {} FROM subjects ORDER BY uid LIMIT ?1 OFFSET ?2",
      RawSubject::COLUMNS
    );
    let limit = page.limit as i64;
    let offset = page.offset as i64;

    let raws: Vec<RawSubject> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![limit, offset], RawSubject::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSubject::into_subject).collect()
  }

  // ── Services ──────────────────────────────────────────────────────────────

  async fn save_service(&self, service: &Service) -> Result<()> {
    let id     = encode_uuid(service.service_id);
    let name   = service.name.clone();
    let active = service.active;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO services (service_id, name, active) VALUES (?1, ?2, ?3)
           ON CONFLICT(service_id) DO UPDATE SET name = excluded.name, active = excluded.active",
          rusqlite::params![id, name, active],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn find_service(&self, service_id: Uuid) -> Result<Option<Service>> {
    let raw = self
      .select_one_by(
        "SELECT service_id, name, active FROM services WHERE service_id = ?1".to_string(),
        encode_uuid(service_id),
        raw_service,
      )
      .await?;

    Ok(raw.map(|(_, name, active)| Service { service_id, name, active }))
  }

  // ── Assignments ───────────────────────────────────────────────────────────

  async fn save_assignment(&self, assignment: &Assignment) -> Result<()> {
    let id    = encode_uuid(assignment.assignment_id);
    let uid   = assignment.uid.clone();
    let kind  = assignment.kind.discriminant();
    let label = assignment.label.clone();
    let start = encode_date(assignment.period.start);
    let end   = assignment.period.end.map(encode_date);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO assignments
             (assignment_id, uid, kind, label, start_date, end_date)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![id, uid, kind, label, start, end],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn find_assignment(&self, assignment_id: Uuid) -> Result<Option<Assignment>> {
    let sql = format!(
      "SELECT {} FROM assignments WHERE assignment_id = ?1",
      RawAssignment::COLUMNS
    );
    self
      .select_one_by(sql, encode_uuid(assignment_id), RawAssignment::from_row)
      .await?
      .map(RawAssignment::into_assignment)
      .transpose()
  }

  async fn remove_assignment(&self, assignment_id: Uuid) -> Result<bool> {
    self
      .delete_by(
        "DELETE FROM assignments WHERE assignment_id = ?1",
        encode_uuid(assignment_id),
      )
      .await
  }

  async fn assignments_of(&self, uid: &str) -> Result<Vec<Assignment>> {
    let sql = format!(
      "SELECT {} FROM assignments WHERE uid = ?1 ORDER BY start_date",
      RawAssignment::COLUMNS
    );
    self
      .select_by(sql, uid.to_owned(), RawAssignment::from_row)
      .await?
      .into_iter()
      .map(RawAssignment::into_assignment)
      .collect()
  }

  // ── Requests and answers ──────────────────────────────────────────────────

  async fn save_request(&self, request: &Request) -> Result<bool> {
    self.write_derived(EncodedWrite::request(request)?).await
  }

  async fn find_request(&self, request_id: Uuid) -> Result<Option<Request>> {
    let sql = format!("SELECT {} FROM requests WHERE request_id = ?1", RawRequest::COLUMNS);
    self
      .select_one_by(sql, encode_uuid(request_id), RawRequest::from_row)
      .await?
      .map(RawRequest::into_request)
      .transpose()
  }

  async fn requests_of(&self, uid: &str) -> Result<Vec<Request>> {
    let sql = format!(
      "SELECT {} FROM requests WHERE uid = ?1 ORDER BY modified_at",
      RawRequest::COLUMNS
    );
    self
      .select_by(sql, uid.to_owned(), RawRequest::from_row)
      .await?
      .into_iter()
      .map(RawRequest::into_request)
      .collect()
  }

  async fn save_answer(&self, answer: &Answer) -> Result<()> {
    let request_id   = encode_uuid(answer.request_id);
    let question_id  = answer.question_id.clone();
    let value_json   = answer.value.to_string();
    let submitted_at = encode_dt(answer.submitted_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO answers (request_id, question_id, value_json, submitted_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![request_id, question_id, value_json, submitted_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn answers_of(&self, request_id: Uuid) -> Result<Vec<Answer>> {
    self
      .select_by(
        "SELECT request_id, question_id, value_json, submitted_at
         FROM answers WHERE request_id = ?1 ORDER BY question_id"
          .to_string(),
        encode_uuid(request_id),
        raw_answer,
      )
      .await?
      .into_iter()
      .map(RawAnswer::into_answer)
      .collect()
  }

  // ── Opinions ──────────────────────────────────────────────────────────────

  async fn save_opinion(&self, opinion: &Opinion) -> Result<()> {
    let id          = encode_uuid(opinion.opinion_id);
    let uid         = opinion.uid.clone();
    let start       = encode_date(opinion.period.start);
    let end         = opinion.period.end.map(encode_date);
    let modified_at = encode_dt(opinion.modified_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO opinions (opinion_id, uid, start_date, end_date, modified_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id, uid, start, end, modified_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn find_opinion(&self, opinion_id: Uuid) -> Result<Option<Opinion>> {
    let sql = format!("SELECT {} FROM opinions WHERE opinion_id = ?1", RawOpinion::COLUMNS);
    self
      .select_one_by(sql, encode_uuid(opinion_id), RawOpinion::from_row)
      .await?
      .map(RawOpinion::into_opinion)
      .transpose()
  }

  async fn remove_opinion(&self, opinion_id: Uuid) -> Result<bool> {
    self
      .delete_by("DELETE FROM opinions WHERE opinion_id = ?1", encode_uuid(opinion_id))
      .await
  }

  async fn opinions_of(&self, uid: &str) -> Result<Vec<Opinion>> {
    let sql = format!(
      "SELECT {} FROM opinions WHERE uid = ?1 ORDER BY start_date",
      RawOpinion::COLUMNS
    );
    self
      .select_by(sql, uid.to_owned(), RawOpinion::from_row)
      .await?
      .into_iter()
      .map(RawOpinion::into_opinion)
      .collect()
  }

  // ── Accommodations ────────────────────────────────────────────────────────

  async fn save_accommodation(&self, accommodation: &Accommodation) -> Result<()> {
    let id          = encode_uuid(accommodation.accommodation_id);
    let uid         = accommodation.uid.clone();
    let domain      = accommodation.domain.discriminant();
    let label       = accommodation.label.clone();
    let start       = encode_date(accommodation.period.start);
    let end         = accommodation.period.end.map(encode_date);
    let modified_at = encode_dt(accommodation.modified_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO accommodations
             (accommodation_id, uid, domain, label, start_date, end_date, modified_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![id, uid, domain, label, start, end, modified_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn find_accommodation(&self, accommodation_id: Uuid) -> Result<Option<Accommodation>> {
    let sql = format!(
      "SELECT {} FROM accommodations WHERE accommodation_id = ?1",
      RawAccommodation::COLUMNS
    );
    self
      .select_one_by(sql, encode_uuid(accommodation_id), RawAccommodation::from_row)
      .await?
      .map(RawAccommodation::into_accommodation)
      .transpose()
  }

  async fn remove_accommodation(&self, accommodation_id: Uuid) -> Result<bool> {
    self
      .delete_by(
        "DELETE FROM accommodations WHERE accommodation_id = ?1",
        encode_uuid(accommodation_id),
      )
      .await
  }

  async fn accommodations_of(&self, uid: &str) -> Result<Vec<Accommodation>> {
    let sql = format!(
      "SELECT {} FROM accommodations WHERE uid = ?1 ORDER BY start_date",
      RawAccommodation::COLUMNS
    );
    self
      .select_by(sql, uid.to_owned(), RawAccommodation::from_row)
      .await?
      .into_iter()
      .map(RawAccommodation::into_accommodation)
      .collect()
  }

  // ── Derived: role sets ────────────────────────────────────────────────────

  async fn find_role_set(&self, uid: &str) -> Result<Option<RoleSet>> {
    self
      .select_one_by(
        "SELECT uid, roles, computed_at, version FROM role_sets WHERE uid = ?1".to_string(),
        uid.to_owned(),
        raw_role_set,
      )
      .await?
      .map(RawRoleSet::into_role_set)
      .transpose()
  }

  async fn save_role_set(&self, role_set: &RoleSet) -> Result<bool> {
    self.write_derived(EncodedWrite::role_set(role_set)?).await
  }

  // ── Derived: opinion states ───────────────────────────────────────────────

  async fn find_opinion_state(&self, uid: &str) -> Result<Option<OpinionState>> {
    self
      .select_one_by(
        "SELECT uid, status, opinion_id, opinion_start, opinion_end, computed_at, version
         FROM opinion_states WHERE uid = ?1"
          .to_string(),
        uid.to_owned(),
        raw_opinion_state,
      )
      .await?
      .map(RawOpinionState::into_state)
      .transpose()
  }

  async fn save_opinion_state(&self, state: &OpinionState) -> Result<bool> {
    self.write_derived(EncodedWrite::opinion_state(state)).await
  }

  // ── Derived: decisions ────────────────────────────────────────────────────

  async fn find_decision(&self, uid: &str, year: AcademicYear) -> Result<Option<Decision>> {
    let sql = format!(
      "SELECT {} FROM decisions WHERE uid = ?1 AND start_year = ?2",
      RawDecision::COLUMNS
    );
    let uid = uid.to_owned();
    let start_year = year.start_year();

    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params![uid, start_year], RawDecision::from_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawDecision::into_decision).transpose()
  }

  async fn decisions_of(&self, uid: &str) -> Result<Vec<Decision>> {
    let sql = format!(
      "SELECT {} FROM decisions WHERE uid = ?1 ORDER BY start_year",
      RawDecision::COLUMNS
    );
    self
      .select_by(sql, uid.to_owned(), RawDecision::from_row)
      .await?
      .into_iter()
      .map(RawDecision::into_decision)
      .collect()
  }

  async fn save_decision(&self, decision: &Decision) -> Result<bool> {
    self.write_derived(EncodedWrite::decision(decision)).await
  }

  async fn remove_decision(&self, decision: &Decision) -> Result<bool> {
    self.write_derived(EncodedWrite::remove_decision(decision)).await
  }

  async fn commit_derived(&self, write: &DerivedWrite, outbox: &[Envelope]) -> Result<bool> {
    let write = EncodedWrite::encode(write)?;
    let rows = outbox
      .iter()
      .map(JournalRow::encode)
      .collect::<serde_json::Result<Vec<_>>>()?;

    let applied = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if !write.apply(&tx)? {
          return Ok(false);
        }
        for row in &rows {
          row.insert(&tx)?;
        }
        tx.commit()?;
        Ok(true)
      })
      .await?;
    if applied {
      tracing::debug!(events = outbox.len(), "derived write committed with its outbox");
    }
    Ok(applied)
  }

  // ── Migrations ────────────────────────────────────────────────────────────

  async fn find_migration(&self, name: &str) -> Result<Option<AppliedMigration>> {
    let raw = self
      .select_one_by(
        "SELECT name, version, completed_at, items FROM migrations WHERE name = ?1".to_string(),
        name.to_owned(),
        raw_migration,
      )
      .await?;

    raw
      .map(|(name, version, completed_at, items)| {
        Ok(AppliedMigration {
          name,
          version,
          completed_at: decode_dt(&completed_at)?,
          items: items.max(0) as u64,
        })
      })
      .transpose()
  }

  async fn record_migration(&self, migration: &AppliedMigration) -> Result<()> {
    let name         = migration.name.clone();
    let version      = migration.version;
    let completed_at = encode_dt(migration.completed_at);
    let items        = migration.items as i64;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO migrations (name, version, completed_at, items)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![name, version, completed_at, items],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Reference tables ──────────────────────────────────────────────────────

  async fn reference_options(&self, table: ReferenceTable) -> Result<Vec<ReferenceOption>> {
    match table {
      ReferenceTable::Services => {
        let rows = self
          .conn
          .call(|conn| {
            let mut stmt =
              conn.prepare("SELECT service_id, name, active FROM services ORDER BY name")?;
            let rows = stmt
              .query_map([], raw_service)?
              .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
          })
          .await?;
        Ok(
          rows
            .into_iter()
            .map(|(value, label, active)| ReferenceOption { value, label, active })
            .collect(),
        )
      }
      ReferenceTable::AccommodationDomains | ReferenceTable::AssignmentKinds => {
        Ok(table.static_options().unwrap_or_default())
      }
    }
  }
}
