//! [`SqliteStore`], the SQLite implementation of [`ApplicationStore`].

use std::path::Path;

use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use soknad_core::{
  application::{Application, FormAnswers},
  mediator::NeedMessage,
  store::ApplicationStore,
};

use crate::{
  Result,
  encode::{
    RawActivity, RawApplication, RawFormAnswers, decode_message, encode_application,
    encode_message, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// An application store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
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
    Ok(())
  }

  /// Load every application whose id is returned by `sql` (one `?1` param).
  async fn load_where(&self, sql: &'static str, param: String) -> Result<Vec<Application>> {
    let raws: Vec<RawApplication> = self
      .conn
      .call(move |conn| {
        let ids: Vec<String> = {
          let mut stmt = conn.prepare(sql)?;
          stmt
            .query_map(rusqlite::params![param], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?
        };

        let mut raws = Vec::with_capacity(ids.len());
        for id in ids {
          if let Some(raw) = read_application(conn, &id)? {
            raws.push(raw);
          }
        }
        Ok(raws)
      })
      .await?;

    raws.into_iter().map(RawApplication::into_application).collect()
  }
}

// ─── Row readers ─────────────────────────────────────────────────────────────

fn read_application(
  conn: &rusqlite::Connection,
  id: &str,
) -> rusqlite::Result<Option<RawApplication>> {
  let body: Option<String> = conn
    .query_row(
      "SELECT body FROM applications WHERE application_id = ?1",
      rusqlite::params![id],
      |row| row.get(0),
    )
    .optional()?;
  let Some(body) = body else {
    return Ok(None);
  };

  let activities = {
    let mut stmt = conn.prepare(
      "SELECT seq, severity, message, recorded_at, contexts, need_kind, need_details
       FROM activities WHERE application_id = ?1 ORDER BY seq",
    )?;
    stmt
      .query_map(rusqlite::params![id], |row| {
        Ok(RawActivity {
          seq:          row.get(0)?,
          severity:     row.get(1)?,
          message:      row.get(2)?,
          recorded_at:  row.get(3)?,
          contexts:     row.get(4)?,
          need_kind:    row.get(5)?,
          need_details: row.get(6)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?
  };

  let form_answers = read_form_answers(conn, id)?;

  Ok(Some(RawApplication { body, activities, form_answers }))
}

fn read_form_answers(
  conn: &rusqlite::Connection,
  id: &str,
) -> rusqlite::Result<Option<RawFormAnswers>> {
  conn
    .query_row(
      "SELECT application_id, version, answers, updated_at
       FROM form_answers WHERE application_id = ?1",
      rusqlite::params![id],
      |row| {
        Ok(RawFormAnswers {
          application_id: row.get(0)?,
          version:        row.get(1)?,
          answers:        row.get(2)?,
          updated_at:     row.get(3)?,
        })
      },
    )
    .optional()
}

// ─── ApplicationStore impl ───────────────────────────────────────────────────

impl ApplicationStore for SqliteStore {
  type Error = crate::Error;

  async fn load(&self, application_id: Uuid) -> Result<Option<Application>> {
    let id_str = encode_uuid(application_id);

    let raw = self
      .conn
      .call(move |conn| Ok(read_application(conn, &id_str)?))
      .await?;

    raw.map(RawApplication::into_application).transpose()
  }

  async fn find_being_created<'a>(&'a self, ident: &'a str) -> Result<Option<Application>> {
    let mut found = self
      .load_where(
        "SELECT application_id FROM applications
         WHERE ident = ?1 AND state = 'being_created'",
        ident.to_owned(),
      )
      .await?;
    Ok(found.pop())
  }

  async fn list_for_owner<'a>(&'a self, ident: &'a str) -> Result<Vec<Application>> {
    self
      .load_where(
        "SELECT application_id FROM applications
         WHERE ident = ?1 ORDER BY created_at DESC, rowid DESC",
        ident.to_owned(),
      )
      .await
  }

  async fn save<'a>(
    &'a self,
    application: &'a Application,
    outbox: &'a [NeedMessage],
  ) -> Result<()> {
    let encoded = encode_application(application)?;
    let outbox = outbox.iter().map(encode_message).collect::<Result<Vec<_>>>()?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        tx.execute(
          "INSERT INTO applications (application_id, ident, state, created_at, body)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(application_id) DO UPDATE SET
             state = excluded.state,
             body  = excluded.body",
          rusqlite::params![
            encoded.application_id,
            encoded.ident,
            encoded.state,
            encoded.created_at,
            encoded.body,
          ],
        )?;

        // Only rows past what is already stored are written.
        let stored: i64 = tx.query_row(
          "SELECT COALESCE(MAX(seq) + 1, 0) FROM activities WHERE application_id = ?1",
          rusqlite::params![encoded.application_id],
          |row| row.get(0),
        )?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO activities (
               application_id, seq, severity, message, recorded_at,
               contexts, need_kind, need_details
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          )?;
          for activity in encoded.activities.iter().filter(|a| a.seq >= stored) {
            stmt.execute(rusqlite::params![
              encoded.application_id,
              activity.seq,
              activity.severity,
              activity.message,
              activity.recorded_at,
              activity.contexts,
              activity.need_kind,
              activity.need_details,
            ])?;
          }
        }

        if let Some(form) = &encoded.form_answers {
          tx.execute(
            "INSERT INTO form_answers (application_id, version, answers, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(application_id) DO UPDATE SET
               version    = excluded.version,
               answers    = excluded.answers,
               updated_at = excluded.updated_at",
            rusqlite::params![
              form.application_id,
              form.version,
              form.answers,
              form.updated_at,
            ],
          )?;
        }

        {
          let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO pending_messages (message_id, partition_key, body)
             VALUES (?1, ?2, ?3)",
          )?;
          for message in &outbox {
            stmt.execute(rusqlite::params![
              message.message_id,
              message.key,
              message.body,
            ])?;
          }
        }

        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn pending_messages<'a>(&'a self, key: &'a str) -> Result<Vec<NeedMessage>> {
    let key = key.to_owned();

    let bodies: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT body FROM pending_messages WHERE partition_key = ?1 ORDER BY seq",
        )?;
        let bodies = stmt
          .query_map(rusqlite::params![key], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(bodies)
      })
      .await?;

    bodies.iter().map(|body| decode_message(body)).collect()
  }

  async fn mark_published<'a>(&'a self, message_ids: &'a [String]) -> Result<()> {
    let ids = message_ids.to_vec();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt =
            tx.prepare("DELETE FROM pending_messages WHERE message_id = ?1")?;
          for id in &ids {
            stmt.execute(rusqlite::params![id])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn form_answers(
    &self,
    application_id: Uuid,
    min_version: Option<u64>,
  ) -> Result<Option<FormAnswers>> {
    let id_str = encode_uuid(application_id);

    let raw = self
      .conn
      .call(move |conn| Ok(read_form_answers(conn, &id_str)?))
      .await?;

    let Some(form) = raw.map(RawFormAnswers::into_form_answers).transpose()? else {
      return Ok(None);
    };
    if min_version.is_some_and(|min| form.version < min) {
      return Ok(None);
    }
    Ok(Some(form))
  }
}
