//! [`SqliteStore`] is the SQLite implementation of [`SubjectStore`] and
//! [`PolicyStore`].
//!
//! Every engine-facing mutation is a single `UPDATE` whose state transition
//! is expressed with `CASE` on the current row, so concurrent callers never
//! interleave a read and a write of the same subject.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use cadence_core::{
  policy::{SyncPolicy, WorkingHours},
  store::{PolicyStore, SubjectStore},
  subject::{NewSubject, NowPlaying, Sealed, SourceCredentials, Subject, SyncState},
};

use crate::{
  encode::{
    encode_content_filter, encode_dt, encode_list, encode_sync_state, encode_uuid, RawPolicy,
    RawSubject, POLICY_COLUMNS, SUBJECT_COLUMNS,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Cadence store backed by a single SQLite file.
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

  /// Open an in-memory store, used by tests.
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

  /// Run one `UPDATE` against a single subject row. `?1` is always the
  /// subject id and `?2` the new `updated_at`; `extra` binds from `?3`.
  async fn update_subject(
    &self,
    id: Uuid,
    sql: &'static str,
    extra: Vec<Option<String>>,
  ) -> Result<()> {
    let id_str = encode_uuid(id);
    let now    = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        let mut params: Vec<&dyn rusqlite::ToSql> = vec![&id_str, &now];
        params.extend(extra.iter().map(|p| p as &dyn rusqlite::ToSql));
        Ok(conn.execute(sql, params.as_slice())?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::SubjectNotFound(id));
    }
    Ok(())
  }

  async fn query_subject(&self, sql: String, key: String) -> Result<Option<Subject>> {
    let raw: Option<RawSubject> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(&sql, rusqlite::params![key], RawSubject::from_row)
          .optional()?)
      })
      .await?;

    raw.map(RawSubject::into_subject).transpose()
  }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
  )
}

// ─── SubjectStore impl ───────────────────────────────────────────────────────

impl SubjectStore for SqliteStore {
  type Error = Error;

  async fn add_subject(&self, input: NewSubject) -> Result<Subject> {
    let now = Utc::now();
    let subject = Subject {
      subject_id:       Uuid::new_v4(),
      sink_user_id:     input.sink_user_id,
      sink_team_id:     input.sink_team_id,
      source_user_id:   None,
      sink_token:       input.sink_token,
      sink_bot_token:   input.sink_bot_token,
      source:           None,
      now_playing:      None,
      last_synced_at:   None,
      last_status_text: None,
      sync_state:       SyncState::Active,
      status_cleared:   false,
      active:           true,
      created_at:       now,
      updated_at:       now,
    };

    let id_str     = encode_uuid(subject.subject_id);
    let user       = subject.sink_user_id.clone();
    let team       = subject.sink_team_id.clone();
    let token      = subject.sink_token.0.clone();
    let bot_token  = subject.sink_bot_token.as_ref().map(|t| t.0.clone());
    let at_str     = encode_dt(now);

    let inserted = self
      .conn
      .call(move |conn| {
        let result = conn.execute(
          "INSERT INTO subjects (
             subject_id, sink_user_id, sink_team_id, sink_token, sink_bot_token,
             created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
          rusqlite::params![id_str, user, team, token, bot_token, at_str],
        );
        match result {
          Ok(_) => Ok(true),
          Err(e) if is_constraint_violation(&e) => Ok(false),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    if !inserted {
      return Err(Error::DuplicateSinkUser(subject.sink_user_id));
    }
    Ok(subject)
  }

  async fn get_subject(&self, id: Uuid) -> Result<Option<Subject>> {
    let sql = format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE subject_id = ?1");
    self.query_subject(sql, encode_uuid(id)).await
  }

  async fn find_by_sink_user<'a>(&'a self, sink_user_id: &'a str) -> Result<Option<Subject>> {
    let sql = format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE sink_user_id = ?1");
    self.query_subject(sql, sink_user_id.to_owned()).await
  }

  async fn find_active(&self) -> Result<Vec<Subject>> {
    let sql = format!(
      "SELECT {SUBJECT_COLUMNS} FROM subjects WHERE active = 1 ORDER BY created_at, subject_id"
    );

    let raws: Vec<RawSubject> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], RawSubject::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSubject::into_subject).collect()
  }

  async fn save_subject<'a>(&'a self, subject: &'a Subject) -> Result<()> {
    let (state, invalidated_at) = encode_sync_state(subject.sync_state);
    let source = subject.source.as_ref();
    let track  = subject.now_playing.as_ref();

    let id_str          = encode_uuid(subject.subject_id);
    let user            = subject.sink_user_id.clone();
    let team            = subject.sink_team_id.clone();
    let source_user     = subject.source_user_id.clone();
    let token           = subject.sink_token.0.clone();
    let bot_token       = subject.sink_bot_token.as_ref().map(|t| t.0.clone());
    let access          = source.map(|c| c.access_token.0.clone());
    let refresh         = source.map(|c| c.refresh_token.0.clone());
    let expires         = source.and_then(|c| c.expires_at).map(encode_dt);
    let track_id        = track.map(|t| t.track_id.clone());
    let track_title     = track.map(|t| t.title.clone());
    let track_performer = track.map(|t| t.performer.clone());
    let synced          = subject.last_synced_at.map(encode_dt);
    let last_text       = subject.last_status_text.clone();
    let cleared         = subject.status_cleared;
    let active          = subject.active;
    let updated         = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE subjects SET
             sink_user_id = ?2, sink_team_id = ?3, source_user_id = ?4,
             sink_token = ?5, sink_bot_token = ?6,
             source_access_token = ?7, source_refresh_token = ?8, source_expires_at = ?9,
             track_id = ?10, track_title = ?11, track_performer = ?12,
             last_synced_at = ?13, last_status_text = ?14,
             sync_state = ?15, invalidated_at = ?16,
             status_cleared = ?17, active = ?18, updated_at = ?19
           WHERE subject_id = ?1",
          rusqlite::params![
            id_str, user, team, source_user, token, bot_token, access, refresh, expires,
            track_id, track_title, track_performer, synced, last_text, state,
            invalidated_at, cleared, active, updated
          ],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::SubjectNotFound(subject.subject_id));
    }
    Ok(())
  }

  async fn delete_subject(&self, id: Uuid) -> Result<()> {
    let id_str = encode_uuid(id);
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM subjects WHERE subject_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::SubjectNotFound(id));
    }
    Ok(())
  }

  // ── Atomic single-subject updates ─────────────────────────────────────────

  async fn update_sink_credentials(
    &self,
    id: Uuid,
    sink_token: Sealed,
    sink_bot_token: Option<Sealed>,
    sink_team_id: Option<String>,
  ) -> Result<()> {
    self
      .update_subject(
        id,
        "UPDATE subjects SET
           sink_token     = ?3,
           sink_bot_token = COALESCE(?4, sink_bot_token),
           sink_team_id   = COALESCE(?5, sink_team_id),
           updated_at     = ?2
         WHERE subject_id = ?1",
        vec![Some(sink_token.0), sink_bot_token.map(|t| t.0), sink_team_id],
      )
      .await
  }

  async fn update_source_credentials(
    &self,
    id: Uuid,
    source_user_id: Option<String>,
    credentials: SourceCredentials,
  ) -> Result<()> {
    self
      .update_subject(
        id,
        "UPDATE subjects SET
           source_access_token  = ?3,
           source_refresh_token = ?4,
           source_expires_at    = ?5,
           source_user_id       = COALESCE(?6, source_user_id),
           updated_at           = ?2
         WHERE subject_id = ?1",
        vec![
          Some(credentials.access_token.0),
          Some(credentials.refresh_token.0),
          credentials.expires_at.map(encode_dt),
          source_user_id,
        ],
      )
      .await
  }

  async fn record_now_playing(&self, id: Uuid, track: NowPlaying, at: DateTime<Utc>) -> Result<()> {
    self
      .update_subject(
        id,
        "UPDATE subjects SET
           track_id        = ?3,
           track_title     = ?4,
           track_performer = ?5,
           last_synced_at  = ?6,
           updated_at      = ?2
         WHERE subject_id = ?1",
        vec![
          Some(track.track_id),
          Some(track.title),
          Some(track.performer),
          Some(encode_dt(at)),
        ],
      )
      .await
  }

  async fn record_status_written(&self, id: Uuid, text: String) -> Result<()> {
    self
      .update_subject(
        id,
        "UPDATE subjects SET
           last_status_text = ?3,
           status_cleared   = 0,
           sync_state       = CASE sync_state WHEN 'manual_override' THEN 'active'
                                              ELSE sync_state END,
           updated_at       = ?2
         WHERE subject_id = ?1",
        vec![Some(text)],
      )
      .await
  }

  async fn record_status_cleared(&self, id: Uuid) -> Result<()> {
    self
      .update_subject(
        id,
        "UPDATE subjects SET
           track_id         = NULL,
           track_title      = NULL,
           track_performer  = NULL,
           last_status_text = NULL,
           status_cleared   = CASE sync_state WHEN 'manual_override' THEN 0 ELSE 1 END,
           updated_at       = ?2
         WHERE subject_id = ?1",
        Vec::new(),
      )
      .await
  }

  async fn mark_manual_override(&self, id: Uuid) -> Result<()> {
    self
      .update_subject(
        id,
        "UPDATE subjects SET
           sync_state     = CASE sync_state WHEN 'invalidated' THEN sync_state
                                            ELSE 'manual_override' END,
           status_cleared = CASE sync_state WHEN 'invalidated' THEN status_cleared
                                            ELSE 0 END,
           updated_at     = ?2
         WHERE subject_id = ?1",
        Vec::new(),
      )
      .await
  }

  async fn mark_invalidated(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
    self
      .update_subject(
        id,
        "UPDATE subjects SET
           sync_state     = 'invalidated',
           invalidated_at = ?3,
           active         = 0,
           updated_at     = ?2
         WHERE subject_id = ?1",
        vec![Some(encode_dt(at))],
      )
      .await
  }

  async fn resume(&self, id: Uuid, baseline: Option<String>) -> Result<()> {
    self
      .update_subject(
        id,
        "UPDATE subjects SET
           last_status_text = CASE sync_state WHEN 'manual_override' THEN ?3
                                              ELSE last_status_text END,
           track_id         = CASE sync_state WHEN 'manual_override' THEN NULL
                                              ELSE track_id END,
           track_title      = CASE sync_state WHEN 'manual_override' THEN NULL
                                              ELSE track_title END,
           track_performer  = CASE sync_state WHEN 'manual_override' THEN NULL
                                              ELSE track_performer END,
           sync_state       = CASE sync_state WHEN 'manual_override' THEN 'active'
                                              ELSE sync_state END,
           updated_at       = ?2
         WHERE subject_id = ?1",
        vec![baseline],
      )
      .await
  }

  async fn reactivate(&self, id: Uuid) -> Result<()> {
    self
      .update_subject(
        id,
        "UPDATE subjects SET
           sync_state     = CASE sync_state WHEN 'invalidated' THEN 'active'
                                            ELSE sync_state END,
           invalidated_at = NULL,
           active         = 1,
           updated_at     = ?2
         WHERE subject_id = ?1",
        Vec::new(),
      )
      .await
  }
}

// ─── PolicyStore impl ────────────────────────────────────────────────────────

impl PolicyStore for SqliteStore {
  type Error = Error;

  async fn get_policy(&self, subject_id: Uuid) -> Result<Option<SyncPolicy>> {
    let id_str = encode_uuid(subject_id);
    let sql    = format!("SELECT {POLICY_COLUMNS} FROM sync_policies WHERE subject_id = ?1");

    let raw: Option<RawPolicy> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(&sql, rusqlite::params![id_str], RawPolicy::from_row)
          .optional()?)
      })
      .await?;

    raw.map(RawPolicy::into_policy).transpose()
  }

  async fn save_policy<'a>(&'a self, policy: &'a SyncPolicy) -> Result<()> {
    let hours = policy.working_hours;

    let id_str        = encode_uuid(policy.subject_id);
    let enabled       = policy.enabled;
    let active        = policy.active;
    let emoji         = policy.default_emoji.clone();
    let rotating      = encode_list(&policy.rotating_emojis)?;
    let filter        = encode_content_filter(policy.content_filter);
    let devices       = policy.allowed_devices.as_deref().map(encode_list).transpose()?;
    let show_perf     = policy.show_performer;
    let show_title    = policy.show_title;
    let template      = policy.template.clone();
    let notifications = policy.notifications_enabled;
    let updated       = encode_dt(Utc::now());

    let saved = self
      .conn
      .call(move |conn| {
        let result = conn.execute(
          "INSERT INTO sync_policies (
             subject_id, enabled, active, default_emoji, rotating_emojis,
             content_filter, allowed_devices, hours_enabled, hours_start_minute,
             hours_end_minute, tz_offset_seconds, show_performer, show_title,
             template, notifications_enabled, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
           ON CONFLICT(subject_id) DO UPDATE SET
             enabled               = excluded.enabled,
             active                = excluded.active,
             default_emoji         = excluded.default_emoji,
             rotating_emojis       = excluded.rotating_emojis,
             content_filter        = excluded.content_filter,
             allowed_devices       = excluded.allowed_devices,
             hours_enabled         = excluded.hours_enabled,
             hours_start_minute    = excluded.hours_start_minute,
             hours_end_minute      = excluded.hours_end_minute,
             tz_offset_seconds     = excluded.tz_offset_seconds,
             show_performer        = excluded.show_performer,
             show_title            = excluded.show_title,
             template              = excluded.template,
             notifications_enabled = excluded.notifications_enabled,
             updated_at            = excluded.updated_at",
          rusqlite::params![
            id_str, enabled, active, emoji, rotating, filter, devices,
            hours.enabled, hours.start_minute, hours.end_minute, hours.tz_offset_seconds,
            show_perf, show_title, template, notifications, updated
          ],
        );
        match result {
          Ok(_) => Ok(true),
          // Foreign key: the subject does not exist.
          Err(e) if is_constraint_violation(&e) => Ok(false),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    if !saved {
      return Err(Error::SubjectNotFound(policy.subject_id));
    }
    Ok(())
  }

  async fn delete_policy(&self, subject_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(subject_id);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM sync_policies WHERE subject_id = ?1",
          rusqlite::params![id_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn set_policy_active(&self, subject_id: Uuid, active: bool) -> Result<()> {
    let id_str = encode_uuid(subject_id);
    let now    = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE sync_policies SET active = ?2, updated_at = ?3 WHERE subject_id = ?1",
          rusqlite::params![id_str, active, now],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::PolicyNotFound(subject_id));
    }
    tracing::debug!(%subject_id, active, "policy active flag updated");
    Ok(())
  }

  async fn set_working_hours(&self, subject_id: Uuid, hours: WorkingHours) -> Result<()> {
    let id_str = encode_uuid(subject_id);
    let now    = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE sync_policies SET
             hours_enabled      = ?2,
             hours_start_minute = ?3,
             hours_end_minute   = ?4,
             tz_offset_seconds  = ?5,
             updated_at         = ?6
           WHERE subject_id = ?1",
          rusqlite::params![
            id_str,
            hours.enabled,
            hours.start_minute,
            hours.end_minute,
            hours.tz_offset_seconds,
            now
          ],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::PolicyNotFound(subject_id));
    }
    Ok(())
  }
}
