//! Engine tests against an in-memory `SqliteStore` and the fakes in
//! [`crate::testing`].

use std::sync::Arc;

use cadence_core::{
  Error as CoreError,
  playback::{ContentType, Device, PlaybackSnapshot},
  policy::{ContentFilter, SyncPolicy, WorkingHours},
  sink::SinkError,
  source::{SourceError, TokenGrant},
  store::{PolicyStore, SubjectStore},
  subject::{NowPlaying, Subject, SyncState},
};
use cadence_store_sqlite::SqliteStore;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::{SeedableRng, rngs::StdRng};
use uuid::Uuid;

use crate::{
  Accounts, Enrollment, Engine, ManualClock, Outcome, PlaybackError, Revocation, SkipReason,
  SyncError, Vault, WriteOutcome,
  report::CycleReport,
  testing::{FakeSink, FakeSource, SourceCall},
};

struct Harness {
  store:    Arc<SqliteStore>,
  source:   Arc<FakeSource>,
  sink:     Arc<FakeSink>,
  vault:    Arc<Vault>,
  clock:    Arc<ManualClock>,
  engine:   Engine<SqliteStore, FakeSource, FakeSink>,
  accounts: Accounts<SqliteStore>,
}

fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap() }

async fn harness() -> Harness {
  let store  = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let source = Arc::new(FakeSource::new());
  let sink   = Arc::new(FakeSink::new());
  let vault  = Arc::new(Vault::from_key(&[3u8; 32]));
  let clock  = Arc::new(ManualClock::new(t0()));

  let engine = Engine::builder(store.clone(), source.clone(), sink.clone(), vault.clone())
    .clock(clock.clone())
    .rng(Box::new(StdRng::seed_from_u64(7)))
    .build();
  let accounts = Accounts::new(store.clone(), vault.clone(), clock.clone());

  Harness { store, source, sink, vault, clock, engine, accounts }
}

impl Harness {
  async fn enroll(&self, user: &str) -> Subject {
    self
      .accounts
      .enroll(Enrollment {
        sink_user_id:   user.into(),
        sink_team_id:   Some("T1".into()),
        sink_token:     "xoxp-user".into(),
        sink_bot_token: Some("xoxb-bot".into()),
      })
      .await
      .unwrap()
  }

  /// Enrolled, source linked, sync started.
  async fn connected(&self, user: &str) -> Subject {
    self.enroll(user).await;
    let subject = self
      .accounts
      .link_source(user, format!("listener-{user}"), grant("access-1", Some("refresh-1")))
      .await
      .unwrap();
    self.engine.start_sync(subject.subject_id).await.unwrap();
    self.subject(subject.subject_id).await
  }

  async fn subject(&self, id: Uuid) -> Subject { self.store.get_subject(id).await.unwrap().unwrap() }

  async fn policy(&self, id: Uuid) -> SyncPolicy { self.store.get_policy(id).await.unwrap().unwrap() }

  async fn update_policy(&self, id: Uuid, f: impl FnOnce(&mut SyncPolicy)) {
    let mut p = self.policy(id).await;
    f(&mut p);
    self.store.save_policy(&p).await.unwrap();
  }

  async fn evaluate(&self, id: Uuid) -> Outcome {
    let subject = self.subject(id).await;
    self.engine.evaluate(&subject).await.unwrap()
  }

  fn play(&self, snapshot: PlaybackSnapshot) { self.source.set_playback(Ok(Some(snapshot))); }
}

fn grant(access: &str, refresh: Option<&str>) -> TokenGrant {
  TokenGrant {
    access_token:  access.into(),
    refresh_token: refresh.map(Into::into),
    expires_in:    Duration::hours(1),
  }
}

fn device(id: &str) -> Device {
  Device { id: Some(id.into()), name: "Desk".into(), kind: "Computer".into(), is_active: true }
}

fn track(id: &str, duration_ms: u64, progress_ms: u64) -> PlaybackSnapshot {
  PlaybackSnapshot {
    track_id:     id.into(),
    title:        format!("Song {id}"),
    performer:    "Band".into(),
    is_playing:   true,
    duration_ms:  Some(duration_ms),
    progress_ms:  Some(progress_ms),
    device:       Some(device("D1")),
    content_type: ContentType::Track,
  }
}

fn track_record(id: &str) -> NowPlaying {
  NowPlaying { track_id: id.into(), title: format!("Song {id}"), performer: "Band".into() }
}

/// A track with plenty of time left, so a repeat read needs no refresh.
fn long_track(id: &str) -> PlaybackSnapshot { track(id, 600_000, 0) }

// ─── Gates ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn disabled_policy_makes_no_calls() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.update_policy(s.subject_id, |p| p.enabled = false).await;
  h.play(long_track("T1"));

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Skipped(SkipReason::Disabled));
  assert_eq!(h.source.call_count(), 0);
  assert_eq!(h.sink.call_count(), 0);
}

#[tokio::test]
async fn paused_until_started() {
  let h = harness().await;
  h.enroll("U1").await;
  let s = h
    .accounts
    .link_source("U1", "listener".into(), grant("a", Some("r")))
    .await
    .unwrap();

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Skipped(SkipReason::Paused));
  assert_eq!(h.sink.call_count(), 0);
}

#[tokio::test]
async fn outside_working_hours_makes_no_source_calls() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.update_policy(s.subject_id, |p| {
    p.working_hours = WorkingHours {
      enabled:           true,
      start_minute:      Some(12 * 60 + 30),
      end_minute:        Some(14 * 60),
      tz_offset_seconds: None,
    }
  })
  .await;
  h.play(long_track("T1"));

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Skipped(SkipReason::OutsideWorkingHours));
  assert_eq!(h.source.call_count(), 0);

  h.clock.set(t0() + Duration::minutes(30));
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Updated);
}

#[tokio::test]
async fn subject_without_source_is_skipped() {
  let h = harness().await;
  let s = h.enroll("U1").await;
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Skipped(SkipReason::NoSourceCredential));
}

#[tokio::test]
async fn missing_policy_is_skipped() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.store.delete_policy(s.subject_id).await.unwrap();
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Skipped(SkipReason::NoPolicy));
}

// ─── Writes ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn new_track_is_written() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(track("T1", 200_000, 20_000));

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Updated);

  let writes = h.sink.writes();
  assert_eq!(writes.len(), 1);
  assert_eq!(writes[0].text, "Song T1 - Band");
  assert_eq!(writes[0].emoji, ":musical_note:");
  assert_eq!(writes[0].expires_at, Some(t0() + Duration::milliseconds(180_000 + 120_000)));

  let s = h.subject(s.subject_id).await;
  assert_eq!(s.now_playing.unwrap().track_id, "T1");
  assert_eq!(s.last_status_text.as_deref(), Some("Song T1 - Band"));
  assert_eq!(s.last_synced_at, Some(t0()));
  assert!(!s.status_cleared);
}

#[tokio::test]
async fn same_track_is_written_once() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(long_track("T1"));

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Updated);
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Unchanged);
  assert_eq!(h.sink.writes().len(), 1);
}

#[tokio::test]
async fn track_change_rewrites() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(long_track("T1"));
  h.evaluate(s.subject_id).await;

  h.play(long_track("T2"));
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Updated);

  let writes = h.sink.writes();
  assert_eq!(writes.len(), 2);
  assert_eq!(writes[1].text, "Song T2 - Band");
  assert_eq!(h.subject(s.subject_id).await.now_playing.unwrap().track_id, "T2");
}

#[tokio::test]
async fn near_end_of_track_refreshes_expiration() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(long_track("T1"));
  h.evaluate(s.subject_id).await;

  // 5 s left is under the 150 s threshold.
  h.play(track("T1", 180_000, 175_000));
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Refreshed);

  let writes = h.sink.writes();
  assert_eq!(writes.len(), 2);
  assert_eq!(writes[1].expires_at, Some(t0() + Duration::milliseconds(5_000 + 120_000)));
}

#[tokio::test]
async fn unknown_duration_writes_without_expiration() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(PlaybackSnapshot { duration_ms: None, progress_ms: None, ..long_track("T1") });

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Updated);
  assert_eq!(h.sink.writes()[0].expires_at, None);
  // Unknown remaining time always counts as needing a refresh.
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Refreshed);
}

#[tokio::test]
async fn rotating_emoji_comes_from_the_list() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.update_policy(s.subject_id, |p| p.rotating_emojis = vec![":cd:".into(), ":radio:".into()]).await;
  h.play(long_track("T1"));
  h.evaluate(s.subject_id).await;

  let emoji = h.sink.writes()[0].emoji.clone();
  assert!(emoji == ":cd:" || emoji == ":radio:", "unexpected emoji {emoji}");
}

#[tokio::test]
async fn writer_aborts_when_disabled_mid_cycle() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.update_policy(s.subject_id, |p| p.enabled = false).await;

  let out = h.engine.writer().write(&s, "Song", "Band", Some(1_000), Some(0)).await.unwrap();
  assert_eq!(out, WriteOutcome::Aborted);
  assert!(h.sink.writes().is_empty());
}

// ─── Clears ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stopping_playback_clears_status() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(long_track("T1"));
  h.evaluate(s.subject_id).await;

  h.source.set_playback(Ok(None));
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Cleared);

  let last = h.sink.writes().pop().unwrap();
  assert!(last.is_clear());
  assert_eq!(last.expires_at, None);

  let s2 = h.subject(s.subject_id).await;
  assert!(s2.status_cleared);
  assert!(s2.now_playing.is_none());
  assert!(s2.last_status_text.is_none());

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Idle);
  assert_eq!(h.sink.writes().len(), 2);
}

#[tokio::test]
async fn cleared_status_still_forgets_the_remembered_track() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(long_track("T1"));
  h.evaluate(s.subject_id).await;
  h.source.set_playback(Ok(None));
  h.evaluate(s.subject_id).await;

  // Already cleared, yet a track is still on record.
  h.store.record_now_playing(s.subject_id, track_record("T1"), t0()).await.unwrap();
  let seeded = h.subject(s.subject_id).await;
  assert!(seeded.status_cleared);
  assert!(seeded.now_playing.is_some());
  let writes = h.sink.writes().len();

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Idle);
  assert_eq!(h.sink.writes().len(), writes);
  let s2 = h.subject(s.subject_id).await;
  assert!(s2.now_playing.is_none());
  assert!(s2.status_cleared);

  h.play(long_track("T1"));
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Updated);
  assert_eq!(h.sink.writes().last().unwrap().text, "Song T1 - Band");
}

#[tokio::test]
async fn paused_playback_counts_as_nothing_playing() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(long_track("T1"));
  h.evaluate(s.subject_id).await;

  h.play(PlaybackSnapshot { is_playing: false, ..long_track("T1") });
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Cleared);
}

#[tokio::test]
async fn disallowed_device_clears() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.update_policy(s.subject_id, |p| p.allowed_devices = Some(vec!["D1".into()])).await;
  h.play(long_track("T1"));
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Updated);

  h.play(PlaybackSnapshot { device: Some(device("D2")), ..long_track("T1") });
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Cleared);
}

#[tokio::test]
async fn snapshot_without_device_id_is_allowed() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.update_policy(s.subject_id, |p| p.allowed_devices = Some(vec!["D1".into()])).await;
  h.play(PlaybackSnapshot { device: None, ..long_track("T1") });
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Updated);
}

#[tokio::test]
async fn filtered_content_with_nothing_before_is_idle() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.update_policy(s.subject_id, |p| p.content_filter = ContentFilter::Music).await;
  h.play(PlaybackSnapshot { content_type: ContentType::Episode, ..long_track("E1") });

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Idle);
  assert!(h.sink.writes().is_empty());
}

// ─── Manual override ─────────────────────────────────────────────────────────

#[tokio::test]
async fn hand_edited_status_pauses_sync() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(long_track("T1"));
  h.evaluate(s.subject_id).await;
  let source_calls = h.source.call_count();

  h.sink.set_status_text("In a meeting");
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::ManualOverrideDetected);
  assert_eq!(h.source.call_count(), source_calls);

  let s2 = h.subject(s.subject_id).await;
  assert_eq!(s2.sync_state, SyncState::ManualOverride);
  assert!(!s2.status_cleared);
  assert!(!h.policy(s.subject_id).await.active);

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Skipped(SkipReason::Paused));
  assert_eq!(h.sink.writes().len(), 1);
}

#[tokio::test]
async fn any_text_without_a_previous_write_is_manual() {
  let h = harness().await;
  let s = h.connected("U1").await;
  assert!(s.last_status_text.is_none());

  h.sink.set_status_text("Lunch");
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::ManualOverrideDetected);
}

#[tokio::test]
async fn escaped_sink_text_is_not_a_manual_change() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(PlaybackSnapshot { title: "Tom & Jerry".into(), ..long_track("T1") });
  h.evaluate(s.subject_id).await;

  h.sink.set_status_text("  Tom &amp; Jerry - Band ");
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Unchanged);
}

#[tokio::test]
async fn every_sink_escape_round_trips() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(PlaybackSnapshot { title: r#"Tom & Jerry <Live> "Edit""#.into(), ..long_track("T1") });
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Updated);

  h.sink.set_status_text("Tom &amp; Jerry &lt;Live&gt; &quot;Edit&quot; - Band");
  let subject = h.subject(s.subject_id).await;
  assert!(!h.engine.writer().detect_manual_change(&subject).await);
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Unchanged);
}

#[tokio::test]
async fn unreadable_sink_fails_open() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.sink.fail_reads(SinkError::Transient("timeout".into()));
  h.play(long_track("T1"));

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Updated);
}

#[tokio::test]
async fn start_after_override_adopts_current_text() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(long_track("T1"));
  h.evaluate(s.subject_id).await;
  h.sink.set_status_text("In a meeting");
  h.evaluate(s.subject_id).await;

  h.engine.start_sync(s.subject_id).await.unwrap();
  let s2 = h.subject(s.subject_id).await;
  assert_eq!(s2.sync_state, SyncState::Active);
  assert_eq!(s2.last_status_text.as_deref(), Some("In a meeting"));
  assert!(s2.now_playing.is_none());
  assert!(h.policy(s.subject_id).await.active);

  // Same track, but it was forgotten, so it is written fresh.
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Updated);
}

// ─── Invalidation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn revoked_sink_credential_invalidates_and_notifies() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.sink.fail_writes(SinkError::CredentialInvalid("token_revoked".into()));
  h.play(long_track("T1"));

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Invalidated);

  let s2 = h.subject(s.subject_id).await;
  assert_eq!(s2.sync_state, SyncState::Invalidated { at: t0() });
  assert!(!s2.active);
  assert!(s2.now_playing.is_none());

  let messages = h.sink.messages();
  assert_eq!(messages.len(), 1);
  assert_eq!(messages[0].token, "xoxb-bot");
  assert_eq!(messages[0].channel, "U1");
  assert_eq!(messages[0].text, Revocation::Sink.notice());

  assert!(h.store.find_active().await.unwrap().is_empty());
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Skipped(SkipReason::Invalidated));
}

#[tokio::test]
async fn revoked_source_credential_invalidates() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.source.set_playback(Err(SourceError::Unauthorized("revoked".into())));

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Invalidated);
  assert!(h.subject(s.subject_id).await.sync_state.is_invalidated());
  assert_eq!(h.sink.messages()[0].text, Revocation::Source.notice());
  assert!(h.sink.writes().is_empty());
}

#[tokio::test]
async fn failed_notice_still_invalidates() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.sink.fail_messages(SinkError::Api("channel_not_found".into()));
  h.source.set_playback(Err(SourceError::Unauthorized("revoked".into())));

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Invalidated);
  assert!(h.subject(s.subject_id).await.sync_state.is_invalidated());
}

#[tokio::test]
async fn relinking_lifts_invalidation() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.source.set_playback(Err(SourceError::Unauthorized("revoked".into())));
  h.evaluate(s.subject_id).await;

  h.accounts.link_source("U1", "listener".into(), grant("access-9", None)).await.unwrap();
  let s2 = h.subject(s.subject_id).await;
  assert_eq!(s2.sync_state, SyncState::Active);
  assert!(s2.active);
}

#[tokio::test]
async fn transient_source_error_changes_nothing() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(long_track("T1"));
  h.evaluate(s.subject_id).await;
  let before = h.subject(s.subject_id).await;

  h.source.set_playback(Err(SourceError::Transient("503".into())));
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Unavailable);

  let after = h.subject(s.subject_id).await;
  assert_eq!(after.now_playing, before.now_playing);
  assert_eq!(after.sync_state, SyncState::Active);
  assert_eq!(h.sink.writes().len(), 1);
}

// ─── Credentials ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn near_expiry_credential_is_refreshed_first() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.source.set_refresh(Ok(grant("access-2", None)));
  h.clock.advance(Duration::minutes(58));

  h.evaluate(s.subject_id).await;
  assert_eq!(
    h.source.calls(),
    vec![SourceCall::Refresh("refresh-1".into()), SourceCall::CurrentPlayback("access-2".into())]
  );

  let creds = h.subject(s.subject_id).await.source.unwrap();
  assert_eq!(h.vault.open(&creds.access_token).unwrap(), "access-2");
  assert_eq!(h.vault.open(&creds.refresh_token).unwrap(), "refresh-1");
  assert_eq!(creds.expires_at, Some(t0() + Duration::minutes(58) + Duration::hours(1)));
}

#[tokio::test]
async fn rejected_refresh_invalidates() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.source.set_refresh(Err(SourceError::Unauthorized("invalid_grant".into())));
  h.clock.advance(Duration::hours(2));

  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Invalidated);
}

#[tokio::test]
async fn credentials_are_sealed_at_rest() {
  let h = harness().await;
  let s = h.connected("U1").await;
  assert_ne!(s.sink_token.as_str(), "xoxp-user");
  assert_eq!(h.vault.open(&s.sink_token).unwrap(), "xoxp-user");
  assert_ne!(s.source.unwrap().access_token.as_str(), "access-1");
}

#[tokio::test]
async fn first_link_needs_a_refresh_token() {
  let h = harness().await;
  h.enroll("U1").await;
  let err = h.accounts.link_source("U1", "listener".into(), grant("a", None)).await.unwrap_err();
  assert!(matches!(err, SyncError::MissingRefreshToken));
}

#[tokio::test]
async fn re_enrolling_replaces_sink_token() {
  let h = harness().await;
  let first = h.enroll("U1").await;
  let again = h
    .accounts
    .enroll(Enrollment {
      sink_user_id:   "U1".into(),
      sink_team_id:   None,
      sink_token:     "xoxp-new".into(),
      sink_bot_token: None,
    })
    .await
    .unwrap();

  assert_eq!(again.subject_id, first.subject_id);
  assert_eq!(h.vault.open(&again.sink_token).unwrap(), "xoxp-new");
  assert_eq!(again.sink_team_id.as_deref(), Some("T1"));
  assert!(again.sink_bot_token.is_some());
}

#[tokio::test]
async fn re_enrolling_keeps_sync_state() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(long_track("T1"));
  h.evaluate(s.subject_id).await;

  h.accounts
    .enroll(Enrollment {
      sink_user_id:   "U1".into(),
      sink_team_id:   None,
      sink_token:     "xoxp-new".into(),
      sink_bot_token: None,
    })
    .await
    .unwrap();

  let s2 = h.subject(s.subject_id).await;
  assert_eq!(s2.last_status_text.as_deref(), Some("Song T1 - Band"));
  assert_eq!(s2.now_playing.map(|t| t.track_id).as_deref(), Some("T1"));
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Unchanged);
}

#[tokio::test]
async fn working_hours_replace_only_the_window() {
  let h = harness().await;
  let s = h.connected("U1").await;
  let hours = WorkingHours::from_local("09:00", "17:00", 3600).unwrap();

  assert_eq!(h.accounts.set_working_hours("U1", hours).await.unwrap(), hours);
  assert_eq!(h.accounts.working_hours("U1").await.unwrap(), hours);
  assert!(h.policy(s.subject_id).await.active);

  let err = h.accounts.working_hours("nobody").await.unwrap_err();
  assert!(matches!(err, SyncError::Core(CoreError::SinkUserNotFound(_))));
}

#[tokio::test]
async fn removing_a_subject() {
  let h = harness().await;
  let s = h.connected("U1").await;
  assert!(h.accounts.remove("U1").await.unwrap());
  assert!(h.store.get_subject(s.subject_id).await.unwrap().is_none());
  assert!(h.store.get_policy(s.subject_id).await.unwrap().is_none());
  assert!(!h.accounts.remove("U1").await.unwrap());
}

// ─── On-demand playback ──────────────────────────────────────────────────────

#[tokio::test]
async fn pause_without_device_is_typed() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.source.set_command(Err(SourceError::NoActiveDevice));

  let err = h.engine.reader().pause(&s).await.unwrap_err();
  assert_eq!(err, PlaybackError::NoActiveDevice);
  assert_eq!(h.subject(s.subject_id).await.sync_state, SyncState::Active);
}

#[tokio::test]
async fn commands_need_a_linked_source() {
  let h = harness().await;
  let s = h.enroll("U1").await;
  assert_eq!(h.engine.reader().resume(&s).await.unwrap_err(), PlaybackError::NotConnected);
}

#[tokio::test]
async fn devices_are_listed() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.source.set_devices(vec![device("D1"), device("D2")]);

  let devices = h.engine.reader().devices(&s).await.unwrap();
  assert_eq!(devices.len(), 2);
  assert_eq!(h.source.calls(), vec![SourceCall::Devices("access-1".into())]);
}

// ─── Engine operations ───────────────────────────────────────────────────────

#[tokio::test]
async fn evaluation_in_flight_is_busy() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(long_track("T1"));

  let claim = h.engine.claim(s.subject_id).unwrap();
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Skipped(SkipReason::Busy));
  assert_eq!(h.source.call_count(), 0);

  drop(claim);
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Updated);
}

#[tokio::test]
async fn start_and_stop_wait_for_an_evaluation_in_flight() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(long_track("T1"));
  h.evaluate(s.subject_id).await;
  let writes = h.sink.writes().len();

  let claim = h.engine.claim(s.subject_id).unwrap();
  let err = h.engine.stop_sync(s.subject_id).await.unwrap_err();
  assert!(matches!(err, SyncError::Busy(id) if id == s.subject_id));
  assert!(matches!(h.engine.start_sync(s.subject_id).await, Err(SyncError::Busy(_))));
  assert_eq!(h.engine.sync_now("U1").await.unwrap(), Outcome::Skipped(SkipReason::Busy));
  assert_eq!(h.sink.writes().len(), writes);
  assert!(h.policy(s.subject_id).await.active);
  assert_eq!(h.subject(s.subject_id).await.last_status_text.as_deref(), Some("Song T1 - Band"));

  drop(claim);
  assert!(h.engine.stop_sync(s.subject_id).await.unwrap());
  assert!(h.engine.claim(s.subject_id).is_some());
}

#[tokio::test]
async fn sync_now_starts_a_paused_subject() {
  let h = harness().await;
  h.enroll("U1").await;
  let s = h
    .accounts
    .link_source("U1", "listener".into(), grant("access-1", Some("refresh-1")))
    .await
    .unwrap();
  h.play(long_track("T1"));

  assert_eq!(h.engine.sync_now("U1").await.unwrap(), Outcome::Updated);
  assert!(h.policy(s.subject_id).await.active);
}

#[tokio::test]
async fn sync_now_for_unknown_user() {
  let h = harness().await;
  let err = h.engine.sync_now("nobody").await.unwrap_err();
  assert!(matches!(err, SyncError::Core(CoreError::SinkUserNotFound(u)) if u == "nobody"));
}

#[tokio::test]
async fn sync_now_keeps_disabled_subject_disabled() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.update_policy(s.subject_id, |p| {
    p.enabled = false;
    p.active = false;
  })
  .await;

  assert_eq!(h.engine.sync_now("U1").await.unwrap(), Outcome::Skipped(SkipReason::Disabled));
  assert!(!h.policy(s.subject_id).await.active);
}

#[tokio::test]
async fn stop_clears_what_was_written() {
  let h = harness().await;
  let s = h.connected("U1").await;
  h.play(long_track("T1"));
  h.evaluate(s.subject_id).await;

  assert!(h.engine.stop_sync(s.subject_id).await.unwrap());
  assert!(h.sink.writes().last().unwrap().is_clear());
  assert!(!h.policy(s.subject_id).await.active);
  assert_eq!(h.evaluate(s.subject_id).await, Outcome::Skipped(SkipReason::Paused));
}

#[tokio::test]
async fn stop_with_nothing_written_leaves_sink_alone() {
  let h = harness().await;
  let s = h.connected("U1").await;
  assert!(!h.engine.stop_sync(s.subject_id).await.unwrap());
  assert!(h.sink.writes().is_empty());
}

#[tokio::test]
async fn start_for_unknown_subject() {
  let h = harness().await;
  let err = h.engine.start_sync(Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, SyncError::Core(CoreError::SubjectNotFound(_))));
}

#[tokio::test]
async fn cycle_tallies_each_subject() {
  let h = harness().await;
  h.connected("U1").await;
  h.enroll("U2").await;
  h.play(long_track("T1"));

  let report = h.engine.run_cycle().await.unwrap();
  assert_eq!(report, CycleReport { succeeded: 1, skipped: 1, failed: 0 });
}

#[tokio::test]
async fn one_failing_subject_does_not_stop_the_cycle() {
  let h = harness().await;
  h.connected("U1").await;
  h.connected("U2").await;
  h.sink.fail_writes(SinkError::Api("profile_set_failed".into()));
  h.play(long_track("T1"));

  let report = h.engine.run_cycle().await.unwrap();
  assert_eq!(report, CycleReport { succeeded: 0, skipped: 0, failed: 2 });
}

#[tokio::test]
async fn scheduler_stops_on_cancel() {
  let h = harness().await;
  h.connected("U1").await;
  h.play(long_track("T1"));

  let engine = Arc::new(h.engine);
  let cancel = tokio_util::sync::CancellationToken::new();
  let task = tokio::spawn(crate::scheduler::run(
    engine,
    std::time::Duration::from_millis(5),
    cancel.clone(),
  ));

  tokio::time::sleep(std::time::Duration::from_millis(50)).await;
  cancel.cancel();
  task.await.unwrap();

  assert_eq!(h.sink.writes().len(), 1);
}
