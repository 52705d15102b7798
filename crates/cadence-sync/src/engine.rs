//! The reconciliation engine.
//!
//! [`Engine::evaluate`] decides, for one subject, whether the sink status is
//! written, cleared or left alone. [`Engine::run_cycle`] does that for every
//! active subject, one at a time, and tallies the outcomes.

use std::{
  collections::HashSet,
  sync::{Arc, Mutex},
};

use cadence_core::{
  Error as CoreError,
  playback::PlaybackSnapshot,
  policy::SyncPolicy,
  sink::StatusSink,
  source::PlaybackSource,
  store::{PolicyStore, SubjectStore},
  subject::{NowPlaying, Subject},
};
use rand::{RngCore, SeedableRng, rngs::StdRng};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
  clock::{Clock, SystemClock},
  config::SyncConfig,
  error::{Result, SyncError},
  reader::{PlaybackReader, ReadOutcome},
  report::{CycleReport, Outcome, SkipReason},
  vault::Vault,
  writer::{ClearOutcome, Revocation, StatusWriter, WriteOutcome},
};

// ─── Builder ─────────────────────────────────────────────────────────────────

pub struct EngineBuilder<S, P, K> {
  store:  Arc<S>,
  source: Arc<P>,
  sink:   Arc<K>,
  vault:  Arc<Vault>,
  config: SyncConfig,
  clock:  Arc<dyn Clock>,
  rng:    Option<Box<dyn RngCore + Send>>,
}

impl<S, P, K> EngineBuilder<S, P, K>
where
  S: SubjectStore + PolicyStore,
  P: PlaybackSource,
  K: StatusSink,
{
  pub fn config(mut self, config: SyncConfig) -> Self {
    self.config = config;
    self
  }

  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// RNG used for emoji rotation. Defaults to an entropy-seeded `StdRng`.
  pub fn rng(mut self, rng: Box<dyn RngCore + Send>) -> Self {
    self.rng = Some(rng);
    self
  }

  pub fn build(self) -> Engine<S, P, K> {
    let rng = self.rng.unwrap_or_else(|| Box::new(StdRng::from_entropy()));
    let reader = PlaybackReader::new(
      self.store.clone(),
      self.source,
      self.vault.clone(),
      self.clock.clone(),
      self.config.token_refresh_lead(),
    );
    let writer = StatusWriter::new(
      self.store.clone(),
      self.sink,
      self.vault,
      self.clock.clone(),
      rng,
      self.config.expiration_overhead(),
    );
    Engine {
      store: self.store,
      reader,
      writer,
      clock: self.clock,
      config: self.config,
      in_flight: Mutex::new(HashSet::new()),
    }
  }
}

// ─── In-flight guard ─────────────────────────────────────────────────────────

/// Holds a subject id in the in-flight set until dropped.
pub(crate) struct InFlight<'a> {
  set: &'a Mutex<HashSet<Uuid>>,
  id:  Uuid,
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.set.lock().unwrap_or_else(|p| p.into_inner()).remove(&self.id);
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct Engine<S, P, K> {
  store:     Arc<S>,
  reader:    PlaybackReader<S, P>,
  writer:    StatusWriter<S, K>,
  clock:     Arc<dyn Clock>,
  config:    SyncConfig,
  in_flight: Mutex<HashSet<Uuid>>,
}

impl<S, P, K> Engine<S, P, K>
where
  S: SubjectStore + PolicyStore,
  P: PlaybackSource,
  K: StatusSink,
{
  pub fn builder(
    store: Arc<S>,
    source: Arc<P>,
    sink: Arc<K>,
    vault: Arc<Vault>,
  ) -> EngineBuilder<S, P, K> {
    EngineBuilder {
      store,
      source,
      sink,
      vault,
      config: SyncConfig::default(),
      clock: Arc::new(SystemClock),
      rng: None,
    }
  }

  pub fn reader(&self) -> &PlaybackReader<S, P> { &self.reader }

  pub fn writer(&self) -> &StatusWriter<S, K> { &self.writer }

  pub fn config(&self) -> &SyncConfig { &self.config }

  pub(crate) fn claim(&self, id: Uuid) -> Option<InFlight<'_>> {
    let mut ids = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
    if ids.insert(id) { Some(InFlight { set: &self.in_flight, id }) } else { None }
  }

  /// Evaluate every active subject once, sequentially.
  ///
  /// A failing subject is logged and counted; it never stops the cycle.
  pub async fn run_cycle(&self) -> Result<CycleReport> {
    let subjects = self.store.find_active().await.map_err(SyncError::store)?;
    let mut report = CycleReport::default();

    for subject in &subjects {
      match self.evaluate(subject).await {
        Ok(outcome) => {
          debug!(subject_id = %subject.subject_id, ?outcome, "evaluated");
          report.record(&outcome);
        }
        Err(e) => {
          error!(subject_id = %subject.subject_id, error = %e, "evaluation failed");
          report.failed += 1;
        }
      }
    }

    info!(
      subjects = subjects.len(),
      succeeded = report.succeeded,
      skipped = report.skipped,
      failed = report.failed,
      "sync cycle complete"
    );
    Ok(report)
  }

  /// Reconcile one subject's sink status with their playback.
  ///
  /// The subject is re-read after claiming it, so a record loaded at the
  /// start of a long cycle is never acted on stale.
  pub async fn evaluate(&self, subject: &Subject) -> Result<Outcome> {
    let Some(_claim) = self.claim(subject.subject_id) else {
      debug!(subject_id = %subject.subject_id, "evaluation already in flight");
      return Ok(Outcome::Skipped(SkipReason::Busy));
    };

    let subject = self.load(subject.subject_id).await?;
    self.evaluate_claimed(&subject).await
  }

  async fn evaluate_claimed(&self, subject: &Subject) -> Result<Outcome> {
    let id = subject.subject_id;

    // Eligibility.
    if subject.source.is_none() {
      return Ok(Outcome::Skipped(SkipReason::NoSourceCredential));
    }
    if subject.sync_state.is_invalidated() {
      return Ok(Outcome::Skipped(SkipReason::Invalidated));
    }
    let Some(policy) = self.store.get_policy(id).await.map_err(SyncError::store)? else {
      return Ok(Outcome::Skipped(SkipReason::NoPolicy));
    };

    // Sync gate.
    if let Some(reason) = self.gate(subject, &policy) {
      return Ok(Outcome::Skipped(reason));
    }

    if self.writer.detect_manual_change(subject).await {
      self.store.mark_manual_override(id).await.map_err(SyncError::store)?;
      self.store.set_policy_active(id, false).await.map_err(SyncError::store)?;
      info!(subject_id = %id, "status changed by hand, pausing sync");
      return Ok(Outcome::ManualOverrideDetected);
    }

    let snapshot = match self.reader.current_snapshot(subject).await? {
      ReadOutcome::Snapshot(s) => s,
      ReadOutcome::Unauthorized(reason) => {
        self.writer.invalidate(subject, Revocation::Source, &reason).await?;
        return Ok(Outcome::Invalidated);
      }
      ReadOutcome::Unavailable(_) => return Ok(Outcome::Unavailable),
    };

    match snapshot.filter(|s| admits(&policy, s)) {
      None => self.nothing_playing(subject).await,
      Some(s) => self.playing(subject, s).await,
    }
  }

  fn gate(&self, subject: &Subject, policy: &SyncPolicy) -> Option<SkipReason> {
    if !policy.enabled {
      Some(SkipReason::Disabled)
    } else if !policy.active {
      Some(SkipReason::Paused)
    } else if !policy.working_hours.allows(self.clock.now()) {
      Some(SkipReason::OutsideWorkingHours)
    } else if subject.sync_state.is_manual_override() {
      Some(SkipReason::ManualOverride)
    } else {
      None
    }
  }

  async fn nothing_playing(&self, subject: &Subject) -> Result<Outcome> {
    if subject.now_playing.is_none() {
      return Ok(Outcome::Idle);
    }
    Ok(match self.writer.clear_status(subject).await? {
      ClearOutcome::Cleared => Outcome::Cleared,
      ClearOutcome::NotNeeded => {
        // Already cleared on the sink, but the track is still remembered.
        if !subject.sync_state.is_manual_override() {
          self.store.record_status_cleared(subject.subject_id).await.map_err(SyncError::store)?;
        }
        Outcome::Idle
      }
      ClearOutcome::Invalidated => Outcome::Invalidated,
    })
  }

  async fn playing(&self, subject: &Subject, snapshot: PlaybackSnapshot) -> Result<Outcome> {
    let track_changed = subject
      .now_playing
      .as_ref()
      .is_none_or(|np| np.track_id != snapshot.track_id);
    let needs_refresh = snapshot
      .remaining_ms()
      .is_none_or(|r| r <= self.config.refresh_threshold_ms());

    if !track_changed && !needs_refresh {
      return Ok(Outcome::Unchanged);
    }

    let written = self
      .writer
      .write(subject, &snapshot.title, &snapshot.performer, snapshot.duration_ms, snapshot.progress_ms)
      .await?;

    match written {
      WriteOutcome::Written(_) if track_changed => {
        let track = NowPlaying {
          track_id:  snapshot.track_id,
          title:     snapshot.title,
          performer: snapshot.performer,
        };
        self
          .store
          .record_now_playing(subject.subject_id, track, self.clock.now())
          .await
          .map_err(SyncError::store)?;
        Ok(Outcome::Updated)
      }
      WriteOutcome::Written(_) => Ok(Outcome::Refreshed),
      WriteOutcome::Aborted => Ok(Outcome::Skipped(SkipReason::Disabled)),
      WriteOutcome::Invalidated => Ok(Outcome::Invalidated),
    }
  }

  // ── Operations outside the schedule ───────────────────────────────────

  pub async fn subject_by_sink_user(&self, sink_user_id: &str) -> Result<Subject> {
    self
      .store
      .find_by_sink_user(sink_user_id)
      .await
      .map_err(SyncError::store)?
      .ok_or_else(|| CoreError::SinkUserNotFound(sink_user_id.to_owned()).into())
  }

  /// Evaluate one subject now, starting sync first when it is enabled but
  /// paused. Start and evaluation run under one claim.
  pub async fn sync_now(&self, sink_user_id: &str) -> Result<Outcome> {
    let found = self.subject_by_sink_user(sink_user_id).await?;
    let id = found.subject_id;
    let Some(_claim) = self.claim(id) else {
      debug!(subject_id = %id, "manual sync while in flight");
      return Ok(Outcome::Skipped(SkipReason::Busy));
    };

    let subject = self.load(id).await?;
    let policy = self.store.get_policy(id).await.map_err(SyncError::store)?;
    let paused = policy.is_some_and(|p| p.enabled && (!p.active || subject.sync_state.is_manual_override()));
    let subject = if paused {
      self.start_claimed(&subject).await?;
      self.load(id).await?
    } else {
      subject
    };

    let outcome = self.evaluate_claimed(&subject).await?;
    info!(subject_id = %id, ?outcome, "manual sync");
    Ok(outcome)
  }

  /// Start (or resume) sync for a subject.
  ///
  /// Leaving a manual override adopts whatever the sink shows now as the
  /// baseline and forgets the last track, so the next cycle writes fresh.
  /// Fails with [`SyncError::Busy`] while the subject is being evaluated.
  pub async fn start_sync(&self, subject_id: Uuid) -> Result<()> {
    let _claim = self.claim(subject_id).ok_or(SyncError::Busy(subject_id))?;
    let subject = self.load(subject_id).await?;
    self.start_claimed(&subject).await
  }

  async fn start_claimed(&self, subject: &Subject) -> Result<()> {
    let subject_id = subject.subject_id;
    let policy = self
      .store
      .get_policy(subject_id)
      .await
      .map_err(SyncError::store)?
      .ok_or(CoreError::PolicyNotFound(subject_id))?;

    if !policy.active {
      self.store.set_policy_active(subject_id, true).await.map_err(SyncError::store)?;
    }
    if subject.sync_state.is_manual_override() {
      let baseline = self.writer.current_status_text(subject).await;
      self.store.resume(subject_id, baseline).await.map_err(SyncError::store)?;
    }

    info!(subject_id = %subject_id, "sync started");
    Ok(())
  }

  /// Pause sync and clear the status this system wrote. Returns whether
  /// the sink was called. Fails with [`SyncError::Busy`] while the subject
  /// is being evaluated.
  pub async fn stop_sync(&self, subject_id: Uuid) -> Result<bool> {
    let _claim = self.claim(subject_id).ok_or(SyncError::Busy(subject_id))?;
    let subject = self.load(subject_id).await?;
    if self.store.get_policy(subject_id).await.map_err(SyncError::store)?.is_none() {
      return Err(CoreError::PolicyNotFound(subject_id).into());
    }

    self.store.set_policy_active(subject_id, false).await.map_err(SyncError::store)?;

    let wrote_something = subject.last_status_text.as_deref().is_some_and(|t| !t.trim().is_empty());
    let cleared = if wrote_something { self.writer.clear(&subject).await? } else { false };

    info!(subject_id = %subject_id, cleared, "sync stopped");
    Ok(cleared)
  }

  async fn load(&self, id: Uuid) -> Result<Subject> {
    self
      .store
      .get_subject(id)
      .await
      .map_err(SyncError::store)?
      .ok_or_else(|| CoreError::SubjectNotFound(id).into())
  }
}

/// Content-filter and device allow-list check. Paused snapshots count as
/// nothing playing.
fn admits(policy: &SyncPolicy, snapshot: &PlaybackSnapshot) -> bool {
  snapshot.is_playing
    && policy.content_filter.admits(snapshot.content_type)
    && policy.allows_device(snapshot.device_id())
}
