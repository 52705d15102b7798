//! Status Writer: the only component that touches the sink's status.

use std::sync::{Arc, Mutex};

use cadence_core::{
  sink::{SinkError, StatusSink, StatusUpdate},
  store::{PolicyStore, SubjectStore},
  subject::Subject,
};
use rand::RngCore;
use tracing::{debug, info, warn};

use crate::{
  clock::Clock,
  error::{Result, SyncError},
  template,
  vault::Vault,
};

/// Result of [`StatusWriter::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
  /// The status now reads this text.
  Written(String),
  /// The policy was disabled or removed since the cycle started.
  Aborted,
  /// The sink rejected the credential; the subject is now invalidated.
  Invalidated,
}

/// Result of [`StatusWriter::clear_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
  Cleared,
  /// Already clear, or a human owns the status.
  NotNeeded,
  Invalidated,
}

/// Which side revoked a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revocation {
  Sink,
  Source,
}

impl Revocation {
  /// Direct message sent to the subject once their credential is revoked.
  pub fn notice(self) -> &'static str {
    match self {
      Self::Sink => {
        ":warning: *Your Slack connection has been revoked*\n\nYour status can no longer be updated automatically. Reinstall the app to resume status updates."
      }
      Self::Source => {
        ":warning: *Your Spotify connection has been revoked*\n\nReconnect your Spotify account to resume status updates."
      }
    }
  }
}

pub struct StatusWriter<S, K> {
  store:               Arc<S>,
  sink:                Arc<K>,
  vault:               Arc<Vault>,
  clock:               Arc<dyn Clock>,
  rng:                 Mutex<Box<dyn RngCore + Send>>,
  expiration_overhead: chrono::Duration,
}

impl<S, K> StatusWriter<S, K>
where
  S: SubjectStore + PolicyStore,
  K: StatusSink,
{
  pub fn new(
    store: Arc<S>,
    sink: Arc<K>,
    vault: Arc<Vault>,
    clock: Arc<dyn Clock>,
    rng: Box<dyn RngCore + Send>,
    expiration_overhead: chrono::Duration,
  ) -> Self {
    Self { store, sink, vault, clock, rng: Mutex::new(rng), expiration_overhead }
  }

  /// Render and send a status for the given track.
  ///
  /// The expiration is `now + (duration - progress) + overhead` and is only
  /// set when the duration is known.
  pub async fn write(
    &self,
    subject: &Subject,
    title: &str,
    performer: &str,
    duration_ms: Option<u64>,
    progress_ms: Option<u64>,
  ) -> Result<WriteOutcome> {
    let policy = match self.store.get_policy(subject.subject_id).await.map_err(SyncError::store)? {
      Some(p) if p.enabled => p,
      _ => {
        debug!(subject_id = %subject.subject_id, "sync disabled mid-cycle, not writing");
        return Ok(WriteOutcome::Aborted);
      }
    };

    let text  = template::render(&policy, title, performer);
    let emoji = {
      let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
      template::pick_emoji(&policy, &mut **rng)
    };
    let now = self.clock.now();
    let expires_at = duration_ms.filter(|d| *d > 0).map(|d| {
      let remaining = d.saturating_sub(progress_ms.unwrap_or(0));
      now + chrono::Duration::milliseconds(remaining as i64) + self.expiration_overhead
    });

    let update = StatusUpdate { text: text.clone(), emoji, expires_at };
    let token  = self.vault.open(&subject.sink_token)?;

    match self.sink.set_status(&token, &update).await {
      Ok(()) => {
        self
          .store
          .record_status_written(subject.subject_id, text.clone())
          .await
          .map_err(SyncError::store)?;
        debug!(subject_id = %subject.subject_id, status = %text, "status written");
        Ok(WriteOutcome::Written(text))
      }
      Err(SinkError::CredentialInvalid(reason)) => {
        self.invalidate(subject, Revocation::Sink, &reason).await?;
        Ok(WriteOutcome::Invalidated)
      }
      Err(e) => Err(e.into()),
    }
  }

  /// Clear the status. Returns whether a sink call was made.
  pub async fn clear(&self, subject: &Subject) -> Result<bool> {
    Ok(self.clear_status(subject).await? != ClearOutcome::NotNeeded)
  }

  /// Clear the status and report what happened.
  pub async fn clear_status(&self, subject: &Subject) -> Result<ClearOutcome> {
    if subject.sync_state.is_manual_override() || subject.status_cleared {
      return Ok(ClearOutcome::NotNeeded);
    }

    let token = self.vault.open(&subject.sink_token)?;
    match self.sink.set_status(&token, &StatusUpdate::cleared()).await {
      Ok(()) => {
        self.store.record_status_cleared(subject.subject_id).await.map_err(SyncError::store)?;
        debug!(subject_id = %subject.subject_id, "status cleared");
        Ok(ClearOutcome::Cleared)
      }
      Err(SinkError::CredentialInvalid(reason)) => {
        self.invalidate(subject, Revocation::Sink, &reason).await?;
        Ok(ClearOutcome::Invalidated)
      }
      Err(e) => Err(e.into()),
    }
  }

  /// The sink's current status text, or `None` when it cannot be read.
  pub async fn current_status_text(&self, subject: &Subject) -> Option<String> {
    let token = match self.vault.open(&subject.sink_token) {
      Ok(t) => t,
      Err(e) => {
        warn!(subject_id = %subject.subject_id, error = %e, "cannot open sink credential");
        return None;
      }
    };
    match self.sink.get_status_text(&token, &subject.sink_user_id).await {
      Ok(text) => Some(text),
      Err(e) => {
        warn!(subject_id = %subject.subject_id, error = %e, "cannot read sink status");
        None
      }
    }
  }

  /// True when someone other than this system changed the status.
  ///
  /// Fails open: an unreadable sink counts as unchanged.
  pub async fn detect_manual_change(&self, subject: &Subject) -> bool {
    let Some(current) = self.current_status_text(subject).await else {
      return false;
    };
    if current.trim().is_empty() {
      return false;
    }
    match subject.last_status_text.as_deref().map(str::trim) {
      None | Some("") => true,
      Some(last) => template::normalize_status_text(last) != template::normalize_status_text(&current),
    }
  }

  /// Mark the subject invalidated and tell them, best effort.
  pub async fn invalidate(&self, subject: &Subject, revocation: Revocation, reason: &str) -> Result<()> {
    warn!(
      subject_id = %subject.subject_id,
      side = ?revocation,
      reason,
      "credential revoked, invalidating subject"
    );
    self
      .store
      .mark_invalidated(subject.subject_id, self.clock.now())
      .await
      .map_err(SyncError::store)?;
    self.notify(subject, revocation.notice()).await;
    Ok(())
  }

  async fn notify(&self, subject: &Subject, text: &str) {
    let Some(bot_token) = &subject.sink_bot_token else {
      debug!(subject_id = %subject.subject_id, "no bot credential, skipping notice");
      return;
    };
    let token = match self.vault.open(bot_token) {
      Ok(t) => t,
      Err(e) => {
        warn!(subject_id = %subject.subject_id, error = %e, "cannot open bot credential");
        return;
      }
    };
    match self.sink.post_message(&token, &subject.sink_user_id, text).await {
      Ok(()) => info!(subject_id = %subject.subject_id, "sent revocation notice"),
      Err(e) => warn!(subject_id = %subject.subject_id, error = %e, "revocation notice failed"),
    }
  }
}
