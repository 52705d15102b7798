//! Fixed-delay loop around [`Engine::run_cycle`].

use std::{sync::Arc, time::Duration};

use cadence_core::{
  sink::StatusSink,
  source::PlaybackSource,
  store::{PolicyStore, SubjectStore},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::Engine;

/// Run cycles until `cancel` fires.
///
/// The next cycle starts `poll_interval` after the previous one finished,
/// so cycles never overlap. A cycle in progress is allowed to complete.
pub async fn run<S, P, K>(engine: Arc<Engine<S, P, K>>, poll_interval: Duration, cancel: CancellationToken)
where
  S: SubjectStore + PolicyStore,
  P: PlaybackSource,
  K: StatusSink,
{
  info!(interval_ms = poll_interval.as_millis() as u64, "sync scheduler started");

  while !cancel.is_cancelled() {
    if let Err(e) = engine.run_cycle().await {
      error!(error = %e, "sync cycle failed");
    }

    tokio::select! {
      _ = cancel.cancelled() => break,
      _ = tokio::time::sleep(poll_interval) => {}
    }
  }

  info!("sync scheduler stopped");
}
