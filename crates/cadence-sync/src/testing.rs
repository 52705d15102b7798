//! In-memory playback source and status sink for tests.
//!
//! Both record every call and answer with scripted results. The fake sink
//! behaves like a real profile: a successful `set_status` changes what
//! `get_status_text` returns next.

use std::sync::{
  Mutex,
  atomic::{AtomicUsize, Ordering},
};

use cadence_core::{
  playback::{Device, PlaybackSnapshot},
  sink::{SinkError, StatusSink, StatusUpdate},
  source::{PlaybackSource, SourceError, TokenGrant},
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> { m.lock().unwrap_or_else(|p| p.into_inner()) }

// ─── Source ──────────────────────────────────────────────────────────────────

/// One call received by [`FakeSource`], with the token it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
  CurrentPlayback(String),
  Refresh(String),
  Devices(String),
  Pause(String),
  Resume(String),
}

pub struct FakeSource {
  playback: Mutex<Result<Option<PlaybackSnapshot>, SourceError>>,
  refresh:  Mutex<Result<TokenGrant, SourceError>>,
  devices:  Mutex<Vec<Device>>,
  command:  Mutex<Result<(), SourceError>>,
  calls:    Mutex<Vec<SourceCall>>,
}

impl Default for FakeSource {
  fn default() -> Self {
    Self {
      playback: Mutex::new(Ok(None)),
      refresh:  Mutex::new(Err(SourceError::Api("refresh not scripted".into()))),
      devices:  Mutex::new(Vec::new()),
      command:  Mutex::new(Ok(())),
      calls:    Mutex::new(Vec::new()),
    }
  }
}

impl FakeSource {
  pub fn new() -> Self { Self::default() }

  pub fn set_playback(&self, result: Result<Option<PlaybackSnapshot>, SourceError>) {
    *lock(&self.playback) = result;
  }

  pub fn set_refresh(&self, result: Result<TokenGrant, SourceError>) { *lock(&self.refresh) = result; }

  pub fn set_devices(&self, devices: Vec<Device>) { *lock(&self.devices) = devices; }

  /// Result of `pause` and `resume`.
  pub fn set_command(&self, result: Result<(), SourceError>) { *lock(&self.command) = result; }

  pub fn calls(&self) -> Vec<SourceCall> { lock(&self.calls).clone() }

  pub fn call_count(&self) -> usize { lock(&self.calls).len() }

  fn record(&self, call: SourceCall) { lock(&self.calls).push(call); }
}

impl PlaybackSource for FakeSource {
  async fn current_playback(&self, access_token: &str) -> Result<Option<PlaybackSnapshot>, SourceError> {
    self.record(SourceCall::CurrentPlayback(access_token.to_owned()));
    lock(&self.playback).clone()
  }

  async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, SourceError> {
    self.record(SourceCall::Refresh(refresh_token.to_owned()));
    lock(&self.refresh).clone()
  }

  async fn devices(&self, access_token: &str) -> Result<Vec<Device>, SourceError> {
    self.record(SourceCall::Devices(access_token.to_owned()));
    lock(&self.command).clone()?;
    Ok(lock(&self.devices).clone())
  }

  async fn pause(&self, access_token: &str) -> Result<(), SourceError> {
    self.record(SourceCall::Pause(access_token.to_owned()));
    lock(&self.command).clone()
  }

  async fn resume(&self, access_token: &str) -> Result<(), SourceError> {
    self.record(SourceCall::Resume(access_token.to_owned()));
    lock(&self.command).clone()
  }
}

// ─── Sink ────────────────────────────────────────────────────────────────────

/// A direct message sent through [`FakeSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
  pub token:   String,
  pub channel: String,
  pub text:    String,
}

pub struct FakeSink {
  status:     Mutex<Result<String, SinkError>>,
  set_result: Mutex<Result<(), SinkError>>,
  post_error: Mutex<Option<SinkError>>,
  writes:     Mutex<Vec<StatusUpdate>>,
  messages:   Mutex<Vec<SentMessage>>,
  reads:      AtomicUsize,
}

impl Default for FakeSink {
  fn default() -> Self {
    Self {
      status:     Mutex::new(Ok(String::new())),
      set_result: Mutex::new(Ok(())),
      post_error: Mutex::new(None),
      writes:     Mutex::new(Vec::new()),
      messages:   Mutex::new(Vec::new()),
      reads:      AtomicUsize::new(0),
    }
  }
}

impl FakeSink {
  pub fn new() -> Self { Self::default() }

  /// Pretend someone set the status to `text`.
  pub fn set_status_text(&self, text: &str) { *lock(&self.status) = Ok(text.to_owned()); }

  /// Make status reads fail.
  pub fn fail_reads(&self, error: SinkError) { *lock(&self.status) = Err(error); }

  /// Make status writes fail.
  pub fn fail_writes(&self, error: SinkError) { *lock(&self.set_result) = Err(error); }

  pub fn fail_messages(&self, error: SinkError) { *lock(&self.post_error) = Some(error); }

  pub fn writes(&self) -> Vec<StatusUpdate> { lock(&self.writes).clone() }

  pub fn messages(&self) -> Vec<SentMessage> { lock(&self.messages).clone() }

  pub fn reads(&self) -> usize { self.reads.load(Ordering::SeqCst) }

  /// Total calls of any kind.
  pub fn call_count(&self) -> usize { self.reads() + lock(&self.writes).len() + lock(&self.messages).len() }
}

impl StatusSink for FakeSink {
  async fn set_status(&self, _token: &str, update: &StatusUpdate) -> Result<(), SinkError> {
    lock(&self.writes).push(update.clone());
    lock(&self.set_result).clone()?;
    *lock(&self.status) = Ok(update.text.clone());
    Ok(())
  }

  async fn get_status_text(&self, _token: &str, _user_id: &str) -> Result<String, SinkError> {
    self.reads.fetch_add(1, Ordering::SeqCst);
    lock(&self.status).clone()
  }

  async fn post_message(&self, token: &str, channel: &str, text: &str) -> Result<(), SinkError> {
    lock(&self.messages).push(SentMessage {
      token:   token.to_owned(),
      channel: channel.to_owned(),
      text:    text.to_owned(),
    });
    match lock(&self.post_error).clone() {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}
