//! Injectable time source.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
  pub fn new(at: DateTime<Utc>) -> Self { Self(Mutex::new(at)) }

  pub fn set(&self, at: DateTime<Utc>) {
    *self.0.lock().unwrap_or_else(|p| p.into_inner()) = at;
  }

  pub fn advance(&self, by: chrono::Duration) {
    let mut now = self.0.lock().unwrap_or_else(|p| p.into_inner());
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> { *self.0.lock().unwrap_or_else(|p| p.into_inner()) }
}
