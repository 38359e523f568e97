//! Elapsed playback time accounting across pause and resume.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct PlayTime {
  accumulated: Duration,
  running_since: Option<Instant>,
}

impl PlayTime {
  fn reset(&mut self, now: Instant) {
    self.accumulated = Duration::ZERO;
    self.running_since = Some(now);
  }

  fn pause(&mut self, now: Instant) {
    if let Some(since) = self.running_since.take() {
      self.accumulated += now.saturating_duration_since(since);
    }
  }

  fn resume(&mut self, now: Instant) {
    if self.running_since.is_none() {
      self.running_since = Some(now);
    }
  }

  fn elapsed(&self, now: Instant) -> Duration {
    match self.running_since {
      Some(since) => self.accumulated + now.saturating_duration_since(since),
      None => self.accumulated,
    }
  }
}

/// Wall-clock play time for backends that cannot report their own position.
///
/// Running while playing, frozen while paused. All operations take the same
/// lock, so a UI poller may read while the owning driver mutates.
#[derive(Debug, Default)]
pub struct PlaybackTimeTracker {
  inner: Mutex<PlayTime>,
}

impl PlaybackTimeTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Zero the clock and start it running.
  pub fn reset(&self) {
    self.inner.lock().reset(Instant::now());
  }

  /// Freeze the clock. Pausing twice counts once.
  pub fn pause(&self) {
    self.inner.lock().pause(Instant::now());
  }

  /// Restart the clock from its frozen value. No-op while running.
  pub fn resume(&self) {
    self.inner.lock().resume(Instant::now());
  }

  pub fn is_running(&self) -> bool {
    self.inner.lock().running_since.is_some()
  }

  /// Elapsed play time in whole seconds, rounded down.
  pub fn play_time_secs(&self) -> i64 {
    self.inner.lock().elapsed(Instant::now()).as_secs() as i64
  }
}
