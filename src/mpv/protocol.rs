//! MPV JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Random non-zero request ID, so stale replies from earlier calls never match.
pub fn next_request_id() -> i64 {
  rand::rng().random_range(1..=i64::from(i32::MAX))
}

/// Command sent to MPV via IPC.
#[derive(Debug, Clone, Serialize)]
pub struct MpvCommand {
  pub command: Vec<Value>,
  pub request_id: i64,
}

impl MpvCommand {
  /// Create a new command with a random request ID.
  pub fn new(args: Vec<Value>) -> Self {
    Self {
      command: args,
      request_id: next_request_id(),
    }
  }

  /// Replace whatever is playing with `url`.
  pub fn loadfile(url: &str) -> Self {
    Self::new(vec!["loadfile".into(), url.into(), "replace".into()])
  }

  /// Relative seek in seconds.
  pub fn seek_relative(secs: i32) -> Self {
    Self::new(vec!["seek".into(), secs.into(), "relative".into()])
  }

  /// Set pause state.
  pub fn set_pause(paused: bool) -> Self {
    Self::new(vec!["set_property".into(), "pause".into(), paused.into()])
  }

  /// Set volume (0-100).
  pub fn set_volume(volume: u8) -> Self {
    Self::new(vec!["set_property".into(), "volume".into(), volume.into()])
  }

  /// Get a property value.
  pub fn get_property(name: &str) -> Self {
    Self::new(vec!["get_property".into(), name.into()])
  }

  /// Stop playback, keep the player idle.
  pub fn stop() -> Self {
    Self::new(vec!["stop".into()])
  }

  /// Quit MPV.
  pub fn quit() -> Self {
    Self::new(vec!["quit".into()])
  }
}

/// Response from MPV for a command.
#[derive(Debug, Clone, Deserialize)]
pub struct MpvResponse {
  /// "success" or error message.
  pub error: String,
  /// Response data (command-specific).
  #[serde(default)]
  pub data: Option<Value>,
  /// Matching request ID.
  pub request_id: i64,
}

impl MpvResponse {
  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error == "success"
  }
}

/// Unsolicited event (property changes, playback events, etc.).
#[derive(Debug, Clone, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g., "start-file", "end-file", "metadata-update").
  pub event: String,
  /// Reason for end-file events (e.g., "eof", "stop", "error").
  #[serde(default)]
  pub reason: Option<String>,
}

/// Message received from MPV IPC (either response or event).
#[derive(Debug, Clone)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
}

impl MpvMessage {
  /// Parse a JSON line from MPV.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("request_id").is_some() {
      Ok(MpvMessage::Response(serde_json::from_value(value)?))
    } else {
      Ok(MpvMessage::Event(serde_json::from_value(value)?))
    }
  }
}

/// Pull the ICY stream title out of MPV's `metadata` property.
pub fn icy_title(metadata: &Value) -> Option<String> {
  let map = metadata.as_object()?;
  map
    .iter()
    .find(|(key, _)| key.eq_ignore_ascii_case("icy-title"))
    .and_then(|(_, value)| value.as_str())
    .map(str::trim)
    .filter(|title| !title.is_empty())
    .map(str::to_string)
}

/// Whole seconds from a `playback-time` reply, negative values clamped to zero.
pub fn playback_seconds(data: Option<&Value>) -> Option<i64> {
  data.and_then(Value::as_f64).map(|secs| secs.max(0.0).floor() as i64)
}
