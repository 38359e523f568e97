//! Player configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::player::Backend;
use crate::textproto::Framing;

/// Player configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerConfig {
  /// Which backend to open.
  #[serde(default)]
  pub backend: Backend,

  /// Volume applied when a backend starts (0-100).
  #[serde(default = "default_initial_volume")]
  pub initial_volume: u8,

  /// Deadline for a single IPC/socket round trip in milliseconds.
  #[serde(default = "default_ipc_timeout_ms")]
  pub ipc_timeout_ms: u64,

  /// How long to wait for the MPV socket or VLC port to appear.
  #[serde(default = "default_socket_wait_ms")]
  pub socket_wait_ms: u64,

  /// Interval between readiness probes.
  #[serde(default = "default_socket_poll_ms")]
  pub socket_poll_ms: u64,

  #[serde(default)]
  pub mpd: MpdConfig,

  #[serde(default)]
  pub vlc: VlcConfig,

  /// Custom executable paths (None = search PATH).
  #[serde(default)]
  pub executables: Executables,

  #[serde(default)]
  pub stream: StreamConfig,
}

/// MPD server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpdConfig {
  #[serde(default = "default_mpd_host")]
  pub host: String,
  #[serde(default = "default_mpd_port")]
  pub port: u16,
  #[serde(default)]
  pub framing: Framing,
}

/// VLC rc interface endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VlcConfig {
  #[serde(default = "default_vlc_host")]
  pub host: String,
  #[serde(default = "default_vlc_port")]
  pub port: u16,
  /// Launch VLC ourselves instead of attaching to a running instance.
  #[serde(default = "default_true")]
  pub spawn: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Executables {
  #[serde(default)]
  pub mpv: Option<String>,
  #[serde(default)]
  pub mplayer: Option<String>,
  #[serde(default)]
  pub vlc: Option<String>,
  #[serde(default)]
  pub ffplay: Option<String>,
}

/// Sizing of the built-in streaming pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
  /// Stereo frames held between the decoder and the audio output.
  #[serde(default = "default_buffer_frames")]
  pub buffer_frames: usize,
  /// Audio chunks queued between the HTTP reader and the decoder.
  #[serde(default = "default_pipe_chunks")]
  pub pipe_chunks: usize,
  /// Read size when the server sends no `icy-metaint`.
  #[serde(default = "default_chunk")]
  pub default_chunk: usize,
}

fn default_initial_volume() -> u8 {
  80
}

fn default_ipc_timeout_ms() -> u64 {
  2000
}

fn default_socket_wait_ms() -> u64 {
  2000
}

fn default_socket_poll_ms() -> u64 {
  10
}

fn default_mpd_host() -> String {
  "localhost".to_string()
}

fn default_mpd_port() -> u16 {
  6600
}

fn default_vlc_host() -> String {
  "127.0.0.1".to_string()
}

fn default_vlc_port() -> u16 {
  4212
}

fn default_true() -> bool {
  true
}

fn default_buffer_frames() -> usize {
  16384
}

fn default_pipe_chunks() -> usize {
  32
}

fn default_chunk() -> usize {
  8192
}

impl Default for PlayerConfig {
  fn default() -> Self {
    Self {
      backend: Backend::default(),
      initial_volume: default_initial_volume(),
      ipc_timeout_ms: default_ipc_timeout_ms(),
      socket_wait_ms: default_socket_wait_ms(),
      socket_poll_ms: default_socket_poll_ms(),
      mpd: MpdConfig::default(),
      vlc: VlcConfig::default(),
      executables: Executables::default(),
      stream: StreamConfig::default(),
    }
  }
}

impl Default for MpdConfig {
  fn default() -> Self {
    Self {
      host: default_mpd_host(),
      port: default_mpd_port(),
      framing: Framing::default(),
    }
  }
}

impl Default for VlcConfig {
  fn default() -> Self {
    Self {
      host: default_vlc_host(),
      port: default_vlc_port(),
      spawn: true,
    }
  }
}

impl Default for StreamConfig {
  fn default() -> Self {
    Self {
      buffer_frames: default_buffer_frames(),
      pipe_chunks: default_pipe_chunks(),
      default_chunk: default_chunk(),
    }
  }
}

impl PlayerConfig {
  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if self.initial_volume > 100 {
      return Err("Initial volume must be between 0 and 100".to_string());
    }
    if self.ipc_timeout_ms == 0 {
      return Err("IPC timeout must be greater than zero".to_string());
    }
    if self.socket_poll_ms == 0 || self.socket_poll_ms > self.socket_wait_ms {
      return Err("Socket poll interval must be between 1 and the socket wait".to_string());
    }
    if self.mpd.host.trim().is_empty() {
      return Err("MPD host cannot be empty".to_string());
    }
    if self.vlc.host.trim().is_empty() {
      return Err("VLC host cannot be empty".to_string());
    }
    if let Framing::SingleRead(0) = self.mpd.framing {
      return Err("MPD single-read size cannot be zero".to_string());
    }
    if self.stream.buffer_frames == 0 || self.stream.pipe_chunks == 0 || self.stream.default_chunk == 0 {
      return Err("Stream buffer sizes must be greater than zero".to_string());
    }
    Ok(())
  }

  pub fn ipc_timeout(&self) -> Duration {
    Duration::from_millis(self.ipc_timeout_ms)
  }

  pub fn socket_wait(&self) -> Duration {
    Duration::from_millis(self.socket_wait_ms)
  }

  pub fn socket_poll(&self) -> Duration {
    Duration::from_millis(self.socket_poll_ms)
  }

  /// Configured override path for `program`, ignoring blank entries.
  pub fn executable(&self, program: &str) -> Option<PathBuf> {
    let configured = match program {
      "mpv" => &self.executables.mpv,
      "mplayer" => &self.executables.mplayer,
      "vlc" => &self.executables.vlc,
      "ffplay" => &self.executables.ffplay,
      _ => return None,
    };
    configured
      .as_ref()
      .filter(|s| !s.trim().is_empty())
      .map(PathBuf::from)
  }
}
