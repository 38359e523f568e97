//! The player contract shared by every backend.
//!
//! A caller picks one [`Backend`] at startup, opens it with [`open_player`]
//! and drives it through the [`Player`] trait for the rest of the run.

mod beep;
mod error;
mod playtime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::PlayerConfig;
use crate::launcher::{LaunchedPlayer, FFPLAY, MPV_SPAWN};
use crate::mpd::MpdClient;
use crate::mplayer::MplayerClient;
use crate::mpv::MpvClient;
use crate::process;
use crate::stream::StreamingPlayer;
use crate::vlc::VlcClient;

pub use beep::BeepPlayer;
pub use error::PlayerError;
pub use playtime::PlaybackTimeTracker;

/// Snapshot of what is playing.
///
/// `None` from [`Player::metadata`] means nothing is playing; a snapshot with
/// only `err` set means something is playing but the backend reported a problem.
#[derive(Debug, Default)]
pub struct Metadata {
  pub title: String,
  pub playback_time_sec: Option<i64>,
  pub err: Option<PlayerError>,
}

impl Metadata {
  pub fn from_error(err: PlayerError) -> Self {
    Self {
      err: Some(err),
      ..Default::default()
    }
  }
}

/// Uniform control surface over all playback backends.
///
/// Operations on one instance must not run concurrently; `&mut self` enforces that.
#[async_trait]
pub trait Player: Send {
  /// Stop whatever is playing and start `url`.
  async fn play(&mut self, url: &str) -> Result<(), PlayerError>;

  /// `true` pauses, `false` resumes. Repeating the current state is a no-op.
  async fn pause(&mut self, paused: bool) -> Result<(), PlayerError>;

  async fn stop(&mut self) -> Result<(), PlayerError>;

  /// Set absolute volume on a 0-100 scale, returning the value applied.
  async fn set_volume(&mut self, volume: i32) -> Result<i32, PlayerError>;

  /// Best-effort snapshot, `None` when nothing is playing.
  async fn metadata(&mut self) -> Option<Metadata>;

  /// Relative seek in seconds. Backends without seek return an unseeked snapshot.
  async fn seek(&mut self, secs: i32) -> Option<Metadata>;

  /// Release the process and connection. Later calls are no-ops.
  async fn close(&mut self) -> Result<(), PlayerError>;
}

/// Clamp a requested volume into 0..=100.
pub fn clamp_volume(volume: i32) -> u8 {
  volume.clamp(0, 100) as u8
}

/// Available playback backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Backend {
  /// mpv controlled over its JSON IPC socket.
  Mpv,
  /// mpv launched per track with no control channel.
  MpvSpawn,
  /// Music Player Daemon over TCP.
  Mpd,
  /// MPlayer in slave mode.
  Mplayer,
  /// VLC `rc` interface.
  Vlc,
  /// ffplay launched per track.
  Ffplay,
  /// Built-in HTTP + decode pipeline.
  #[default]
  Internal,
  /// Terminal bell, used when nothing else is available.
  Beep,
}

impl Backend {
  pub const ALL: [Backend; 8] = [
    Backend::Mpv,
    Backend::MpvSpawn,
    Backend::Mpd,
    Backend::Mplayer,
    Backend::Vlc,
    Backend::Ffplay,
    Backend::Internal,
    Backend::Beep,
  ];

  /// Executable this backend needs on PATH, if any.
  ///
  /// MPD is a network server that may live on another host, so it is not probed.
  pub fn program(self) -> Option<&'static str> {
    match self {
      Backend::Mpv | Backend::MpvSpawn => Some("mpv"),
      Backend::Mplayer => Some("mplayer"),
      Backend::Vlc => Some("vlc"),
      Backend::Ffplay => Some("ffplay"),
      Backend::Mpd | Backend::Internal | Backend::Beep => None,
    }
  }
}

/// Backends whose executable can be found, honoring configured overrides.
pub fn available_backends(config: &PlayerConfig) -> Vec<Backend> {
  Backend::ALL
    .into_iter()
    .filter(|backend| match backend.program() {
      Some(program) => {
        process::resolve_executable(program, config.executable(program).as_deref()).is_ok()
      }
      None => true,
    })
    .collect()
}

/// Build the configured backend.
///
/// `cancel` governs startup waits and background tasks for the driver's lifetime.
pub async fn open_player(
  config: &PlayerConfig,
  cancel: CancellationToken,
) -> Result<Box<dyn Player>, PlayerError> {
  config.validate().map_err(PlayerError::Config)?;
  log::info!("Opening {:?} player", config.backend);

  let player: Box<dyn Player> = match config.backend {
    Backend::Mpv => Box::new(MpvClient::new(config, cancel)),
    Backend::MpvSpawn => Box::new(LaunchedPlayer::new(&MPV_SPAWN, config)),
    Backend::Mpd => Box::new(MpdClient::connect(&config.mpd, config.ipc_timeout()).await?),
    Backend::Mplayer => Box::new(MplayerClient::new(config)),
    Backend::Vlc => Box::new(VlcClient::new(config, cancel)),
    Backend::Ffplay => Box::new(LaunchedPlayer::new(&FFPLAY, config)),
    Backend::Internal => Box::new(StreamingPlayer::new(config, cancel)?),
    Backend::Beep => Box::new(BeepPlayer),
  };
  Ok(player)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_clamp_volume() {
    assert_eq!(clamp_volume(-5), 0);
    assert_eq!(clamp_volume(0), 0);
    assert_eq!(clamp_volume(55), 55);
    assert_eq!(clamp_volume(100), 100);
    assert_eq!(clamp_volume(250), 100);
  }

  #[test]
  fn test_backend_serde_names() {
    let json = serde_json::to_string(&Backend::MpvSpawn).unwrap();
    assert_eq!(json, "\"mpvSpawn\"");
    let backend: Backend = serde_json::from_str("\"ffplay\"").unwrap();
    assert_eq!(backend, Backend::Ffplay);
  }

  #[test]
  fn test_processless_backends_always_available() {
    let available = available_backends(&PlayerConfig::default());
    assert!(available.contains(&Backend::Internal));
    assert!(available.contains(&Backend::Beep));
    assert!(available.contains(&Backend::Mpd));
  }

  #[test]
  fn test_metadata_from_error() {
    let meta = Metadata::from_error(PlayerError::NoMetadata);
    assert!(meta.title.is_empty());
    assert!(meta.playback_time_sec.is_none());
    assert!(matches!(meta.err, Some(PlayerError::NoMetadata)));
  }

  #[tokio::test]
  async fn test_open_beep_player() {
    let config = PlayerConfig {
      backend: Backend::Beep,
      ..Default::default()
    };
    let mut player = open_player(&config, CancellationToken::new()).await.unwrap();
    assert!(player.metadata().await.is_none());
    assert_eq!(player.set_volume(140).await.unwrap(), 100);
    player.close().await.unwrap();
  }
}
