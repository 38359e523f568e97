//! MPV backend: an idle mpv process driven over JSON IPC.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::ipc::{IpcError, MpvIpc};
use super::process::{cleanup_ipc, ipc_path, launch_spec};
use super::protocol::{icy_title, playback_seconds, MpvCommand, MpvResponse};
use crate::config::PlayerConfig;
use crate::player::{clamp_volume, Metadata, Player, PlayerError};
use crate::process::{poll_ready, ManagedProcess};

/// Live mpv process plus its IPC connection.
struct Session {
  process: ManagedProcess,
  ipc: MpvIpc,
}

/// MPV client implementing the player contract.
///
/// The mpv process is started on the first `play` and restarted by a later
/// `play` if it died in between.
pub struct MpvClient {
  executable: Option<PathBuf>,
  ipc_timeout: Duration,
  socket_wait: Duration,
  socket_poll: Duration,
  cancel: CancellationToken,
  socket_path: PathBuf,
  session: Option<Session>,
  volume: u8,
  playing: bool,
}

impl MpvClient {
  pub fn new(config: &PlayerConfig, cancel: CancellationToken) -> Self {
    Self {
      executable: config.executable("mpv"),
      ipc_timeout: config.ipc_timeout(),
      socket_wait: config.socket_wait(),
      socket_poll: config.socket_poll(),
      cancel,
      socket_path: ipc_path(),
      session: None,
      volume: config.initial_volume,
      playing: false,
    }
  }

  /// Start mpv and connect to IPC unless a live session exists.
  async fn ensure_session(&mut self) -> Result<&mut Session, PlayerError> {
    let alive = match self.session.as_mut() {
      Some(session) => !session.process.has_exited(),
      None => false,
    };

    if !alive {
      if let Some(mut dead) = self.session.take() {
        log::warn!("MPV process exited, restarting");
        if let Err(e) = dead.ipc.close().await {
          log::warn!("Failed to close stale MPV IPC: {}", e);
        }
        dead.process.kill().await?;
      }
      self.session = Some(self.start().await?);
    }

    self.session.as_mut().ok_or(PlayerError::NotPlaying)
  }

  async fn start(&self) -> Result<Session, PlayerError> {
    cleanup_ipc(&self.socket_path);

    let spec = launch_spec(self.executable.clone(), &self.socket_path, self.volume);
    let mut process = ManagedProcess::spawn(&spec)?;

    let path = self.socket_path.as_path();
    let timeout = self.ipc_timeout;
    let connected = poll_ready(
      "mpv IPC socket",
      self.socket_poll,
      self.socket_wait,
      &self.cancel,
      move || MpvIpc::connect(path, timeout),
    )
    .await;

    match connected {
      Ok(ipc) => {
        log::info!("MPV client connected on {:?}", self.socket_path);
        Ok(Session { process, ipc })
      }
      Err(e) => {
        if let Err(kill_err) = process.kill().await {
          log::warn!("Failed to kill MPV after IPC setup failure: {}", kill_err);
        }
        cleanup_ipc(&self.socket_path);
        Err(e.into())
      }
    }
  }

  /// Send a command over the current session.
  async fn send(&mut self, cmd: MpvCommand) -> Result<MpvResponse, PlayerError> {
    let session = self.session.as_mut().ok_or(PlayerError::NotPlaying)?;
    Ok(session.ipc.request(cmd).await?)
  }

  async fn current_title(&mut self) -> Result<String, PlayerError> {
    match self.send(MpvCommand::get_property("metadata")).await {
      Ok(response) => response
        .data
        .as_ref()
        .and_then(icy_title)
        .ok_or(PlayerError::NoMetadata),
      // Property unavailable until the stream has opened.
      Err(e) if e.is_protocol() => Err(PlayerError::NoMetadata),
      Err(e) => Err(e),
    }
  }
}

#[async_trait]
impl Player for MpvClient {
  async fn play(&mut self, url: &str) -> Result<(), PlayerError> {
    self.playing = false;
    let session = self.ensure_session().await?;
    // Loading while paused would start the new stream paused.
    session.ipc.request(MpvCommand::set_pause(false)).await?;
    session.ipc.request(MpvCommand::loadfile(url)).await?;
    log::info!("MPV playing {}", url);
    self.playing = true;
    Ok(())
  }

  async fn pause(&mut self, paused: bool) -> Result<(), PlayerError> {
    if !self.playing {
      return Ok(());
    }
    self.send(MpvCommand::set_pause(paused)).await?;
    Ok(())
  }

  async fn stop(&mut self) -> Result<(), PlayerError> {
    if self.session.is_none() {
      return Ok(());
    }
    self.playing = false;
    self.send(MpvCommand::stop()).await?;
    Ok(())
  }

  async fn set_volume(&mut self, volume: i32) -> Result<i32, PlayerError> {
    let volume = clamp_volume(volume);
    if self.session.is_some() {
      self.send(MpvCommand::set_volume(volume)).await?;
    }
    self.volume = volume;
    Ok(volume as i32)
  }

  async fn metadata(&mut self) -> Option<Metadata> {
    if !self.playing {
      return None;
    }
    let session = self.session.as_mut()?;
    if session.process.has_exited() {
      return Some(Metadata::from_error(PlayerError::ProcessExited));
    }

    let mut meta = Metadata::default();
    match self.current_title().await {
      Ok(title) => meta.title = title,
      Err(e) => meta.err = Some(e),
    }
    match self.send(MpvCommand::get_property("playback-time")).await {
      Ok(response) => meta.playback_time_sec = playback_seconds(response.data.as_ref()),
      Err(e) => {
        log::debug!("MPV playback-time unavailable: {}", e);
        if meta.err.is_none() {
          meta.err = Some(e);
        }
      }
    }
    Some(meta)
  }

  async fn seek(&mut self, secs: i32) -> Option<Metadata> {
    if !self.playing {
      return None;
    }
    if let Err(e) = self.send(MpvCommand::seek_relative(secs)).await {
      return Some(Metadata::from_error(e));
    }
    self.metadata().await
  }

  async fn close(&mut self) -> Result<(), PlayerError> {
    self.playing = false;
    let Some(mut session) = self.session.take() else {
      return Ok(());
    };

    if let Err(e) = session.ipc.request(MpvCommand::quit()).await {
      log::warn!("MPV quit failed: {}", e);
    }
    let closed = match session.ipc.close().await {
      Err(IpcError::Io(e)) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
      other => other.map_err(PlayerError::from),
    };
    // Kill regardless of how quit went.
    let killed = session.process.kill().await.map_err(PlayerError::from);
    cleanup_ipc(&self.socket_path);
    log::info!("MPV client stopped");

    closed.and(killed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::player::Backend;

  #[test]
  fn test_client_can_cross_threads() {
    fn boxed_player<T: Player + Send + Sync + 'static>() {}
    boxed_player::<MpvClient>();
  }

  fn config() -> PlayerConfig {
    PlayerConfig {
      backend: Backend::Mpv,
      ..Default::default()
    }
  }

  #[tokio::test]
  async fn test_idle_client_reports_nothing() {
    let mut client = MpvClient::new(&config(), CancellationToken::new());
    assert!(client.metadata().await.is_none());
    assert!(client.seek(10).await.is_none());
    client.pause(true).await.unwrap();
    client.stop().await.unwrap();
    client.close().await.unwrap();
    client.close().await.unwrap();
  }

  #[tokio::test]
  async fn test_volume_is_queued_without_session() {
    let mut client = MpvClient::new(&config(), CancellationToken::new());
    assert_eq!(client.set_volume(120).await.unwrap(), 100);
    assert_eq!(client.set_volume(-3).await.unwrap(), 0);
    assert_eq!(client.volume, 0);
  }

  #[tokio::test]
  async fn test_missing_executable_fails_play() {
    // Only meaningful where mpv is not installed.
    if which::which("mpv").is_ok() {
      return;
    }
    let mut client = MpvClient::new(&config(), CancellationToken::new());
    let err = client.play("http://example.com/stream").await.unwrap_err();
    assert!(matches!(err, PlayerError::Process(_)));
    assert!(client.metadata().await.is_none());
    client.close().await.unwrap();
  }
}
