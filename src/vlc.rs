//! VLC backend over the `rc` remote-control interface.
//!
//! rc replies carry no terminator, so each request is one line out and one
//! bounded read back ([`Framing::SingleRead`]). Only play, stop and close are
//! wired; pause, volume and seek report [`PlayerError::Unsupported`].

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::config::{PlayerConfig, VlcConfig};
use crate::player::{Metadata, PlaybackTimeTracker, Player, PlayerError};
use crate::process::{poll_ready, LaunchSpec, ManagedProcess};
use crate::textproto::{Framing, LineChannel};

const RC_FRAMING: Framing = Framing::SingleRead(4096);

pub fn launch_spec(executable: Option<PathBuf>, config: &VlcConfig) -> LaunchSpec {
  LaunchSpec::new("vlc")
    .executable(executable)
    .args(["--intf", "rc", "--rc-host"])
    .arg(format!("{}:{}", config.host, config.port))
    .arg("--no-video")
}

struct Session {
  process: Option<ManagedProcess>,
  channel: LineChannel<TcpStream>,
}

/// VLC client implementing the player contract.
pub struct VlcClient {
  config: VlcConfig,
  executable: Option<PathBuf>,
  timeout: Duration,
  socket_wait: Duration,
  socket_poll: Duration,
  cancel: CancellationToken,
  session: Option<Session>,
  tracker: PlaybackTimeTracker,
  playing: bool,
}

impl VlcClient {
  pub fn new(config: &PlayerConfig, cancel: CancellationToken) -> Self {
    Self {
      config: config.vlc.clone(),
      executable: config.executable("vlc"),
      timeout: config.ipc_timeout(),
      socket_wait: config.socket_wait(),
      socket_poll: config.socket_poll(),
      cancel,
      session: None,
      tracker: PlaybackTimeTracker::new(),
      playing: false,
    }
  }

  async fn ensure_session(&mut self) -> Result<&mut Session, PlayerError> {
    let alive = match self.session.as_mut() {
      Some(Session {
        process: Some(process),
        ..
      }) => !process.has_exited(),
      Some(_) => true,
      None => false,
    };

    if !alive {
      if let Some(dead) = self.session.take() {
        log::warn!("VLC process exited, restarting");
        Self::teardown(dead, false).await?;
      }
      self.session = Some(self.start().await?);
    }
    self.session.as_mut().ok_or(PlayerError::NotPlaying)
  }

  async fn start(&self) -> Result<Session, PlayerError> {
    let mut process = if self.config.spawn {
      let spec = launch_spec(self.executable.clone(), &self.config);
      Some(ManagedProcess::spawn(&spec)?)
    } else {
      None
    };

    let addr = format!("{}:{}", self.config.host, self.config.port);
    let connected = poll_ready(
      "VLC rc port",
      self.socket_poll,
      self.socket_wait,
      &self.cancel,
      || TcpStream::connect(addr.as_str()),
    )
    .await;

    let stream = match connected {
      Ok(stream) => stream,
      Err(e) => {
        if let Some(process) = process.as_mut() {
          if let Err(kill_err) = process.kill().await {
            log::warn!("Failed to kill VLC after connect failure: {}", kill_err);
          }
        }
        return Err(e.into());
      }
    };

    let mut channel = LineChannel::new(stream, self.timeout);
    // Drain the banner and prompt.
    let banner = channel.read_response(RC_FRAMING).await?;
    log::info!("VLC rc connected on {} ({} banner lines)", addr, banner.len());
    Ok(Session { process, channel })
  }

  async fn command(&mut self, cmd: &str) -> Result<Vec<String>, PlayerError> {
    let session = self.session.as_mut().ok_or(PlayerError::NotPlaying)?;
    Ok(session.channel.round_trip(cmd, RC_FRAMING).await?)
  }

  async fn teardown(mut session: Session, quit: bool) -> Result<(), PlayerError> {
    if quit {
      if let Err(e) = session.channel.send_line("quit").await {
        log::warn!("VLC quit failed: {}", e);
      }
    }
    let closed = match session.channel.shutdown().await {
      Err(e) if matches!(e.kind(), std::io::ErrorKind::NotConnected | std::io::ErrorKind::BrokenPipe) => {
        Ok(())
      }
      other => other.map_err(PlayerError::from),
    };
    let killed = match session.process.as_mut() {
      Some(process) => process.kill().await.map_err(PlayerError::from),
      None => Ok(()),
    };
    closed.and(killed)
  }

  fn snapshot(&self) -> Metadata {
    Metadata {
      title: String::new(),
      playback_time_sec: Some(self.tracker.play_time_secs()),
      err: None,
    }
  }
}

#[async_trait]
impl Player for VlcClient {
  async fn play(&mut self, url: &str) -> Result<(), PlayerError> {
    self.playing = false;
    self.ensure_session().await?;
    self.command(&format!("add {}", url)).await?;
    self.command("play").await?;
    self.playing = true;
    self.tracker.reset();
    log::info!("VLC playing {}", url);
    Ok(())
  }

  async fn pause(&mut self, _paused: bool) -> Result<(), PlayerError> {
    Err(PlayerError::Unsupported("pause"))
  }

  async fn stop(&mut self) -> Result<(), PlayerError> {
    if !self.playing {
      return Ok(());
    }
    self.playing = false;
    self.tracker.pause();
    self.command("stop").await?;
    Ok(())
  }

  async fn set_volume(&mut self, _volume: i32) -> Result<i32, PlayerError> {
    Err(PlayerError::Unsupported("volume"))
  }

  async fn metadata(&mut self) -> Option<Metadata> {
    self.playing.then(|| self.snapshot())
  }

  async fn seek(&mut self, _secs: i32) -> Option<Metadata> {
    if !self.playing {
      return None;
    }
    let mut meta = self.snapshot();
    meta.err = Some(PlayerError::Unsupported("seek"));
    Some(meta)
  }

  async fn close(&mut self) -> Result<(), PlayerError> {
    self.playing = false;
    let Some(session) = self.session.take() else {
      return Ok(());
    };
    let owned = session.process.is_some();
    let result = Self::teardown(session, owned).await;
    log::info!("VLC client stopped");
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  use parking_lot::Mutex;
  use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
  use tokio::net::TcpListener;

  /// Fake rc interface: greets, records each command and replies with a prompt.
  async fn stub_rc() -> (PlayerConfig, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let (read_half, mut write_half) = stream.into_split();
      write_half
        .write_all(b"VLC media player 3.0.20 Vetinari\nCommand Line Interface initialized. Type `help' for help.\n> ")
        .await
        .unwrap();
      let mut lines = BufReader::new(read_half).lines();
      while let Ok(Some(line)) = lines.next_line().await {
        log.lock().push(line);
        if write_half.write_all(b"> ").await.is_err() {
          break;
        }
      }
    });

    let mut config = PlayerConfig::default();
    config.vlc = VlcConfig {
      host: "127.0.0.1".to_string(),
      port,
      spawn: false,
    };
    (config, seen)
  }

  #[tokio::test]
  async fn test_play_adds_and_plays() {
    let (config, seen) = stub_rc().await;
    let mut client = VlcClient::new(&config, CancellationToken::new());

    client.play("http://x").await.unwrap();
    assert_eq!(*seen.lock(), vec!["add http://x", "play"]);

    let meta = client.metadata().await.unwrap();
    assert_eq!(meta.playback_time_sec, Some(0));
    assert!(meta.err.is_none());

    client.stop().await.unwrap();
    assert_eq!(seen.lock().last().map(String::as_str), Some("stop"));
    assert!(client.metadata().await.is_none());
    client.close().await.unwrap();
    client.close().await.unwrap();
  }

  #[tokio::test]
  async fn test_unwired_controls_are_unsupported() {
    let (config, _) = stub_rc().await;
    let mut client = VlcClient::new(&config, CancellationToken::new());
    client.play("http://x").await.unwrap();

    assert!(matches!(client.pause(true).await, Err(PlayerError::Unsupported("pause"))));
    assert!(matches!(client.set_volume(50).await, Err(PlayerError::Unsupported("volume"))));
    let meta = client.seek(10).await.unwrap();
    assert!(matches!(meta.err, Some(PlayerError::Unsupported("seek"))));
  }

  #[tokio::test]
  async fn test_unreachable_port_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = PlayerConfig::default();
    config.vlc.port = port;
    config.vlc.spawn = false;
    config.socket_wait_ms = 50;
    let mut client = VlcClient::new(&config, CancellationToken::new());

    let err = client.play("http://x").await.unwrap_err();
    assert!(matches!(err, PlayerError::Timeout(_)));
    assert!(client.metadata().await.is_none());
  }

  #[test]
  fn test_launch_args() {
    let spec = launch_spec(None, &VlcConfig::default());
    assert_eq!(spec.program, "vlc");
    assert_eq!(spec.args, vec!["--intf", "rc", "--rc-host", "127.0.0.1:4212", "--no-video"]);
  }
}
