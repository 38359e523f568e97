//! MPD backend over the MPD text protocol.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::config::MpdConfig;
use crate::player::{clamp_volume, Metadata, Player, PlayerError};
use crate::textproto::{field, Framing, LineChannel};

/// Quote an MPD command argument.
fn quote(arg: &str) -> String {
  let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
  format!("\"{}\"", escaped)
}

fn parse_elapsed(lines: &[String]) -> Option<f64> {
  field(lines, "elapsed").and_then(|v| v.parse::<f64>().ok())
}

/// MPD client holding one TCP connection for its lifetime.
pub struct MpdClient<S = TcpStream> {
  channel: Option<LineChannel<S>>,
  framing: Framing,
}

impl MpdClient {
  /// Connect and check the server greeting.
  pub async fn connect(config: &MpdConfig, timeout: Duration) -> Result<Self, PlayerError> {
    let addr = format!("{}:{}", config.host, config.port);
    log::info!("Connecting to MPD at {}", addr);

    let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
      .await
      .map_err(|_| PlayerError::Timeout("MPD connection"))??;
    MpdClient::handshake(stream, config.framing, timeout).await
  }
}

impl<S> MpdClient<S>
where
  S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
  /// Wrap an established stream, consuming the `OK MPD <version>` greeting.
  pub async fn handshake(stream: S, framing: Framing, timeout: Duration) -> Result<Self, PlayerError> {
    let mut channel = LineChannel::new(stream, timeout);
    let greeting = channel.read_line().await?;
    if !greeting.starts_with("OK MPD ") {
      return Err(PlayerError::Protocol {
        backend: "mpd",
        message: format!("unexpected greeting: {:?}", greeting),
      });
    }
    log::info!("MPD greeting: {}", greeting);

    Ok(Self {
      channel: Some(channel),
      framing,
    })
  }

  /// Run one command, separating transport failures from `ACK` replies.
  async fn command(&mut self, cmd: &str) -> Result<Vec<String>, PlayerError> {
    let channel = self.channel.as_mut().ok_or(PlayerError::NotPlaying)?;
    let lines = channel.round_trip(cmd, self.framing).await?;
    if let Some(ack) = lines.iter().find(|line| line.starts_with("ACK")) {
      return Err(PlayerError::Protocol {
        backend: "mpd",
        message: ack.clone(),
      });
    }
    Ok(lines)
  }

  async fn snapshot(&mut self) -> Result<Option<Metadata>, PlayerError> {
    let status = self.command("status").await?;
    if field(&status, "state").map_or(true, |state| state == "stop") {
      return Ok(None);
    }

    let song = self.command("currentsong").await?;
    let title = field(&song, "Title")
      .or_else(|| field(&song, "Name"))
      .unwrap_or_default()
      .to_string();

    Ok(Some(Metadata {
      title,
      playback_time_sec: parse_elapsed(&status).map(|secs| secs.max(0.0).floor() as i64),
      err: None,
    }))
  }
}

#[async_trait]
impl<S> Player for MpdClient<S>
where
  S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
  async fn play(&mut self, url: &str) -> Result<(), PlayerError> {
    self.command("clear").await?;
    self.command(&format!("add {}", quote(url))).await?;
    self.command("play").await?;
    log::info!("MPD playing {}", url);
    Ok(())
  }

  async fn pause(&mut self, paused: bool) -> Result<(), PlayerError> {
    self.command(if paused { "pause 1" } else { "pause 0" }).await?;
    Ok(())
  }

  async fn stop(&mut self) -> Result<(), PlayerError> {
    self.command("stop").await?;
    Ok(())
  }

  async fn set_volume(&mut self, volume: i32) -> Result<i32, PlayerError> {
    let volume = clamp_volume(volume);
    self.command(&format!("setvol {}", volume)).await?;

    // The server decides what was applied.
    let lines = self.command("getvol").await?;
    field(&lines, "volume")
      .and_then(|v| v.parse::<i32>().ok())
      .ok_or_else(|| PlayerError::Protocol {
        backend: "mpd",
        message: "getvol returned no volume".to_string(),
      })
  }

  async fn metadata(&mut self) -> Option<Metadata> {
    self.channel.as_ref()?;
    match self.snapshot().await {
      Ok(meta) => meta,
      Err(e) => Some(Metadata::from_error(e)),
    }
  }

  async fn seek(&mut self, secs: i32) -> Option<Metadata> {
    self.channel.as_ref()?;
    let status = match self.command("status").await {
      Ok(status) => status,
      Err(e) => return Some(Metadata::from_error(e)),
    };
    let Some(elapsed) = parse_elapsed(&status) else {
      return self.metadata().await;
    };

    let target = (elapsed + f64::from(secs)).max(0.0);
    if let Err(e) = self.command(&format!("seekcur {:.3}", target)).await {
      return Some(Metadata::from_error(e));
    }
    self.metadata().await
  }

  async fn close(&mut self) -> Result<(), PlayerError> {
    if self.channel.is_none() {
      return Ok(());
    }
    let cleared = self.command("clear").await.map(|_| ());
    let Some(mut channel) = self.channel.take() else {
      return cleared;
    };
    let closed = match channel.shutdown().await {
      Err(e) if matches!(e.kind(), io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe) => Ok(()),
      other => other.map_err(PlayerError::from),
    };
    log::info!("MPD connection closed");
    cleared.and(closed)
  }
}
