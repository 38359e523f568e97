//! MPlayer backend in slave mode.
//!
//! Commands go to stdin with no reply; a background task scrapes stdout for
//! title changes so `metadata` never waits on the process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::task::JoinHandle;

use crate::config::PlayerConfig;
use crate::player::{clamp_volume, Metadata, PlaybackTimeTracker, Player, PlayerError};
use crate::process::{LaunchSpec, ManagedProcess};
use crate::stream::parse_stream_title;

/// How long `close` waits for `quit` before killing.
const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Something recognized on an MPlayer stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum SlaveLine {
  Title(String),
  TimePosition(f64),
}

impl SlaveLine {
  pub fn parse(line: &str) -> Option<Self> {
    if let Some(pos) = line.strip_prefix("ANS_TIME_POSITION=") {
      return pos.trim().parse().ok().map(SlaveLine::TimePosition);
    }
    if line.contains("StreamTitle=") {
      return parse_stream_title(line).map(SlaveLine::Title);
    }
    None
  }
}

pub fn launch_spec(executable: Option<PathBuf>, volume: u8) -> LaunchSpec {
  LaunchSpec::new("mplayer")
    .executable(executable)
    .args(["-idle", "-slave", "-quiet", "-softvol", "-volume"])
    .arg(volume.to_string())
    .pipe_stdin()
    .pipe_stdout()
}

/// Scrape stdout into `title` until the process closes it.
fn scrape<R>(stdout: R, title: Arc<Mutex<String>>) -> JoinHandle<()>
where
  R: AsyncRead + Unpin + Send + 'static,
{
  tokio::spawn(async move {
    let mut lines = BufReader::new(stdout).lines();
    loop {
      match lines.next_line().await {
        Ok(Some(line)) => match SlaveLine::parse(&line) {
          Some(SlaveLine::Title(t)) => {
            log::info!("MPlayer now playing: {}", t);
            *title.lock() = t;
          }
          Some(SlaveLine::TimePosition(secs)) => log::debug!("MPlayer position: {}", secs),
          None => log::debug!("mplayer: {}", line),
        },
        Ok(None) => break,
        Err(e) => {
          log::debug!("MPlayer stdout closed: {}", e);
          break;
        }
      }
    }
  })
}

struct Session {
  process: ManagedProcess,
  stdin: ChildStdin,
  scraper: JoinHandle<()>,
}

/// MPlayer client implementing the player contract.
pub struct MplayerClient {
  executable: Option<PathBuf>,
  write_timeout: Duration,
  session: Option<Session>,
  title: Arc<Mutex<String>>,
  tracker: PlaybackTimeTracker,
  volume: u8,
  playing: bool,
  paused: bool,
}

impl MplayerClient {
  pub fn new(config: &PlayerConfig) -> Self {
    Self {
      executable: config.executable("mplayer"),
      write_timeout: config.ipc_timeout(),
      session: None,
      title: Arc::new(Mutex::new(String::new())),
      tracker: PlaybackTimeTracker::new(),
      volume: config.initial_volume,
      playing: false,
      paused: false,
    }
  }

  async fn ensure_session(&mut self) -> Result<&mut Session, PlayerError> {
    let alive = match self.session.as_mut() {
      Some(session) => !session.process.has_exited(),
      None => false,
    };

    if !alive {
      if let Some(dead) = self.session.take() {
        log::warn!("MPlayer process exited, restarting");
        Self::shutdown(dead, false).await?;
      }

      let spec = launch_spec(self.executable.clone(), self.volume);
      let mut process = ManagedProcess::spawn(&spec)?;
      let (Some(stdin), Some(stdout)) = (process.take_stdin(), process.take_stdout()) else {
        process.kill().await?;
        return Err(PlayerError::Playback("mplayer pipes unavailable".to_string()));
      };
      let scraper = scrape(stdout, self.title.clone());
      self.session = Some(Session {
        process,
        stdin,
        scraper,
      });
    }

    self.session.as_mut().ok_or(PlayerError::NotPlaying)
  }

  async fn send(&mut self, cmd: &str) -> Result<(), PlayerError> {
    let timeout = self.write_timeout;
    let session = self.session.as_mut().ok_or(PlayerError::NotPlaying)?;
    write_command(&mut session.stdin, cmd, timeout).await
  }

  /// Ask politely, wait, then kill. Pipes are dropped either way.
  async fn shutdown(mut session: Session, quit: bool) -> Result<(), PlayerError> {
    if quit {
      if let Err(e) = session.stdin.write_all(b"quit\n").await {
        log::warn!("MPlayer quit failed: {}", e);
      }
    }
    drop(session.stdin);

    let result = match session.process.wait_timeout(QUIT_TIMEOUT).await {
      Some(status) => {
        log::info!("MPlayer exited with: {}", status);
        Ok(())
      }
      None => session.process.kill().await.map_err(PlayerError::from),
    };
    session.scraper.abort();
    result
  }
}

async fn write_command(stdin: &mut ChildStdin, cmd: &str, timeout: Duration) -> Result<(), PlayerError> {
  log::debug!("mplayer < {}", cmd);
  let line = format!("{}\n", cmd);
  tokio::time::timeout(timeout, async {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
  })
  .await
  .map_err(|_| PlayerError::Timeout("mplayer command"))??;
  Ok(())
}

/// Quote a URL for `loadfile`.
fn quote(url: &str) -> String {
  format!("\"{}\"", url.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait]
impl Player for MplayerClient {
  async fn play(&mut self, url: &str) -> Result<(), PlayerError> {
    self.playing = false;
    self.title.lock().clear();
    let timeout = self.write_timeout;
    let session = self.ensure_session().await?;
    // loadfile replaces the current stream and unpauses.
    write_command(&mut session.stdin, &format!("loadfile {}", quote(url)), timeout).await?;

    self.playing = true;
    self.paused = false;
    self.tracker.reset();
    log::info!("MPlayer playing {}", url);
    Ok(())
  }

  async fn pause(&mut self, paused: bool) -> Result<(), PlayerError> {
    if !self.playing || self.paused == paused {
      return Ok(());
    }
    // The only pause command toggles.
    self.send("pause").await?;
    if paused {
      self.tracker.pause();
    } else {
      self.tracker.resume();
    }
    self.paused = paused;
    Ok(())
  }

  async fn stop(&mut self) -> Result<(), PlayerError> {
    if !self.playing {
      return Ok(());
    }
    self.playing = false;
    self.paused = false;
    self.tracker.pause();
    self.send("stop").await
  }

  async fn set_volume(&mut self, volume: i32) -> Result<i32, PlayerError> {
    let volume = clamp_volume(volume);
    if self.session.is_some() {
      self.send(&format!("pausing_keep volume {} 1", volume)).await?;
    }
    self.volume = volume;
    Ok(volume as i32)
  }

  async fn metadata(&mut self) -> Option<Metadata> {
    if !self.playing {
      return None;
    }
    let exited = self
      .session
      .as_mut()
      .map_or(true, |session| session.process.has_exited());

    Some(Metadata {
      title: self.title.lock().clone(),
      playback_time_sec: Some(self.tracker.play_time_secs()),
      err: exited.then_some(PlayerError::ProcessExited),
    })
  }

  async fn seek(&mut self, secs: i32) -> Option<Metadata> {
    if !self.playing {
      return None;
    }
    if let Err(e) = self.send(&format!("pausing_keep seek {} 0", secs)).await {
      return Some(Metadata::from_error(e));
    }
    self.metadata().await
  }

  async fn close(&mut self) -> Result<(), PlayerError> {
    self.playing = false;
    let Some(session) = self.session.take() else {
      return Ok(());
    };
    let result = Self::shutdown(session, true).await;
    log::info!("MPlayer client stopped");
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_slave_lines() {
    assert_eq!(
      SlaveLine::parse("ICY Info: StreamTitle='Band - Tune';StreamUrl='';"),
      Some(SlaveLine::Title("Band - Tune".to_string()))
    );
    assert_eq!(
      SlaveLine::parse("ANS_TIME_POSITION=42.7"),
      Some(SlaveLine::TimePosition(42.7))
    );
    assert_eq!(SlaveLine::parse("Starting playback..."), None);
    assert_eq!(SlaveLine::parse("ANS_TIME_POSITION=abc"), None);
  }

  #[test]
  fn test_launch_args() {
    let spec = launch_spec(None, 55);
    assert_eq!(spec.program, "mplayer");
    assert_eq!(spec.args, vec!["-idle", "-slave", "-quiet", "-softvol", "-volume", "55"]);
    assert!(spec.stdin && spec.stdout);
  }

  #[test]
  fn test_quote() {
    assert_eq!(quote("http://x/a b"), "\"http://x/a b\"");
  }

  #[tokio::test]
  async fn test_idle_client() {
    let mut client = MplayerClient::new(&PlayerConfig::default());
    assert!(client.metadata().await.is_none());
    assert!(client.seek(5).await.is_none());
    client.pause(true).await.unwrap();
    client.stop().await.unwrap();
    assert_eq!(client.set_volume(-1).await.unwrap(), 0);
    client.close().await.unwrap();
  }

  #[tokio::test]
  async fn test_missing_executable_fails_play() {
    let mut config = PlayerConfig::default();
    config.executables.mplayer = Some("/nonexistent/mplayer".to_string());
    if which::which("mplayer").is_ok() {
      return;
    }
    let mut client = MplayerClient::new(&config);
    let err = client.play("http://x").await.unwrap_err();
    assert!(matches!(err, PlayerError::Process(_)));
    assert!(client.metadata().await.is_none());
  }

  /// Client driving `cat`, which echoes every slave command back on stdout.
  #[cfg(unix)]
  fn echoing_client() -> (MplayerClient, tokio::process::ChildStdout) {
    let mut process = ManagedProcess::spawn(&LaunchSpec::new("cat").pipe_stdin().pipe_stdout()).unwrap();
    let stdin = process.take_stdin().unwrap();
    let stdout = process.take_stdout().unwrap();

    let mut client = MplayerClient::new(&PlayerConfig::default());
    client.session = Some(Session {
      process,
      stdin,
      scraper: tokio::spawn(async {}),
    });
    client.playing = true;
    client.tracker.reset();
    (client, stdout)
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_pause_toggles_only_on_change() {
    let (mut client, stdout) = echoing_client();

    client.pause(true).await.unwrap();
    client.pause(true).await.unwrap();
    assert!(!client.tracker.is_running());
    let frozen = client.tracker.play_time_secs();

    client.pause(false).await.unwrap();
    assert!(client.tracker.is_running());
    assert!(client.tracker.play_time_secs() >= frozen);
    client.pause(false).await.unwrap();

    client.close().await.unwrap();
    let mut lines = BufReader::new(stdout).lines();
    let mut written = Vec::new();
    while let Some(line) = lines.next_line().await.unwrap() {
      written.push(line);
    }
    assert_eq!(written, vec!["pause", "pause", "quit"]);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_scraper_keeps_latest_title() {
    let mut process = ManagedProcess::spawn(
      &LaunchSpec::new("sh")
        .arg("-c")
        .arg("echo \"ICY Info: StreamTitle='One';\"; echo \"ICY Info: StreamTitle='Two';\"")
        .pipe_stdout(),
    )
    .unwrap();
    let title = Arc::new(Mutex::new(String::new()));
    scrape(process.take_stdout().unwrap(), title.clone())
      .await
      .unwrap();
    assert_eq!(*title.lock(), "Two");
    process.kill().await.unwrap();
  }
}
