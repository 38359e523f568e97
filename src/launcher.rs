//! Launch-per-track backends with no control channel (ffplay, fire-and-forget mpv).
//!
//! The player is started with the URL and volume on its command line, its
//! output is captured, and now-playing and fatal errors are scraped from it.
//! `pause(true)` kills the process and `pause(false)` starts it again on the
//! same URL, so a resumed live stream rejoins at the live edge rather than
//! where it was paused.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

use crate::config::PlayerConfig;
use crate::player::{clamp_volume, Metadata, PlaybackTimeTracker, Player, PlayerError};
use crate::process::{KillPolicy, LaunchSpec, ManagedProcess};

/// How to launch one kind of player and read its output.
pub struct LaunchProfile {
  pub program: &'static str,
  /// Text preceding the current title on an output line.
  pub title_marker: &'static str,
  /// Output substrings that mean playback cannot continue.
  pub fatal_patterns: &'static [&'static str],
  pub kill_policy: KillPolicy,
  pub build_args: fn(u8, &str) -> Vec<String>,
}

fn ffplay_args(volume: u8, url: &str) -> Vec<String> {
  vec![
    "-nodisp".to_string(),
    "-loglevel".to_string(),
    "verbose".to_string(),
    "-autoexit".to_string(),
    "-volume".to_string(),
    volume.to_string(),
    url.to_string(),
  ]
}

fn mpv_spawn_args(volume: u8, url: &str) -> Vec<String> {
  vec![
    "--no-video".to_string(),
    format!("--volume={}", volume),
    url.to_string(),
  ]
}

pub static FFPLAY: LaunchProfile = LaunchProfile {
  program: "ffplay",
  title_marker: "StreamTitle",
  fatal_patterns: &[
    "No such file or directory",
    "Failed to resolve hostname",
    "Invalid data found when processing input",
  ],
  kill_policy: KillPolicy::Direct,
  build_args: ffplay_args,
};

/// mpv spawns helper processes, so the whole group is killed.
pub static MPV_SPAWN: LaunchProfile = LaunchProfile {
  program: "mpv",
  title_marker: "icy-title:",
  fatal_patterns: &[
    "Failed to open",
    "Failed to recognize file format",
    "No such file or directory",
  ],
  kill_policy: KillPolicy::Group,
  build_args: mpv_spawn_args,
};

impl LaunchProfile {
  pub fn launch_spec(&self, executable: Option<PathBuf>, volume: u8, url: &str) -> LaunchSpec {
    LaunchSpec::new(self.program)
      .executable(executable)
      .args((self.build_args)(volume, url))
      .pipe_stdout()
      .pipe_stderr()
      .kill_policy(self.kill_policy)
  }
}

/// What the captured output says so far.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Scan {
  /// Line containing the first fatal pattern seen.
  pub fatal: Option<String>,
  /// Last non-empty title.
  pub title: Option<String>,
}

/// Scan captured output. Progress lines end in `\r`, so both separators split.
pub fn scan_output(profile: &LaunchProfile, output: &str) -> Scan {
  let mut scan = Scan::default();

  for line in output.split(['\n', '\r']) {
    if scan.fatal.is_none() && profile.fatal_patterns.iter().any(|p| line.contains(p)) {
      scan.fatal = Some(line.trim().to_string());
    }
    if let Some(pos) = line.find(profile.title_marker) {
      let title = line[pos + profile.title_marker.len()..]
        .trim_start_matches([' ', ':'])
        .trim();
      if !title.is_empty() {
        scan.title = Some(title.to_string());
      }
    }
  }
  scan
}

/// Append every line of `reader` to the shared buffer until EOF.
fn capture<R>(reader: R, output: Arc<Mutex<String>>) -> JoinHandle<()>
where
  R: AsyncRead + Unpin + Send + 'static,
{
  tokio::spawn(async move {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
      line.clear();
      match reader.read_until(b'\n', &mut line).await {
        Ok(0) => break,
        Ok(_) => {
          let text = String::from_utf8_lossy(&line);
          log::debug!("player output: {}", text.trim_end());
          output.lock().push_str(&text);
        }
        Err(e) => {
          log::debug!("Output capture ended: {}", e);
          break;
        }
      }
    }
  })
}

struct Running {
  process: ManagedProcess,
  capture: Vec<JoinHandle<()>>,
}

/// Player driven only by process launch and kill.
pub struct LaunchedPlayer {
  profile: &'static LaunchProfile,
  executable: Option<PathBuf>,
  running: Option<Running>,
  output: Arc<Mutex<String>>,
  url: Option<String>,
  volume: u8,
  paused: bool,
  tracker: PlaybackTimeTracker,
}

impl LaunchedPlayer {
  pub fn new(profile: &'static LaunchProfile, config: &PlayerConfig) -> Self {
    Self {
      profile,
      executable: config.executable(profile.program),
      running: None,
      output: Arc::new(Mutex::new(String::new())),
      url: None,
      volume: config.initial_volume,
      paused: false,
      tracker: PlaybackTimeTracker::new(),
    }
  }

  /// Launch on `url` with a fresh output buffer.
  fn start(&mut self, url: &str) -> Result<(), PlayerError> {
    let spec = self
      .profile
      .launch_spec(self.executable.clone(), self.volume, url);
    let mut process = ManagedProcess::spawn(&spec)?;

    self.output = Arc::new(Mutex::new(String::new()));
    let mut tasks = Vec::new();
    if let Some(stdout) = process.take_stdout() {
      tasks.push(capture(stdout, self.output.clone()));
    }
    if let Some(stderr) = process.take_stderr() {
      tasks.push(capture(stderr, self.output.clone()));
    }

    self.running = Some(Running {
      process,
      capture: tasks,
    });
    Ok(())
  }

  /// Kill the current process, keeping the captured output for `metadata`.
  async fn kill(&mut self) -> Result<(), PlayerError> {
    let Some(mut running) = self.running.take() else {
      return Ok(());
    };
    let killed = running.process.kill().await;
    for task in running.capture {
      task.abort();
    }
    Ok(killed?)
  }
}

#[async_trait]
impl Player for LaunchedPlayer {
  async fn play(&mut self, url: &str) -> Result<(), PlayerError> {
    self.kill().await?;
    self.url = None;
    self.start(url)?;
    self.url = Some(url.to_string());
    self.paused = false;
    self.tracker.reset();
    log::info!("{} playing {}", self.profile.program, url);
    Ok(())
  }

  async fn pause(&mut self, paused: bool) -> Result<(), PlayerError> {
    let Some(url) = self.url.clone() else {
      return Ok(());
    };
    if self.paused == paused {
      return Ok(());
    }

    if paused {
      self.kill().await?;
      self.tracker.pause();
    } else {
      self.start(&url)?;
      self.tracker.resume();
    }
    self.paused = paused;
    Ok(())
  }

  async fn stop(&mut self) -> Result<(), PlayerError> {
    self.url = None;
    self.paused = false;
    self.tracker.pause();
    self.kill().await
  }

  async fn set_volume(&mut self, volume: i32) -> Result<i32, PlayerError> {
    // Takes effect on the next launch.
    self.volume = clamp_volume(volume);
    Ok(self.volume as i32)
  }

  async fn metadata(&mut self) -> Option<Metadata> {
    self.url.as_ref()?;
    let scan = scan_output(self.profile, &self.output.lock());
    let playback_time_sec = Some(self.tracker.play_time_secs());

    if let Some(fatal) = scan.fatal {
      return Some(Metadata {
        title: String::new(),
        playback_time_sec,
        err: Some(PlayerError::Playback(fatal)),
      });
    }

    let exited = match self.running.as_mut() {
      Some(running) => running.process.has_exited(),
      None => !self.paused,
    };
    Some(Metadata {
      title: scan.title.unwrap_or_default(),
      playback_time_sec,
      err: exited.then_some(PlayerError::ProcessExited),
    })
  }

  async fn seek(&mut self, _secs: i32) -> Option<Metadata> {
    self.metadata().await
  }

  async fn close(&mut self) -> Result<(), PlayerError> {
    self.url = None;
    self.kill().await
  }
}
