//! External player process detection, spawning and termination.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How long to wait for a killed process to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("{0} executable not found")]
  NotFound(String),
  #[error("Failed to spawn process: {0}")]
  SpawnFailed(#[from] std::io::Error),
  #[error("Failed to kill process: {0}")]
  KillFailed(std::io::Error),
}

#[derive(Error, Debug)]
pub enum WaitError {
  #[error("Timed out waiting for {0}")]
  TimedOut(&'static str),
  #[error("Cancelled")]
  Cancelled,
}

/// How a process is terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KillPolicy {
  /// Kill the process itself (POSIX) or its tree via `taskkill /T` (Windows).
  #[default]
  Direct,
  /// Start the process in its own group and kill the whole group (POSIX).
  Group,
}

/// Find an executable, preferring an explicit override path.
pub fn resolve_executable(program: &str, override_path: Option<&Path>) -> Result<PathBuf, ProcessError> {
  if let Some(path) = override_path {
    if path.exists() {
      return Ok(path.to_path_buf());
    }
    log::warn!("Configured {} path {:?} does not exist, searching PATH", program, path);
  }
  which::which(program).map_err(|_| ProcessError::NotFound(program.to_string()))
}

/// Everything needed to launch one external player.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
  pub program: String,
  pub executable: Option<PathBuf>,
  pub args: Vec<String>,
  pub stdin: bool,
  pub stdout: bool,
  pub stderr: bool,
  pub kill_policy: KillPolicy,
}

impl LaunchSpec {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      executable: None,
      args: Vec::new(),
      stdin: false,
      stdout: false,
      stderr: false,
      kill_policy: KillPolicy::Direct,
    }
  }

  pub fn executable(mut self, path: Option<PathBuf>) -> Self {
    self.executable = path;
    self
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn pipe_stdin(mut self) -> Self {
    self.stdin = true;
    self
  }

  pub fn pipe_stdout(mut self) -> Self {
    self.stdout = true;
    self
  }

  pub fn pipe_stderr(mut self) -> Self {
    self.stderr = true;
    self
  }

  pub fn kill_policy(mut self, policy: KillPolicy) -> Self {
    self.kill_policy = policy;
    self
  }
}

fn stdio(piped: bool) -> Stdio {
  if piped {
    Stdio::piped()
  } else {
    Stdio::null()
  }
}

/// A spawned player process, killed on [`ManagedProcess::kill`] or on drop.
#[derive(Debug)]
pub struct ManagedProcess {
  child: Child,
  pid: Option<u32>,
  program: String,
  kill_policy: KillPolicy,
  #[cfg(unix)]
  group_killed: bool,
}

impl ManagedProcess {
  pub fn spawn(spec: &LaunchSpec) -> Result<Self, ProcessError> {
    let exe = resolve_executable(&spec.program, spec.executable.as_deref())?;

    log::info!("Spawning {}: {:?} {:?}", spec.program, exe, spec.args);

    let mut cmd = Command::new(&exe);
    cmd
      .args(&spec.args)
      .stdin(stdio(spec.stdin))
      .stdout(stdio(spec.stdout))
      .stderr(stdio(spec.stderr))
      .kill_on_drop(true);

    #[cfg(unix)]
    if spec.kill_policy == KillPolicy::Group {
      cmd.process_group(0);
    }

    let child = cmd.spawn()?;
    let pid = child.id();
    log::info!("{} started (pid: {:?})", spec.program, pid);

    Ok(Self {
      child,
      pid,
      program: spec.program.clone(),
      kill_policy: spec.kill_policy,
      #[cfg(unix)]
      group_killed: false,
    })
  }

  pub fn pid(&self) -> Option<u32> {
    self.pid
  }

  pub fn take_stdin(&mut self) -> Option<ChildStdin> {
    self.child.stdin.take()
  }

  pub fn take_stdout(&mut self) -> Option<ChildStdout> {
    self.child.stdout.take()
  }

  pub fn take_stderr(&mut self) -> Option<ChildStderr> {
    self.child.stderr.take()
  }

  /// True once the process has exited (or can no longer be queried).
  pub fn has_exited(&mut self) -> bool {
    !matches!(self.child.try_wait(), Ok(None))
  }

  /// Wait for a voluntary exit, giving up after `timeout`.
  pub async fn wait_timeout(&mut self, timeout: Duration) -> Option<ExitStatus> {
    match tokio::time::timeout(timeout, self.child.wait()).await {
      Ok(Ok(status)) => Some(status),
      Ok(Err(e)) => {
        log::warn!("wait() on {} failed: {}", self.program, e);
        None
      }
      Err(_) => None,
    }
  }

  /// Force-terminate and reap. Already-exited processes are left alone, but a
  /// group is always signalled since helpers may outlive the leader.
  pub async fn kill(&mut self) -> Result<(), ProcessError> {
    #[cfg(unix)]
    if self.kill_policy == KillPolicy::Group {
      self.kill_group()?;
    }

    if let Ok(Some(status)) = self.child.try_wait() {
      log::debug!("{} (pid: {:?}) already exited with {}", self.program, self.pid, status);
      return Ok(());
    }

    log::info!("Killing {} (pid: {:?})", self.program, self.pid);
    self.send_kill().await?;

    match self.wait_timeout(REAP_TIMEOUT).await {
      Some(status) => log::info!("{} exited with: {}", self.program, status),
      None => log::warn!("{} (pid: {:?}) not reaped after kill", self.program, self.pid),
    }
    Ok(())
  }

  /// SIGKILL the whole group once. An empty group counts as killed.
  #[cfg(unix)]
  fn kill_group(&mut self) -> Result<(), ProcessError> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = self.pid else {
      return Ok(());
    };
    if self.group_killed {
      return Ok(());
    }

    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
      Ok(()) | Err(Errno::ESRCH) => {
        log::debug!("Killed process group of {} (pgid: {})", self.program, pid);
        self.group_killed = true;
        Ok(())
      }
      Err(errno) => Err(ProcessError::KillFailed(errno.into())),
    }
  }

  #[cfg(unix)]
  async fn send_kill(&mut self) -> Result<(), ProcessError> {
    self.child.start_kill().map_err(ProcessError::KillFailed)
  }

  #[cfg(windows)]
  async fn send_kill(&mut self) -> Result<(), ProcessError> {
    let Some(pid) = self.pid else {
      return self.child.start_kill().map_err(ProcessError::KillFailed);
    };

    let status = Command::new("taskkill")
      .args(["/F", "/T", "/PID", &pid.to_string()])
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .status()
      .await
      .map_err(ProcessError::KillFailed)?;

    if !status.success() {
      log::warn!("taskkill for pid {} exited with {}, falling back to kill()", pid, status);
      self.child.start_kill().map_err(ProcessError::KillFailed)?;
    }
    Ok(())
  }
}

impl Drop for ManagedProcess {
  fn drop(&mut self) {
    // kill_on_drop only reaches the leader.
    #[cfg(unix)]
    if self.kill_policy == KillPolicy::Group {
      if let Err(e) = self.kill_group() {
        log::warn!("Failed to kill process group of {}: {}", self.program, e);
      }
    }
  }
}

/// Retry `attempt` every `poll` until it succeeds, `timeout` elapses or `cancel` fires.
pub async fn poll_ready<T, E, F, Fut>(
  what: &'static str,
  poll: Duration,
  timeout: Duration,
  cancel: &CancellationToken,
  mut attempt: F,
) -> Result<T, WaitError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: std::fmt::Display,
{
  let deadline = Instant::now() + timeout;

  loop {
    if cancel.is_cancelled() {
      return Err(WaitError::Cancelled);
    }

    match attempt().await {
      Ok(value) => return Ok(value),
      Err(e) => log::debug!("{} not ready: {}", what, e),
    }

    if Instant::now() >= deadline {
      return Err(WaitError::TimedOut(what));
    }

    tokio::select! {
      _ = cancel.cancelled() => return Err(WaitError::Cancelled),
      _ = tokio::time::sleep(poll) => {}
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_missing_executable_is_not_found() {
    let err = resolve_executable("radioplay-no-such-player", None).unwrap_err();
    assert!(matches!(err, ProcessError::NotFound(ref name) if name == "radioplay-no-such-player"));
  }

  #[tokio::test]
  async fn test_spawn_missing_executable_fails_fast() {
    let spec = LaunchSpec::new("radioplay-no-such-player").arg("--idle");
    let err = ManagedProcess::spawn(&spec).unwrap_err();
    assert!(matches!(err, ProcessError::NotFound(_)));
  }

  #[tokio::test]
  async fn test_poll_ready_times_out() {
    let cancel = CancellationToken::new();
    let result: Result<(), WaitError> = poll_ready(
      "socket",
      Duration::from_millis(5),
      Duration::from_millis(40),
      &cancel,
      || async { Err::<(), _>("missing") },
    )
    .await;
    assert!(matches!(result, Err(WaitError::TimedOut("socket"))));
  }

  #[tokio::test]
  async fn test_poll_ready_aborts_on_cancel() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(20)).await;
      trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result: Result<(), WaitError> = poll_ready(
      "socket",
      Duration::from_millis(5),
      Duration::from_secs(10),
      &cancel,
      || async { Err::<(), _>("missing") },
    )
    .await;
    assert!(matches!(result, Err(WaitError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
  }

  #[tokio::test]
  async fn test_poll_ready_returns_first_success() {
    let cancel = CancellationToken::new();
    let mut attempts = 0;
    let value = poll_ready("socket", Duration::from_millis(1), Duration::from_secs(1), &cancel, || {
      attempts += 1;
      let n = attempts;
      async move {
        if n < 3 {
          Err("not yet")
        } else {
          Ok(n)
        }
      }
    })
    .await
    .unwrap();
    assert_eq!(value, 3);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_kill_direct_and_group() {
    for policy in [KillPolicy::Direct, KillPolicy::Group] {
      let spec = LaunchSpec::new("sleep").arg("30").kill_policy(policy);
      let mut process = ManagedProcess::spawn(&spec).unwrap();
      assert!(process.pid().is_some());
      assert!(!process.has_exited());
      process.kill().await.unwrap();
      assert!(process.has_exited());
      // Killing again is a no-op.
      process.kill().await.unwrap();
    }
  }

  /// Alive means present and not a zombie.
  #[cfg(target_os = "linux")]
  fn is_alive(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
      Ok(stat) => stat
        .rsplit_once(')')
        .map_or(false, |(_, rest)| !rest.trim_start().starts_with('Z')),
      Err(_) => false,
    }
  }

  #[cfg(target_os = "linux")]
  async fn background_child(policy: KillPolicy) -> (ManagedProcess, i32) {
    use tokio::io::AsyncBufReadExt;

    let spec = LaunchSpec::new("sh")
      .args(["-c", "sleep 30 & echo $!; exit 0"])
      .pipe_stdout()
      .kill_policy(policy);
    let mut process = ManagedProcess::spawn(&spec).unwrap();
    let stdout = process.take_stdout().unwrap();
    let mut lines = tokio::io::BufReader::new(stdout).lines();
    let helper: i32 = lines.next_line().await.unwrap().unwrap().trim().parse().unwrap();
    assert!(process.wait_timeout(Duration::from_secs(5)).await.is_some());
    (process, helper)
  }

  #[cfg(target_os = "linux")]
  async fn wait_dead(pid: i32) -> bool {
    for _ in 0..100 {
      if !is_alive(pid) {
        return true;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
  }

  #[cfg(target_os = "linux")]
  #[tokio::test]
  async fn test_group_kill_reaches_helpers_after_leader_exit() {
    let (mut process, helper) = background_child(KillPolicy::Group).await;
    assert!(process.has_exited());
    assert!(is_alive(helper));

    process.kill().await.unwrap();
    assert!(wait_dead(helper).await);
  }

  #[cfg(target_os = "linux")]
  #[tokio::test]
  async fn test_group_dropped_kills_helpers() {
    let (process, helper) = background_child(KillPolicy::Group).await;
    assert!(is_alive(helper));

    drop(process);
    assert!(wait_dead(helper).await);
  }
}
