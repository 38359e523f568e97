//! MPV launch arguments and IPC endpoint naming.

use std::path::{Path, PathBuf};

use crate::process::LaunchSpec;

/// A fresh IPC socket/pipe path, unique per driver instance.
pub fn ipc_path() -> PathBuf {
  let name = format!("radioplay-mpv-{}", uuid::Uuid::new_v4().simple());

  #[cfg(windows)]
  {
    PathBuf::from(format!(r"\\.\pipe\{}", name))
  }
  #[cfg(not(windows))]
  {
    dirs::runtime_dir()
      .unwrap_or_else(std::env::temp_dir)
      .join(format!("{}.sock", name))
  }
}

/// Launch idle MPV with its IPC server enabled.
pub fn launch_spec(executable: Option<PathBuf>, ipc: &Path, volume: u8) -> LaunchSpec {
  LaunchSpec::new("mpv")
    .executable(executable)
    .arg("--idle")
    .arg("--terminal=no")
    .arg("--no-video")
    .arg(format!("--volume={}", volume))
    .arg(format!("--input-ipc-server={}", ipc.display()))
}

/// Remove a stale socket file.
pub fn cleanup_ipc(path: &Path) {
  #[cfg(not(windows))]
  {
    if let Err(e) = std::fs::remove_file(path) {
      if e.kind() != std::io::ErrorKind::NotFound {
        log::warn!("Failed to remove MPV socket {:?}: {}", path, e);
      }
    }
  }
  // Windows named pipes are cleaned up automatically
  #[cfg(windows)]
  let _ = path;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ipc_paths_are_unique() {
    assert_ne!(ipc_path(), ipc_path());
  }

  #[test]
  fn test_launch_args() {
    let ipc = PathBuf::from("/tmp/radioplay-mpv-test.sock");
    let spec = launch_spec(None, &ipc, 65);
    assert_eq!(spec.program, "mpv");
    assert!(spec.args.contains(&"--idle".to_string()));
    assert!(spec.args.contains(&"--no-video".to_string()));
    assert!(spec.args.contains(&"--terminal=no".to_string()));
    assert!(spec.args.contains(&"--volume=65".to_string()));
    assert!(spec
      .args
      .contains(&"--input-ipc-server=/tmp/radioplay-mpv-test.sock".to_string()));
    assert!(!spec.stdin && !spec.stdout && !spec.stderr);
  }
}
