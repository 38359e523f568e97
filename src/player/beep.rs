use std::io::Write;

use async_trait::async_trait;

use super::{clamp_volume, Metadata, Player, PlayerError};

/// Stand-in used when no real backend is available: rings the terminal bell.
pub struct BeepPlayer;

#[async_trait]
impl Player for BeepPlayer {
  async fn play(&mut self, url: &str) -> Result<(), PlayerError> {
    log::warn!("No playback backend available, cannot play {}", url);
    let mut stderr = std::io::stderr();
    stderr.write_all(b"\x07")?;
    stderr.flush()?;
    Ok(())
  }

  async fn pause(&mut self, _paused: bool) -> Result<(), PlayerError> {
    Ok(())
  }

  async fn stop(&mut self) -> Result<(), PlayerError> {
    Ok(())
  }

  async fn set_volume(&mut self, volume: i32) -> Result<i32, PlayerError> {
    Ok(clamp_volume(volume) as i32)
  }

  async fn metadata(&mut self) -> Option<Metadata> {
    None
  }

  async fn seek(&mut self, _secs: i32) -> Option<Metadata> {
    None
  }

  async fn close(&mut self) -> Result<(), PlayerError> {
    Ok(())
  }
}
