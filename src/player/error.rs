//! Player contract errors.

use thiserror::Error;

use crate::mpv::IpcError;
use crate::process::{ProcessError, WaitError};

/// Errors surfaced by every backend through the [`Player`](super::Player) contract.
///
/// Transport failures (`Transport`, `Timeout`) mean the backend could not be
/// reached; `Protocol` means it was reached and rejected the command.
#[derive(Error, Debug)]
pub enum PlayerError {
  #[error("Process error: {0}")]
  Process(#[from] ProcessError),

  #[error("IPC error: {0}")]
  Ipc(IpcError),

  #[error("Transport error: {0}")]
  Transport(#[from] std::io::Error),

  #[error("Timed out waiting for {0}")]
  Timeout(&'static str),

  #[error("{backend} rejected command: {message}")]
  Protocol {
    backend: &'static str,
    message: String,
  },

  #[error("Playback failed: {0}")]
  Playback(String),

  #[error("No metadata available")]
  NoMetadata,

  #[error("Nothing is playing")]
  NotPlaying,

  #[error("Backend process exited unexpectedly")]
  ProcessExited,

  #[error("{0} is not supported by this backend")]
  Unsupported(&'static str),

  #[error("Unsupported codec: {0}")]
  UnsupportedCodec(&'static str),

  #[error("Unsupported content type: {0:?}")]
  UnsupportedContentType(String),

  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("Decode error: {0}")]
  Decode(String),

  #[error("Audio output error: {0}")]
  Output(String),

  #[error("Invalid configuration: {0}")]
  Config(String),

  #[error("Cancelled")]
  Cancelled,
}

impl PlayerError {
  /// True when the backend answered and refused the command.
  pub fn is_protocol(&self) -> bool {
    matches!(self, PlayerError::Protocol { .. })
  }
}

impl From<IpcError> for PlayerError {
  fn from(err: IpcError) -> Self {
    match err {
      IpcError::Mpv(message) => PlayerError::Protocol {
        backend: "mpv",
        message,
      },
      other => PlayerError::Ipc(other),
    }
  }
}

impl From<WaitError> for PlayerError {
  fn from(err: WaitError) -> Self {
    match err {
      WaitError::TimedOut(what) => PlayerError::Timeout(what),
      WaitError::Cancelled => PlayerError::Cancelled,
    }
  }
}
