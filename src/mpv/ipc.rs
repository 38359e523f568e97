//! IPC connection to MPV.
//!
//! One request at a time: write a command, then read lines until the reply
//! carrying the same `request_id` shows up. Events and stale replies seen on
//! the way are skipped.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::Instant;

use super::protocol::{MpvCommand, MpvMessage, MpvResponse};

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(std::io::Error),
  #[error("I/O failed: {0}")]
  Io(#[from] std::io::Error),
  #[error("Serialization failed: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Command timeout")]
  Timeout,
  #[error("MPV error: {0}")]
  Mpv(String),
  #[error("Disconnected")]
  Disconnected,
}

/// Byte stream an IPC connection can run over.
pub trait IpcStream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync> IpcStream for T {}

/// MPV IPC connection.
pub struct MpvIpc<S = Box<dyn IpcStream>> {
  stream: BufReader<S>,
  timeout: Duration,
  line: String,
}

impl MpvIpc {
  /// Connect to MPV IPC socket/pipe once.
  #[cfg(windows)]
  pub async fn connect(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let client = ClientOptions::new()
      .open(path)
      .map_err(IpcError::ConnectionFailed)?;
    Ok(Self::new(Box::new(client), timeout))
  }

  /// Connect to MPV IPC socket/pipe once.
  #[cfg(not(windows))]
  pub async fn connect(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(path)
      .await
      .map_err(IpcError::ConnectionFailed)?;
    Ok(Self::new(Box::new(stream), timeout))
  }
}

impl<S: IpcStream> MpvIpc<S> {
  pub fn new(stream: S, timeout: Duration) -> Self {
    Self {
      stream: BufReader::new(stream),
      timeout,
      line: String::new(),
    }
  }

  /// Send a command and wait for its matching response.
  ///
  /// The write and the response scan each get their own deadline.
  pub async fn send_command(&mut self, cmd: MpvCommand) -> Result<MpvResponse, IpcError> {
    let request_id = cmd.request_id;
    let mut json = serde_json::to_string(&cmd)?;
    log::debug!("Sending MPV command: {}", json);
    json.push('\n');

    let writer = self.stream.get_mut();
    tokio::time::timeout(self.timeout, async {
      writer.write_all(json.as_bytes()).await?;
      writer.flush().await
    })
    .await
    .map_err(|_| IpcError::Timeout)??;

    let deadline = Instant::now() + self.timeout;
    loop {
      self.line.clear();
      let read = tokio::time::timeout_at(deadline, self.stream.read_line(&mut self.line))
        .await
        .map_err(|_| {
          log::error!("MPV command timeout, request_id={}", request_id);
          IpcError::Timeout
        })??;
      if read == 0 {
        return Err(IpcError::Disconnected);
      }

      let trimmed = self.line.trim();
      if trimmed.is_empty() {
        continue;
      }

      match MpvMessage::parse(trimmed) {
        Ok(MpvMessage::Response(response)) if response.request_id == request_id => {
          log::debug!("MPV response for request_id={}: {}", request_id, response.error);
          return Ok(response);
        }
        Ok(MpvMessage::Response(response)) => {
          log::debug!(
            "Skipping MPV response for request_id={} (waiting for {})",
            response.request_id,
            request_id
          );
        }
        Ok(MpvMessage::Event(event)) => {
          log::debug!("MPV event: {} {:?}", event.event, event.reason);
        }
        Err(e) => {
          log::debug!("Skipping unparsable MPV line: {} - {}", e, trimmed);
        }
      }
    }
  }

  /// Send a command and fail unless MPV reports success.
  pub async fn request(&mut self, cmd: MpvCommand) -> Result<MpvResponse, IpcError> {
    let response = self.send_command(cmd).await?;
    if !response.is_success() {
      return Err(IpcError::Mpv(response.error));
    }
    Ok(response)
  }

  /// Close the connection.
  pub async fn close(&mut self) -> Result<(), IpcError> {
    self.stream.get_mut().shutdown().await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{duplex, AsyncBufReadExt, BufReader};

  /// Reads one request line from the fake server side and returns its id.
  async fn read_request_id<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> i64 {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    value["request_id"].as_i64().unwrap()
  }

  #[tokio::test]
  async fn test_response_correlation_skips_foreign_lines() {
    let (client, server) = duplex(4096);
    let mut ipc = MpvIpc::new(client, Duration::from_secs(2));

    let fake = tokio::spawn(async move {
      let (read_half, mut write_half) = tokio::io::split(server);
      let mut reader = BufReader::new(read_half);
      let id = read_request_id(&mut reader).await;
      let other = if id == 1 { 2 } else { id - 1 };
      let lines = format!(
        "{{\"event\":\"metadata-update\"}}\n\
         {{\"error\":\"success\",\"data\":\"wrong\",\"request_id\":{other}}}\n\
         garbage line\n\
         {{\"error\":\"success\",\"data\":\"right\",\"request_id\":{id}}}\n"
      );
      write_half.write_all(lines.as_bytes()).await.unwrap();
      write_half.flush().await.unwrap();
      (reader, write_half)
    });

    let response = ipc.request(MpvCommand::get_property("media-title")).await.unwrap();
    assert_eq!(response.data, Some(serde_json::json!("right")));
    drop(fake.await.unwrap());
  }

  #[tokio::test]
  async fn test_protocol_error_is_distinct() {
    let (client, server) = duplex(4096);
    let mut ipc = MpvIpc::new(client, Duration::from_secs(2));

    let fake = tokio::spawn(async move {
      let (read_half, mut write_half) = tokio::io::split(server);
      let mut reader = BufReader::new(read_half);
      let id = read_request_id(&mut reader).await;
      let line = format!("{{\"error\":\"property unavailable\",\"request_id\":{id}}}\n");
      write_half.write_all(line.as_bytes()).await.unwrap();
      (reader, write_half)
    });

    let err = ipc.request(MpvCommand::get_property("metadata")).await.unwrap_err();
    assert!(matches!(err, IpcError::Mpv(ref msg) if msg == "property unavailable"));
    drop(fake.await.unwrap());
  }

  #[tokio::test]
  async fn test_unanswered_command_times_out() {
    let (client, server) = duplex(4096);
    let mut ipc = MpvIpc::new(client, Duration::from_millis(50));

    let err = ipc.send_command(MpvCommand::stop()).await.unwrap_err();
    assert!(matches!(err, IpcError::Timeout));
    drop(server);
  }

  #[tokio::test]
  async fn test_closed_peer_is_disconnected() {
    let (client, server) = duplex(4096);
    let mut ipc = MpvIpc::new(client, Duration::from_secs(2));

    let fake = tokio::spawn(async move {
      let mut reader = BufReader::new(server);
      read_request_id(&mut reader).await;
    });

    let err = ipc.send_command(MpvCommand::quit()).await.unwrap_err();
    assert!(matches!(err, IpcError::Disconnected | IpcError::Io(_)));
    fake.await.unwrap();
  }
}
