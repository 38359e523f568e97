//! Line-oriented request/response over a socket, shared by the MPD and VLC drivers.
//!
//! Neither protocol can be framed purely from the bytes on the wire in every
//! case, so where a response ends is chosen explicitly with [`Framing`].

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Where a response ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Framing {
  /// Lines up to and including `OK` or `ACK ...`.
  #[default]
  Terminated,
  /// Lines until none arrives for this many milliseconds.
  UntilIdle(u64),
  /// A single read of at most this many bytes; silence is an empty response.
  SingleRead(usize),
}

/// Request/response channel over any byte stream.
///
/// A response whose read timed out is still owed by the peer; it is read and
/// dropped before the next request goes out.
pub struct LineChannel<S> {
  stream: BufReader<S>,
  deadline: Duration,
  pending: Vec<u8>,
  unanswered: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> LineChannel<S> {
  /// `deadline` bounds each write and each line read.
  pub fn new(stream: S, deadline: Duration) -> Self {
    Self {
      stream: BufReader::new(stream),
      deadline,
      pending: Vec::new(),
      unanswered: 0,
    }
  }

  pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
    log::debug!("> {}", line);
    let writer = self.stream.get_mut();
    tokio::time::timeout(self.deadline, async {
      writer.write_all(line.as_bytes()).await?;
      writer.write_all(b"\n").await?;
      writer.flush().await
    })
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write deadline exceeded"))?
  }

  /// Next complete line, or `None` if `wait` elapsed first.
  ///
  /// Bytes of a line cut off by the timeout stay buffered for the next call.
  async fn next_line(&mut self, wait: Duration) -> io::Result<Option<String>> {
    match tokio::time::timeout(wait, self.stream.read_until(b'\n', &mut self.pending)).await {
      Err(_) => Ok(None),
      Ok(Err(e)) => Err(e),
      Ok(Ok(0)) if self.pending.is_empty() => Err(io::ErrorKind::UnexpectedEof.into()),
      Ok(Ok(_)) => {
        let raw = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&raw)
          .trim_end_matches(['\r', '\n'])
          .to_string();
        log::debug!("< {}", line);
        Ok(Some(line))
      }
    }
  }

  /// One line, for greetings that are not framed like responses.
  pub async fn read_line(&mut self) -> io::Result<String> {
    self
      .next_line(self.deadline)
      .await?
      .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "read deadline exceeded"))
  }

  pub async fn read_response(&mut self, framing: Framing) -> io::Result<Vec<String>> {
    let mut lines = Vec::new();
    match framing {
      Framing::Terminated => loop {
        let line = self.read_line().await?;
        let done = line == "OK" || line.starts_with("ACK ");
        lines.push(line);
        if done {
          return Ok(lines);
        }
      },
      Framing::UntilIdle(idle_ms) => loop {
        match self.next_line(Duration::from_millis(idle_ms)).await {
          Ok(Some(line)) => lines.push(line),
          Ok(None) => return Ok(lines),
          Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !lines.is_empty() => {
            return Ok(lines)
          }
          Err(e) => return Err(e),
        }
      },
      Framing::SingleRead(max_bytes) => {
        let mut buf = vec![0u8; max_bytes.max(1)];
        let read = match tokio::time::timeout(self.deadline, self.stream.read(&mut buf)).await {
          Err(_) => return Ok(lines),
          Ok(read) => read?,
        };
        if read == 0 {
          return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let text = String::from_utf8_lossy(&buf[..read]);
        log::debug!("< {}", text.trim_end());
        lines.extend(
          text
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string),
        );
        Ok(lines)
      }
    }
  }

  pub async fn round_trip(&mut self, line: &str, framing: Framing) -> io::Result<Vec<String>> {
    self.resync(framing).await?;
    self.send_line(line).await?;
    self.unanswered += 1;
    let lines = self.read_response(framing).await?;
    self.unanswered -= 1;
    Ok(lines)
  }

  /// Consume replies to earlier requests that were abandoned mid-read.
  async fn resync(&mut self, framing: Framing) -> io::Result<()> {
    while self.unanswered > 0 {
      let dropped = self.read_response(framing).await?;
      log::debug!("Dropped stale response ({} lines)", dropped.len());
      self.unanswered -= 1;
    }
    Ok(())
  }

  pub async fn shutdown(&mut self) -> io::Result<()> {
    self.stream.get_mut().shutdown().await
  }
}

/// Value of the first `key: value` line with the given key.
pub fn field<'a>(lines: &'a [String], key: &str) -> Option<&'a str> {
  lines.iter().find_map(|line| {
    let (k, v) = line.split_once(':')?;
    k.trim().eq_ignore_ascii_case(key).then(|| v.trim())
  })
}
