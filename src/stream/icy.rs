//! ICY (SHOUTcast/Icecast) in-band metadata framing.
//!
//! With `icy-metaint: N` the body is `N` audio bytes, one length byte `L`,
//! `L * 16` bytes of metadata text, and again from the start.

use async_channel::Sender;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::player::PlayerError;

/// Extract the `StreamTitle='...'` value from a metadata block or log line.
pub fn parse_stream_title(text: &str) -> Option<String> {
  const KEY: &str = "StreamTitle='";

  let start = text.find(KEY)? + KEY.len();
  let rest = &text[start..];
  let end = rest
    .find("';")
    .or_else(|| rest.rfind('\''))
    .unwrap_or(rest.len());
  Some(rest[..end].trim_matches(char::from(0)).trim().to_string())
}

/// What the response headers say about the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
  /// Audio bytes between metadata blocks, 0 when the server sends none.
  pub metaint: usize,
  pub sample_rate: Option<u32>,
  pub channels: Option<u16>,
  /// Lowercased media type without parameters.
  pub content_type: String,
  pub station: Option<String>,
}

impl StreamInfo {
  pub fn from_headers(headers: &HeaderMap) -> Self {
    let text = |name: &str| {
      headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    };

    let audio_info = text("ice-audio-info").unwrap_or_default();
    let audio_field = |key: &str| {
      audio_info.split(';').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        k.trim().eq_ignore_ascii_case(key).then(|| v.trim())
      })
    };

    let content_type = headers
      .get(CONTENT_TYPE)
      .and_then(|value| value.to_str().ok())
      .and_then(|value| value.split(';').next())
      .map(|value| value.trim().to_ascii_lowercase())
      .unwrap_or_default();

    Self {
      metaint: text("icy-metaint").and_then(|v| v.parse().ok()).unwrap_or(0),
      sample_rate: text("icy-sr")
        .or_else(|| audio_field("ice-samplerate"))
        .and_then(|v| v.parse().ok()),
      channels: audio_field("ice-channels").and_then(|v| v.parse().ok()),
      content_type,
      station: text("icy-name").map(str::to_string),
    }
  }
}

/// Splits an ICY body into audio chunks and title updates.
#[derive(Debug, Clone, Copy)]
pub struct IcyDemuxer {
  metaint: usize,
  chunk: usize,
}

impl IcyDemuxer {
  /// `chunk` is the read size for continuous audio and the upper bound per send.
  pub fn new(metaint: usize, chunk: usize) -> Self {
    Self {
      metaint,
      chunk: chunk.max(1),
    }
  }

  /// Pump `reader` until end of body, a read error, a closed pipe or `cancel`.
  pub async fn run<R, F>(
    &self,
    reader: R,
    audio: &Sender<Vec<u8>>,
    on_title: F,
    cancel: &CancellationToken,
  ) -> Result<(), PlayerError>
  where
    R: AsyncRead + Unpin,
    F: FnMut(String),
  {
    tokio::select! {
      _ = cancel.cancelled() => {
        log::debug!("ICY reader cancelled");
        Ok(())
      }
      result = self.pump(reader, audio, on_title) => result,
    }
  }

  async fn pump<R, F>(&self, mut reader: R, audio: &Sender<Vec<u8>>, mut on_title: F) -> Result<(), PlayerError>
  where
    R: AsyncRead + Unpin,
    F: FnMut(String),
  {
    loop {
      let mut remaining = if self.metaint == 0 { usize::MAX } else { self.metaint };

      while remaining > 0 {
        let mut buf = vec![0u8; remaining.min(self.chunk)];
        let read = reader.read(&mut buf).await?;
        if read == 0 {
          log::debug!("ICY body ended");
          return Ok(());
        }
        buf.truncate(read);
        if audio.send(buf).await.is_err() {
          log::debug!("Audio pipe closed, stopping ICY reader");
          return Ok(());
        }
        if self.metaint != 0 {
          remaining -= read;
        }
      }

      let len = match reader.read_u8().await {
        Ok(len) => usize::from(len) * 16,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
        Err(e) => return Err(e.into()),
      };
      // Zero length: no title change this frame.
      if len == 0 {
        continue;
      }

      let mut block = vec![0u8; len];
      reader.read_exact(&mut block).await?;
      let text = String::from_utf8_lossy(&block);
      log::debug!("ICY metadata: {}", text.trim_end_matches(char::from(0)));
      if let Some(title) = parse_stream_title(&text) {
        on_title(title);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::HeaderValue;

  async fn demux(metaint: usize, chunk: usize, body: Vec<u8>) -> (Vec<u8>, Vec<String>) {
    let (tx, rx) = async_channel::bounded(64);
    let mut titles = Vec::new();
    IcyDemuxer::new(metaint, chunk)
      .run(body.as_slice(), &tx, |t| titles.push(t), &CancellationToken::new())
      .await
      .unwrap();
    drop(tx);

    let mut audio = Vec::new();
    while let Ok(chunk) = rx.recv().await {
      audio.extend(chunk);
    }
    (audio, titles)
  }

  #[tokio::test]
  async fn test_metadata_is_split_from_audio() {
    let mut body: Vec<u8> = (0u8..10).collect();
    body.push(2);
    let mut meta = b"StreamTitle='X';".to_vec();
    meta.resize(32, 0);
    body.extend(meta);

    let (audio, titles) = demux(10, 4, body).await;
    assert_eq!(audio, (0u8..10).collect::<Vec<_>>());
    assert_eq!(titles, vec!["X"]);
  }

  #[tokio::test]
  async fn test_zero_length_block_keeps_title() {
    let mut body = vec![1u8; 4];
    body.push(0);
    body.extend([2u8; 4]);
    body.push(0);

    let (audio, titles) = demux(4, 8192, body).await;
    assert_eq!(audio, vec![1, 1, 1, 1, 2, 2, 2, 2]);
    assert!(titles.is_empty());
  }

  #[tokio::test]
  async fn test_no_metaint_is_all_audio() {
    let mut body = b"StreamTitle='Y';".to_vec();
    body.extend([7u8; 100]);

    let (audio, titles) = demux(0, 16, body.clone()).await;
    assert_eq!(audio, body);
    assert!(titles.is_empty());
  }

  #[tokio::test]
  async fn test_cancelled_reader_returns() {
    let (client, _server) = tokio::io::duplex(64);
    let (tx, _rx) = async_channel::bounded(1);
    let cancel = CancellationToken::new();
    cancel.cancel();

    IcyDemuxer::new(16, 16)
      .run(client, &tx, |_| {}, &cancel)
      .await
      .unwrap();
  }

  #[test]
  fn test_parse_stream_title() {
    assert_eq!(
      parse_stream_title("StreamTitle='Artist - It's Here';StreamUrl='';").as_deref(),
      Some("Artist - It's Here")
    );
    assert_eq!(
      parse_stream_title("ICY Info: StreamTitle='Song';").as_deref(),
      Some("Song")
    );
    assert_eq!(parse_stream_title("StreamTitle='';").as_deref(), Some(""));
    assert_eq!(parse_stream_title("StreamUrl='x';"), None);
  }

  #[test]
  fn test_stream_info_from_headers() {
    let mut headers = HeaderMap::new();
    headers.insert("icy-metaint", HeaderValue::from_static("16000"));
    headers.insert("content-type", HeaderValue::from_static("Audio/MPEG; charset=utf-8"));
    headers.insert(
      "ice-audio-info",
      HeaderValue::from_static("ice-samplerate=44100;ice-bitrate=128;ice-channels=2"),
    );
    headers.insert("icy-name", HeaderValue::from_static("Radio X"));

    let info = StreamInfo::from_headers(&headers);
    assert_eq!(info.metaint, 16000);
    assert_eq!(info.content_type, "audio/mpeg");
    assert_eq!(info.sample_rate, Some(44100));
    assert_eq!(info.channels, Some(2));
    assert_eq!(info.station.as_deref(), Some("Radio X"));

    headers.insert("icy-sr", HeaderValue::from_static("48000"));
    assert_eq!(StreamInfo::from_headers(&headers).sample_rate, Some(48000));
  }

  #[test]
  fn test_stream_info_without_icy_headers() {
    let info = StreamInfo::from_headers(&HeaderMap::new());
    assert_eq!(info, StreamInfo::default());
  }
}
