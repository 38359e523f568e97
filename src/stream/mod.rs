//! Built-in streaming backend: HTTP with ICY demux, symphonia decode and rodio output.
//!
//! Each `play` starts one session of three stages:
//! - `reader` task: HTTP body → [`IcyDemuxer`] → audio pipe
//! - `decode` thread: audio pipe → [`StreamDecoder`] → decoded blocks
//! - `feeder` thread: decoded blocks → bounded frame buffer → [`AudioOutput`]

mod buffer;
mod decode;
mod icy;
mod output;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use parking_lot::Mutex;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::config::{PlayerConfig, StreamConfig};
use crate::player::{clamp_volume, Metadata, PlaybackTimeTracker, Player, PlayerError};

pub use buffer::{sample_buffer, SampleSource};
pub use decode::{to_stereo, Codec, DecodedBlock, PipeReader, StreamDecoder};
pub use icy::{parse_stream_title, IcyDemuxer, StreamInfo};
pub use output::{AudioOutput, OutputStarter};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const DECODED_BLOCKS: usize = 4;

/// State the pipeline writes and `metadata` reads.
#[derive(Debug, Default)]
struct Shared {
  title: String,
  error: Option<String>,
}

type SharedState = Arc<Mutex<Shared>>;

fn record_error(shared: &SharedState, stage: &str, err: &PlayerError) {
  log::error!("Stream {} failed: {}", stage, err);
  let mut state = shared.lock();
  if state.error.is_none() {
    state.error = Some(err.to_string());
  }
}

struct Session {
  cancel: CancellationToken,
  reader: tokio::task::JoinHandle<()>,
  threads: Vec<JoinHandle<()>>,
  frames: Receiver<[f32; 2]>,
}

impl Session {
  /// Cancel every stage and wait briefly for the threads to exit.
  async fn shutdown(self) {
    self.cancel.cancel();
    self.frames.close();
    if let Err(e) = self.reader.await {
      if !e.is_cancelled() {
        log::warn!("Stream reader task failed: {}", e);
      }
    }

    let threads = self.threads;
    let joined = tokio::task::spawn_blocking(move || {
      for handle in threads {
        let _ = handle.join();
      }
    });
    if tokio::time::timeout(JOIN_TIMEOUT, joined).await.is_err() {
      log::warn!("Stream pipeline threads did not exit in time");
    }
  }
}

/// Process-free backend decoding the stream itself.
///
/// Live streams cannot seek; `seek` returns the current snapshot.
pub struct StreamingPlayer {
  http: reqwest::Client,
  config: StreamConfig,
  cancel: CancellationToken,
  output: Option<AudioOutput>,
  session: Option<Session>,
  shared: SharedState,
  tracker: PlaybackTimeTracker,
  volume: u8,
  paused: bool,
}

impl StreamingPlayer {
  pub fn new(config: &PlayerConfig, cancel: CancellationToken) -> Result<Self, PlayerError> {
    let http = reqwest::Client::builder()
      .connect_timeout(CONNECT_TIMEOUT)
      .user_agent(concat!("radioplay/", env!("CARGO_PKG_VERSION")))
      .build()?;

    Ok(Self {
      http,
      config: config.stream.clone(),
      cancel,
      output: None,
      session: None,
      shared: SharedState::default(),
      tracker: PlaybackTimeTracker::new(),
      volume: config.initial_volume,
      paused: false,
    })
  }

  async fn connect(&self, url: &str) -> Result<reqwest::Response, PlayerError> {
    let request = self.http.get(url).header("Icy-MetaData", "1").send();
    let response = tokio::select! {
      biased;
      _ = self.cancel.cancelled() => return Err(PlayerError::Cancelled),
      response = request => response?,
    };
    Ok(response.error_for_status()?)
  }

  async fn ensure_output(&mut self) -> Result<&AudioOutput, PlayerError> {
    if self.output.is_none() {
      let output = AudioOutput::open(f32::from(self.volume) / 100.0).await?;
      self.output = Some(output);
    }
    self.output
      .as_ref()
      .ok_or_else(|| PlayerError::Output("audio output unavailable".to_string()))
  }

  async fn end_session(&mut self) {
    if let Some(session) = self.session.take() {
      session.shutdown().await;
      if let Some(output) = &self.output {
        output.stop();
      }
      log::info!("Stream session ended");
    }
  }

  fn start_session(
    &self,
    response: reqwest::Response,
    info: &StreamInfo,
    codec: Codec,
    starter: OutputStarter,
  ) -> Result<Session, PlayerError> {
    let cancel = self.cancel.child_token();
    let (pipe_tx, pipe_rx) = async_channel::bounded::<Vec<u8>>(self.config.pipe_chunks.max(1));
    let (block_tx, block_rx) = async_channel::bounded::<DecodedBlock>(DECODED_BLOCKS);
    let (frame_tx, frame_rx) = sample_buffer(self.config.buffer_frames);

    let decode = {
      let shared = self.shared.clone();
      std::thread::Builder::new()
        .name("radioplay-decode".to_string())
        .spawn(move || decode_stage(codec, pipe_rx, block_tx, shared))?
    };

    let feeder = {
      let shared = self.shared.clone();
      let cancel = cancel.clone();
      let frames = frame_rx.clone();
      std::thread::Builder::new()
        .name("radioplay-feeder".to_string())
        .spawn(move || feed_stage(block_rx, frame_tx, frames, starter, cancel, shared))?
    };

    let reader = {
      let demuxer = IcyDemuxer::new(info.metaint, self.config.default_chunk);
      let shared = self.shared.clone();
      let cancel = cancel.clone();
      tokio::spawn(async move {
        let chunks = response.bytes_stream().map_err(std::io::Error::other);
        let body = StreamReader::new(Box::pin(chunks));
        let titles = shared.clone();
        let result = demuxer
          .run(
            body,
            &pipe_tx,
            |title| {
              log::info!("Now playing: {}", title);
              titles.lock().title = title;
            },
            &cancel,
          )
          .await;
        if let Err(e) = result {
          record_error(&shared, "reader", &e);
        }
      })
    };

    Ok(Session {
      cancel,
      reader,
      threads: vec![decode, feeder],
      frames: frame_rx,
    })
  }
}

/// Decode until the pipe ends, the feeder goes away or a fatal decode error.
fn decode_stage(codec: Codec, pipe: Receiver<Vec<u8>>, blocks: Sender<DecodedBlock>, shared: SharedState) {
  let mut decoder = match StreamDecoder::open(codec, PipeReader::new(pipe)) {
    Ok(decoder) => decoder,
    Err(e) => {
      record_error(&shared, "decoder", &e);
      return;
    }
  };

  loop {
    match decoder.next_block() {
      Ok(Some(block)) => {
        if blocks.send_blocking(block).is_err() {
          break;
        }
      }
      Ok(None) => {
        log::info!("Stream ended");
        break;
      }
      Err(e) => {
        record_error(&shared, "decoder", &e);
        break;
      }
    }
  }
}

/// Move decoded frames into the bounded buffer, starting output on the first block.
fn feed_stage(
  blocks: Receiver<DecodedBlock>,
  frames: Sender<[f32; 2]>,
  source_rx: Receiver<[f32; 2]>,
  starter: OutputStarter,
  cancel: CancellationToken,
  shared: SharedState,
) {
  let mut source_rx = Some(source_rx);
  let mut rate = 0;

  while let Ok(block) = blocks.recv_blocking() {
    if cancel.is_cancelled() {
      break;
    }

    if let Some(rx) = source_rx.take() {
      rate = block.sample_rate;
      log::info!("Starting audio output at {} Hz", rate);
      if !starter.start(SampleSource::new(rx, rate)) {
        record_error(&shared, "output", &PlayerError::Output("output thread is gone".to_string()));
        break;
      }
    } else if block.sample_rate != rate {
      log::warn!("Sample rate changed mid-stream ({} -> {} Hz)", rate, block.sample_rate);
    }

    for frame in block.frames {
      if frames.send_blocking(frame).is_err() {
        return;
      }
    }
  }
}

#[async_trait]
impl Player for StreamingPlayer {
  async fn play(&mut self, url: &str) -> Result<(), PlayerError> {
    self.end_session().await;
    *self.shared.lock() = Shared::default();

    let response = self.connect(url).await?;
    let info = StreamInfo::from_headers(response.headers());
    log::info!(
      "Stream {:?}: type={} metaint={} rate={:?} channels={:?}",
      info.station,
      info.content_type,
      info.metaint,
      info.sample_rate,
      info.channels
    );
    let codec = Codec::for_content_type(&info.content_type)?;

    let starter = self.ensure_output().await?.starter();
    let session = self.start_session(response, &info, codec, starter)?;
    self.session = Some(session);

    if let Some(output) = &self.output {
      output.resume();
    }
    self.paused = false;
    self.tracker.reset();
    log::info!("Streaming {}", url);
    Ok(())
  }

  async fn pause(&mut self, paused: bool) -> Result<(), PlayerError> {
    if self.session.is_none() || self.paused == paused {
      return Ok(());
    }
    if let Some(output) = &self.output {
      if paused {
        output.pause();
        self.tracker.pause();
      } else {
        output.resume();
        self.tracker.resume();
      }
    }
    self.paused = paused;
    Ok(())
  }

  async fn stop(&mut self) -> Result<(), PlayerError> {
    self.end_session().await;
    self.tracker.pause();
    self.paused = false;
    Ok(())
  }

  async fn set_volume(&mut self, volume: i32) -> Result<i32, PlayerError> {
    let volume = clamp_volume(volume);
    if let Some(output) = &self.output {
      output.set_volume(f32::from(volume) / 100.0);
    }
    self.volume = volume;
    Ok(volume as i32)
  }

  async fn metadata(&mut self) -> Option<Metadata> {
    self.session.as_ref()?;
    let state = self.shared.lock();
    Some(Metadata {
      title: state.title.clone(),
      playback_time_sec: Some(self.tracker.play_time_secs()),
      err: state.error.clone().map(PlayerError::Playback),
    })
  }

  async fn seek(&mut self, _secs: i32) -> Option<Metadata> {
    self.metadata().await
  }

  async fn close(&mut self) -> Result<(), PlayerError> {
    self.end_session().await;
    if self.output.take().is_some() {
      log::info!("Audio output closed");
    }
    Ok(())
  }
}
