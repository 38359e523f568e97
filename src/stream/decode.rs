//! Content-type dispatch and symphonia decoding over the audio pipe.

use std::io::{self, Read};

use async_channel::Receiver;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::player::PlayerError;

// A few corrupt packets are normal right after joining a live stream.
const MAX_DECODE_RETRIES: usize = 3;

/// Codecs the built-in pipeline can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
  Mpeg,
  OggVorbis,
}

impl Codec {
  /// Pick a decoder for a lowercased media type, failing fast on anything unplayable.
  pub fn for_content_type(content_type: &str) -> Result<Self, PlayerError> {
    match content_type {
      "audio/mpeg" | "audio/mp3" | "audio/x-scpls" => Ok(Codec::Mpeg),
      "application/ogg" | "audio/ogg" | "audio/vorbis" => Ok(Codec::OggVorbis),
      "audio/aac" | "audio/aacp" | "audio/x-aac" => Err(PlayerError::UnsupportedCodec("aac")),
      other => Err(PlayerError::UnsupportedContentType(other.to_string())),
    }
  }

  fn hint(self) -> Hint {
    let mut hint = Hint::new();
    match self {
      Codec::Mpeg => hint.with_extension("mp3").mime_type("audio/mpeg"),
      Codec::OggVorbis => hint.with_extension("ogg").mime_type("audio/ogg"),
    };
    hint
  }
}

/// Blocking reader over the chunks the HTTP task pushes into the pipe.
///
/// Reads return end of file once the sending side is gone.
pub struct PipeReader {
  rx: Receiver<Vec<u8>>,
  chunk: Vec<u8>,
  pos: usize,
}

impl PipeReader {
  pub fn new(rx: Receiver<Vec<u8>>) -> Self {
    Self {
      rx,
      chunk: Vec::new(),
      pos: 0,
    }
  }
}

impl Read for PipeReader {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    while self.pos >= self.chunk.len() {
      match self.rx.recv_blocking() {
        Ok(chunk) => {
          self.chunk = chunk;
          self.pos = 0;
        }
        Err(_) => return Ok(0),
      }
    }

    let n = buf.len().min(self.chunk.len() - self.pos);
    buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
    self.pos += n;
    Ok(n)
  }
}

/// One decoded packet as stereo frames.
#[derive(Debug)]
pub struct DecodedBlock {
  pub sample_rate: u32,
  pub frames: Vec<[f32; 2]>,
}

/// Fold interleaved samples of any channel count into stereo frames.
pub fn to_stereo(samples: &[f32], channels: usize) -> Vec<[f32; 2]> {
  match channels {
    0 => Vec::new(),
    1 => samples.iter().map(|&s| [s, s]).collect(),
    n => samples.chunks_exact(n).map(|frame| [frame[0], frame[1]]).collect(),
  }
}

fn decode_error(err: SymphoniaError) -> PlayerError {
  PlayerError::Decode(err.to_string())
}

pub struct StreamDecoder {
  format: Box<dyn FormatReader>,
  decoder: Box<dyn Decoder>,
  track_id: u32,
}

impl StreamDecoder {
  /// Probe the container. Blocks until enough of the stream has arrived.
  pub fn open<R>(codec: Codec, reader: R) -> Result<Self, PlayerError>
  where
    R: Read + Send + Sync + 'static,
  {
    let source = MediaSourceStream::new(Box::new(ReadOnlySource::new(reader)), Default::default());
    let probed = symphonia::default::get_probe()
      .format(
        &codec.hint(),
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
      )
      .map_err(decode_error)?;

    let format = probed.format;
    let (track_id, decoder) = Self::select_track(format.as_ref())?;
    Ok(Self {
      format,
      decoder,
      track_id,
    })
  }

  fn select_track(format: &dyn FormatReader) -> Result<(u32, Box<dyn Decoder>), PlayerError> {
    let track = format
      .tracks()
      .iter()
      .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
      .ok_or_else(|| PlayerError::Decode("no playable audio track".to_string()))?;

    let decoder = symphonia::default::get_codecs()
      .make(&track.codec_params, &DecoderOptions::default())
      .map_err(decode_error)?;
    Ok((track.id, decoder))
  }

  /// Next decoded packet, or `None` when the stream has ended.
  pub fn next_block(&mut self) -> Result<Option<DecodedBlock>, PlayerError> {
    let mut decode_errors = 0;

    loop {
      let packet = match self.format.next_packet() {
        Ok(packet) => packet,
        Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
          return Ok(None);
        }
        // Chained Ogg streams start a new logical stream per song.
        Err(SymphoniaError::ResetRequired) => {
          log::debug!("Decoder reset required, reselecting track");
          let (track_id, decoder) = Self::select_track(self.format.as_ref())?;
          self.track_id = track_id;
          self.decoder = decoder;
          continue;
        }
        Err(e) => return Err(decode_error(e)),
      };

      if packet.track_id() != self.track_id {
        continue;
      }

      match self.decoder.decode(&packet) {
        Ok(decoded) => {
          let spec = *decoded.spec();
          let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
          samples.copy_interleaved_ref(decoded);
          return Ok(Some(DecodedBlock {
            sample_rate: spec.rate,
            frames: to_stereo(samples.samples(), spec.channels.count()),
          }));
        }
        Err(SymphoniaError::DecodeError(msg)) => {
          decode_errors += 1;
          log::debug!("Skipping corrupt packet: {}", msg);
          if decode_errors > MAX_DECODE_RETRIES {
            return Err(PlayerError::Decode(msg.to_string()));
          }
        }
        Err(e) => return Err(decode_error(e)),
      }
    }
  }
}
