//! Bounded stereo frame buffer between the decoder stages and the audio sink.

use std::time::Duration;

use async_channel::{Receiver, Sender};
use rodio::Source;

/// Create the frame queue. Senders block when full, the source blocks when empty.
pub fn sample_buffer(frames: usize) -> (Sender<[f32; 2]>, Receiver<[f32; 2]>) {
  async_channel::bounded(frames.max(1))
}

/// Interleaved stereo `f32` source that ends when every sender is gone.
pub struct SampleSource {
  rx: Receiver<[f32; 2]>,
  sample_rate: u32,
  right: Option<f32>,
}

impl SampleSource {
  pub fn new(rx: Receiver<[f32; 2]>, sample_rate: u32) -> Self {
    Self {
      rx,
      sample_rate,
      right: None,
    }
  }
}

impl Iterator for SampleSource {
  type Item = f32;

  fn next(&mut self) -> Option<f32> {
    if let Some(right) = self.right.take() {
      return Some(right);
    }
    let [left, right] = self.rx.recv_blocking().ok()?;
    self.right = Some(right);
    Some(left)
  }
}

impl Source for SampleSource {
  fn current_frame_len(&self) -> Option<usize> {
    None
  }

  fn channels(&self) -> u16 {
    2
  }

  fn sample_rate(&self) -> u32 {
    self.sample_rate
  }

  fn total_duration(&self) -> Option<Duration> {
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_frames_come_out_interleaved() {
    let (tx, rx) = sample_buffer(8);
    let source = SampleSource::new(rx, 44100);
    assert_eq!(source.channels(), 2);
    assert_eq!(source.sample_rate(), 44100);

    tx.send_blocking([0.1, 0.2]).unwrap();
    tx.send_blocking([0.3, 0.4]).unwrap();
    drop(tx);

    let samples: Vec<f32> = source.collect();
    assert_eq!(samples, vec![0.1, 0.2, 0.3, 0.4]);
  }

  #[test]
  fn test_full_buffer_applies_backpressure() {
    let (tx, rx) = sample_buffer(2);
    let mut source = SampleSource::new(rx, 48000);
    tx.try_send([1.0, 1.0]).unwrap();
    tx.try_send([2.0, 2.0]).unwrap();
    assert!(tx.try_send([3.0, 3.0]).unwrap_err().is_full());

    let producer = std::thread::spawn(move || {
      tx.send_blocking([3.0, 3.0]).unwrap();
    });
    assert_eq!(source.next(), Some(1.0));
    producer.join().unwrap();
    let rest: Vec<f32> = source.collect();
    assert_eq!(rest, vec![1.0, 2.0, 2.0, 3.0, 3.0]);
  }
}
