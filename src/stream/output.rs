//! Audio output thread.
//!
//! rodio's `OutputStream` is not `Send`, so it lives on its own thread and is
//! driven through a command channel.

use async_channel::{Receiver, Sender};
use rodio::{OutputStream, Sink};

use super::buffer::SampleSource;
use crate::player::PlayerError;

enum OutputCommand {
  Start(SampleSource),
  Pause,
  Resume,
  Volume(f32),
  Stop,
}

/// Handle to the output thread. Dropping it shuts the thread down.
pub struct AudioOutput {
  tx: Sender<OutputCommand>,
}

impl AudioOutput {
  /// Open the default output device, waiting until it is ready.
  pub async fn open(volume: f32) -> Result<Self, PlayerError> {
    let (tx, rx) = async_channel::unbounded();
    let (ready_tx, ready_rx) = async_channel::bounded(1);

    std::thread::Builder::new()
      .name("radioplay-output".to_string())
      .spawn(move || run(rx, ready_tx, volume))
      .map_err(|e| PlayerError::Output(format!("Failed to spawn output thread: {}", e)))?;

    ready_rx
      .recv()
      .await
      .map_err(|_| PlayerError::Output("Output thread terminated during init".to_string()))??;

    log::info!("Audio output ready");
    Ok(Self { tx })
  }

  fn send(&self, cmd: OutputCommand) {
    if self.tx.try_send(cmd).is_err() {
      log::warn!("Audio output thread is gone");
    }
  }

  pub fn pause(&self) {
    self.send(OutputCommand::Pause);
  }

  pub fn resume(&self) {
    self.send(OutputCommand::Resume);
  }

  /// Linear gain, 1.0 is unity.
  pub fn set_volume(&self, volume: f32) {
    self.send(OutputCommand::Volume(volume));
  }

  pub fn stop(&self) {
    self.send(OutputCommand::Stop);
  }

  /// Sender used by the feeder thread to start playback once the rate is known.
  pub fn starter(&self) -> OutputStarter {
    OutputStarter {
      tx: self.tx.clone(),
    }
  }
}

/// Clonable start-only handle for the pipeline threads.
#[derive(Clone)]
pub struct OutputStarter {
  tx: Sender<OutputCommand>,
}

impl OutputStarter {
  pub fn start(&self, source: SampleSource) -> bool {
    self.tx.try_send(OutputCommand::Start(source)).is_ok()
  }
}

fn run(rx: Receiver<OutputCommand>, ready: Sender<Result<(), PlayerError>>, mut volume: f32) {
  // Create audio output on this thread (cpal streams may be !Send)
  let (_stream, handle) = match OutputStream::try_default() {
    Ok(output) => output,
    Err(e) => {
      let _ = ready.send_blocking(Err(PlayerError::Output(e.to_string())));
      return;
    }
  };
  let _ = ready.send_blocking(Ok(()));

  let mut sink: Option<Sink> = None;
  let mut paused = false;

  while let Ok(cmd) = rx.recv_blocking() {
    match cmd {
      OutputCommand::Start(source) => {
        if let Some(old) = sink.take() {
          old.stop();
        }
        match Sink::try_new(&handle) {
          Ok(new_sink) => {
            new_sink.set_volume(volume);
            if paused {
              new_sink.pause();
            }
            new_sink.append(source);
            sink = Some(new_sink);
          }
          Err(e) => log::error!("Failed to create audio sink: {}", e),
        }
      }
      OutputCommand::Pause => {
        paused = true;
        if let Some(sink) = &sink {
          sink.pause();
        }
      }
      OutputCommand::Resume => {
        paused = false;
        if let Some(sink) = &sink {
          sink.play();
        }
      }
      OutputCommand::Volume(v) => {
        volume = v;
        if let Some(sink) = &sink {
          sink.set_volume(v);
        }
      }
      OutputCommand::Stop => {
        paused = false;
        if let Some(old) = sink.take() {
          old.stop();
        }
      }
    }
  }

  if let Some(old) = sink.take() {
    old.stop();
  }
  log::debug!("Audio output thread exiting");
}
