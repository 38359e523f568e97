//! Internet radio playback core.
//!
//! One [`Player`] contract over several backends: external players driven
//! over their control protocols (mpv, MPD, MPlayer, VLC), launch-and-scrape
//! players (ffplay, fire-and-forget mpv) and a built-in streaming engine.
//!
//! The crate logs through the `log` facade and never installs a logger.

pub mod config;
pub mod launcher;
pub mod mpd;
pub mod mplayer;
pub mod mpv;
pub mod player;
pub mod process;
pub mod stream;
pub mod textproto;
pub mod vlc;

pub use config::PlayerConfig;
pub use player::{
  available_backends, open_player, Backend, Metadata, PlaybackTimeTracker, Player, PlayerError,
};
