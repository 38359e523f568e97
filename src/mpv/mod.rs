//! MPV backend - spawns an idle mpv and controls it via JSON IPC.
//!
//! Architecture:
//! - `process.rs` - launch arguments and per-instance IPC endpoint naming
//! - `ipc.rs` - Async IPC connection (Named Pipes on Windows, Unix Sockets on Linux/macOS)
//! - `protocol.rs` - JSON command/response types and serialization
//! - `client.rs` - the player contract over one mpv process

mod client;
mod ipc;
mod process;
mod protocol;

pub use client::MpvClient;
pub use ipc::{IpcError, IpcStream, MpvIpc};
pub use protocol::{MpvCommand, MpvEvent, MpvMessage, MpvResponse};
