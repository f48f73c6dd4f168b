//! sshpipe: stream a file over SSH, collect it over HTTP
// (c) 2024 Ross Younger
//!
//! A sender runs `ssh <host> [type] < file` and is given a share link. The first receiver to
//! open the link gets the file, streamed straight from the sender's connection; nothing is
//! stored on the relay.

pub mod auth;
mod cli;
pub use cli::cli;
pub mod config;
mod console;
/// Content sniffing and the streaming copy
pub mod relay;
/// Sender-side transfer flow
pub mod sender;
/// The SSH and HTTP listeners
pub mod server;
pub mod tunnel;
/// Utilities
pub mod util;

#[doc(hidden)]
pub use derive_deftly;
