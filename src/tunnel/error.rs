// Relay error taxonomy
// (c) 2024 Ross Younger

use thiserror::Error;

use super::TransferId;

/// Things that can go wrong with a single transfer.
///
/// None of these are fatal to the process; they end one transfer and are reported to
/// whichever side(s) can still hear about it.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The identifier has no live slot: never registered, already consumed, or its sender left.
    #[error("no pending transfer with that identifier")]
    NotFound,
    /// Attempted to register an identifier that already names a live slot
    #[error("transfer identifier {0} is already in use")]
    Collision(TransferId),
    /// The sender declared a content type we cannot put in a header
    #[error("unusable content type {0:?}")]
    InvalidContentType(String),
    /// Reading from the sender failed
    #[error("failed to read from sender: {0}")]
    Read(#[source] std::io::Error),
    /// The receiver went away while we were writing to it
    #[error("the receiver disconnected")]
    ReceiverGone,
    /// Bytes were written before the content metadata was declared
    #[error("content metadata must be declared before any data")]
    Undeclared,
    /// The sending side gave up; the reason is as it reported
    #[error("transfer aborted: {0}")]
    Aborted(String),
    /// Server shutdown, or the sender's connection ended
    #[error("transfer cancelled")]
    Cancelled,
    /// The receiver waited too long for the sender to start
    #[error("timed out waiting for the sender")]
    Timeout,
}
