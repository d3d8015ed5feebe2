//! Error type shared by every scope-link crate.
//!
//! `ScopeError` mirrors the failure taxonomy of the device link:
//!
//! - **`Unsupported`**: the requested transport kind is not available in this
//!   host/build. Raised before any I/O, so no state event is ever emitted.
//! - **`DeviceAccess`**: no device could be selected or the OS refused to open it.
//! - **`Io`** / **`Transport`**: the link failed mid-session.
//! - **`NotConnected`**: a command was issued with no active transport. Commands
//!   are never queued.
//! - **`CaptureTimeout`**, **`CaptureInProgress`**, **`BatchCancelled`**,
//!   **`Thumbnail`**: capture-level outcomes, each distinct so callers can tell
//!   "nothing happened" from "something happened and failed".
//!
//! Protocol decode failures are deliberately absent: a malformed line is
//! dropped by the codec and never becomes an error.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using [`ScopeError`].
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Primary error type for the device link and capture pipeline.
#[derive(Error, Debug)]
pub enum ScopeError {
    /// Requested transport kind is unavailable.
    ///
    /// **Recovery Strategy**: pick another mode (the simulator is always
    /// available) or rebuild with the matching feature (`serial`, `usb`).
    #[error("{0}")]
    Unsupported(String),

    /// Device selection or open failed (no port, permission denied, user declined).
    ///
    /// **Error Type**: Usually permanent until the user plugs in or grants access.
    #[error("Device access failed: {0}")]
    DeviceAccess(String),

    /// Standard I/O failure on an open link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-I/O transport failure (USB transfer errors, closed writer, ...).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A command was sent while no transport is active.
    #[error("Not connected")]
    NotConnected,

    /// Command could not be serialized.
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The device did not deliver a photo before the deadline.
    #[error("Capture timeout after {0:?}")]
    CaptureTimeout(Duration),

    /// Another capture already holds the pending-photo slot.
    #[error("A capture is already in progress")]
    CaptureInProgress,

    /// Photo waiter was released before a photo arrived.
    #[error("Capture aborted: {0}")]
    CaptureAborted(String),

    /// The batch was cancelled; `completed` shots had already been taken.
    #[error("Batch capture cancelled after {completed} capture(s)")]
    BatchCancelled {
        /// Captures finished before cancellation was observed.
        completed: usize,
    },

    /// Photo payload could not be decoded or resized.
    #[error("Thumbnail error: {0}")]
    Thumbnail(String),

    /// Payload was not valid base64.
    #[error("Invalid image payload: {0}")]
    Payload(#[from] base64::DecodeError),

    /// Record store rejected a write.
    #[error("Store error: {0}")]
    Store(String),
}

impl ScopeError {
    /// Returns true if this error came from the link itself and warrants an
    /// automatic reconnect attempt.
    #[must_use]
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Self::DeviceAccess(_) | Self::Io(_) | Self::Transport(_)
        )
    }
}
