//! Core types for scope-link.
//!
//! - [`protocol`]: newline-delimited JSON codec and message types
//! - [`lines`]: partial-line buffering for byte-stream transports
//! - [`transport`]: the [`Transport`](transport::Transport) contract and its event sink
//! - [`records`]: record-store types and the capture persistence seam
//! - [`error`]: [`ScopeError`](error::ScopeError)

pub mod error;
pub mod lines;
pub mod protocol;
pub mod records;
pub mod transport;

pub use error::{Result, ScopeError};
pub use protocol::{Command, CommandType, ConnectionState, InboundMessage, Telemetry};
pub use transport::{EventSink, Transport, TransportEvent, TransportMode};
