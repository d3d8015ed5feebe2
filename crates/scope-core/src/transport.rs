//! Transport contract shared by the serial, USB and simulated links.
//!
//! A transport owns one physical (or simulated) link. It reports progress
//! through an [`EventSink`] installed before `connect()`: every state change
//! and every decoded inbound message is pushed synchronously, in the order it
//! happened, so observers never see a message from a link whose `Ready` they
//! have not yet seen.

use crate::error::{Result, ScopeError};
use crate::protocol::{ConnectionState, InboundMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which kind of link to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Serial port (CDC-ACM or USB-UART bridge).
    Serial,
    /// Raw USB bulk endpoints.
    Usb,
    /// In-process simulator.
    #[default]
    Simulated,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Serial => "serial",
            Self::Usb => "usb",
            Self::Simulated => "simulated",
        })
    }
}

impl FromStr for TransportMode {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "usb" => Ok(Self::Usb),
            "simulated" | "sim" | "simulator" => Ok(Self::Simulated),
            other => Err(ScopeError::Unsupported(format!(
                "Unknown transport mode '{}'",
                other
            ))),
        }
    }
}

/// Something a transport reports.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The link moved to a new state.
    State(ConnectionState),
    /// A complete line decoded into a message.
    Message(InboundMessage),
}

/// Synchronous callback receiving [`TransportEvent`]s.
///
/// Cloning is cheap; all clones feed the same consumer. A default sink
/// discards everything, which is what a transport uses until one is
/// installed.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl EventSink {
    /// Wrap a callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Sink that forwards into an unbounded channel.
    ///
    /// Handy in tests: the receiver sees events in emission order.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    /// Report a state change.
    pub fn state(&self, state: ConnectionState) {
        (self.inner)(TransportEvent::State(state));
    }

    /// Report an inbound message.
    pub fn message(&self, message: InboundMessage) {
        (self.inner)(TransportEvent::Message(message));
    }

    /// Decode a raw line and report it; malformed lines are skipped.
    pub fn line(&self, line: &str) {
        if let Some(message) = crate::protocol::decode_message(line) {
            self.message(message);
        } else if !line.trim().is_empty() {
            tracing::warn!("Dropping malformed line ({} bytes)", line.len());
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(|_| {})
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// One device link.
///
/// Implementations emit `{Connecting|Scanning} -> Handshaking -> Ready ->
/// [Streaming -> Ready] -> Disconnected`, may enter `Error` from any state
/// on I/O failure, and never emit `Ready` before the handshake was sent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which link this is.
    fn kind(&self) -> TransportMode;

    /// Install the consumer for state changes and messages. Must be called
    /// before [`Transport::connect`].
    fn set_event_sink(&mut self, sink: EventSink);

    /// Open the link and perform the handshake.
    ///
    /// Resolves once the handshake settle has elapsed (state `Ready`) or with
    /// the error that stopped it.
    async fn connect(&mut self) -> Result<()>;

    /// Write one already-encoded protocol line.
    async fn send(&self, line: &str) -> Result<()>;

    /// Tear the link down. Always ends in `Disconnected`; safe to call twice.
    async fn disconnect(&mut self) -> Result<()>;
}
