//! In-memory serial port for exercising the serial transport without hardware.
//!
//! The mock uses a pair of unbounded channels to simulate bidirectional communication:
//! - [`MockSerialPort`] (handed to the transport): implements AsyncRead/AsyncWrite
//! - [`MockScope`] (kept in the test): plays the firmware side of the line protocol
//!
//! Dropping the `MockScope` closes the read side, which the port reports as EOF,
//! i.e. the cable was pulled.
//!
//! ```rust,ignore
//! let (port, mut scope) = mock_serial::new();
//! // hand `port` to a PortProvider ...
//! let cmd = scope.expect_command().await;
//! assert_eq!(cmd.kind(), CommandType::Handshake);
//! scope.send_message(&InboundMessage::HandshakeAck { timestamp: None }).unwrap();
//! ```

use scope_core::protocol::{decode_command, encode_message};
use scope_core::{Command, InboundMessage, ScopeError};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Transport-facing side of the mock port.
#[derive(Debug)]
pub struct MockSerialPort {
    writes_tx: UnboundedSender<Vec<u8>>,
    reads_rx: UnboundedReceiver<Vec<u8>>,
    read_buffer: VecDeque<u8>,
}

/// Test-facing side: reads what the host wrote and feeds device output.
#[derive(Debug)]
pub struct MockScope {
    writes_rx: UnboundedReceiver<Vec<u8>>,
    reads_tx: UnboundedSender<Vec<u8>>,
    write_buffer: Vec<u8>,
}

/// Creates a connected `MockSerialPort` / `MockScope` pair.
#[must_use]
pub fn new() -> (MockSerialPort, MockScope) {
    let (host_to_scope_tx, host_to_scope_rx) = mpsc::unbounded_channel();
    let (scope_to_host_tx, scope_to_host_rx) = mpsc::unbounded_channel();

    let port = MockSerialPort {
        writes_tx: host_to_scope_tx,
        reads_rx: scope_to_host_rx,
        read_buffer: VecDeque::new(),
    };

    let scope = MockScope {
        writes_rx: host_to_scope_rx,
        reads_tx: scope_to_host_tx,
        write_buffer: Vec::new(),
    };

    (port, scope)
}

impl MockSerialPort {
    fn fill(&mut self, buf: &mut ReadBuf<'_>) {
        let to_read = buf.remaining().min(self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..to_read).collect();
        buf.put_slice(&chunk);
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.read_buffer.is_empty() {
            self.fill(buf);
            return Poll::Ready(Ok(()));
        }

        match self.reads_rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                self.read_buffer.extend(chunk);
                self.fill(buf);
                Poll::Ready(Ok(()))
            }
            // Scope side dropped: EOF
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writes_tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock scope disconnected",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl MockScope {
    /// Push raw bytes to the host, exactly as given.
    pub fn send_raw(&self, data: &[u8]) -> scope_core::Result<()> {
        self.reads_tx
            .send(data.to_vec())
            .map_err(|_| ScopeError::Transport("mock port dropped".into()))
    }

    /// Encode and push one message line.
    pub fn send_message(&self, message: &InboundMessage) -> scope_core::Result<()> {
        self.send_raw(encode_message(message)?.as_bytes())
    }

    /// Wait up to two seconds for the next complete line the host wrote.
    ///
    /// Returns `None` on timeout or when the host closed the port.
    pub async fn next_line(&mut self) -> Option<String> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(pos) = self.write_buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.write_buffer.drain(..=pos).collect();
                return Some(String::from_utf8_lossy(&line[..pos]).into_owned());
            }
            match tokio::time::timeout_at(deadline, self.writes_rx.recv()).await {
                Ok(Some(chunk)) => self.write_buffer.extend_from_slice(&chunk),
                Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Wait for the next host command and decode it.
    ///
    /// # Panics
    /// Panics if no line arrives in time or the line is not a command.
    #[allow(clippy::panic)]
    pub async fn expect_command(&mut self) -> Command {
        let Some(line) = self.next_line().await else {
            panic!("Timed out waiting for a command from the host");
        };
        match decode_command(&line) {
            Some(cmd) => cmd,
            None => panic!("Host wrote a line that is not a command: {:?}", line),
        }
    }

    /// Simulate the cable being pulled.
    pub fn hang_up(self) {
        drop(self);
    }
}
