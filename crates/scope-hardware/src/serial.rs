//! Serial-port transport.
//!
//! Opens the scope's CDC/UART port at 115200 8N1, splits it into read and
//! write halves, sends `HANDSHAKE` and waits for the link to settle before
//! reporting `Ready`. A background task frames incoming bytes into lines and
//! forwards each decoded message to the event sink in arrival order.

use crate::config::SerialConfig;
use crate::serial_io::{DynSerial, PortProvider};
use async_trait::async_trait;
use scope_core::lines::LineBuffer;
use scope_core::protocol::encode_command;
use scope_core::{Command, ConnectionState, EventSink, Result, ScopeError, Transport, TransportMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const READ_CHUNK: usize = 1024;

/// Link over a serial port.
pub struct SerialTransport {
    config: SerialConfig,
    ports: Arc<dyn PortProvider>,
    sink: EventSink,
    writer: Mutex<Option<WriteHalf<DynSerial>>>,
    reader: Option<JoinHandle<()>>,
    /// Set while we are tearing down so the reader does not report EOF as a fault.
    closing: Arc<AtomicBool>,
    /// Set by the reader when the link dies.
    failed: Arc<AtomicBool>,
    port_name: Option<String>,
}

impl SerialTransport {
    /// Transport over real OS serial ports.
    #[cfg(feature = "serial")]
    #[must_use]
    pub fn new(config: SerialConfig) -> Self {
        Self::with_provider(config, Arc::new(crate::serial_io::SystemPorts))
    }

    /// Transport over ports supplied by `ports`.
    #[must_use]
    pub fn with_provider(config: SerialConfig, ports: Arc<dyn PortProvider>) -> Self {
        Self {
            config,
            ports,
            sink: EventSink::default(),
            writer: Mutex::new(None),
            reader: None,
            closing: Arc::new(AtomicBool::new(false)),
            failed: Arc::new(AtomicBool::new(false)),
            port_name: None,
        }
    }

    /// Port currently open, if any.
    #[must_use]
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    async fn select_port(&self) -> Result<String> {
        if let Some(port) = &self.config.port {
            return Ok(port.clone());
        }
        let ports = self.ports.available().await?;
        debug!("Found {} serial port(s)", ports.len());
        ports
            .into_iter()
            .next()
            .map(|p| p.name)
            .ok_or_else(|| ScopeError::DeviceAccess("No serial port available".into()))
    }

    async fn open(&mut self) -> Result<()> {
        let path = self.select_port().await?;
        info!("Opening serial port {} at {} baud", path, self.config.baud_rate);
        let port = self.ports.open(&path, self.config.baud_rate).await?;

        let (read_half, write_half) = tokio::io::split(port);
        *self.writer.lock().await = Some(write_half);
        self.reader = Some(tokio::spawn(read_loop(
            read_half,
            self.sink.clone(),
            self.closing.clone(),
            self.failed.clone(),
        )));
        self.port_name = Some(path);
        Ok(())
    }

    async fn release(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Serial writer shutdown: {}", e);
            }
        }
        if let Some(name) = self.port_name.take() {
            debug!("Closed serial port {}", name);
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportMode {
        TransportMode::Serial
    }

    fn set_event_sink(&mut self, sink: EventSink) {
        self.sink = sink;
    }

    async fn connect(&mut self) -> Result<()> {
        self.closing.store(false, Ordering::SeqCst);
        self.failed.store(false, Ordering::SeqCst);
        self.sink.state(ConnectionState::Connecting);

        if let Err(e) = self.open().await {
            error!("Serial connect failed: {}", e);
            self.release().await;
            self.sink.state(ConnectionState::Error);
            return Err(e);
        }

        self.sink.state(ConnectionState::Handshaking);
        let handshake = encode_command(&Command::handshake())?;
        if let Err(e) = self.send(&handshake).await {
            error!("Serial handshake write failed: {}", e);
            self.release().await;
            self.sink.state(ConnectionState::Error);
            return Err(e);
        }

        tokio::time::sleep(self.config.settle()).await;

        if self.failed.load(Ordering::SeqCst) {
            self.release().await;
            return Err(ScopeError::Transport(
                "Serial link dropped during handshake".into(),
            ));
        }

        self.sink.state(ConnectionState::Ready);
        Ok(())
    }

    async fn send(&self, line: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ScopeError::NotConnected)?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        debug!("Serial sent {} bytes", line.len());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.release().await;
        self.sink.state(ConnectionState::Disconnected);
        Ok(())
    }
}

async fn read_loop(
    mut reader: ReadHalf<DynSerial>,
    sink: EventSink,
    closing: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
) {
    let mut lines = LineBuffer::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                if !closing.load(Ordering::SeqCst) {
                    warn!("Serial port closed by device");
                    failed.store(true, Ordering::SeqCst);
                    sink.state(ConnectionState::Error);
                }
                break;
            }
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    sink.line(&line);
                }
            }
            Err(e) => {
                if !closing.load(Ordering::SeqCst) {
                    error!("Serial read error: {}", e);
                    failed.store(true, Ordering::SeqCst);
                    sink.state(ConnectionState::Error);
                }
                break;
            }
        }
    }
}
