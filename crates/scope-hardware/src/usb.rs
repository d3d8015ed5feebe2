//! USB-bulk transport (feature `usb`).
//!
//! Talks to the scope's vendor interface directly: configuration 1,
//! interface 0, bulk endpoint 1 in both directions. Reads are issued as
//! 64-byte transfers back to back while the link is up.

use crate::config::UsbConfig;
use crate::serial_io::PortSummary;
use async_trait::async_trait;
use nusb::transfer::RequestBuffer;
use scope_core::lines::LineBuffer;
use scope_core::protocol::encode_command;
use scope_core::{Command, ConnectionState, EventSink, Result, ScopeError, Transport, TransportMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CONFIGURATION: u8 = 1;
const INTERFACE: u8 = 0;
const EP_BULK_IN: u8 = 0x81;
const EP_BULK_OUT: u8 = 0x01;
const TRANSFER_SIZE: usize = 64;
const USB_CLASS_HUB: u8 = 0x09;

/// Link over raw USB bulk endpoints.
pub struct UsbTransport {
    config: UsbConfig,
    sink: EventSink,
    interface: Option<nusb::Interface>,
    reader: Option<JoinHandle<()>>,
    reading: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl UsbTransport {
    #[must_use]
    pub fn new(config: UsbConfig) -> Self {
        Self {
            config,
            sink: EventSink::default(),
            interface: None,
            reader: None,
            reading: Arc::new(AtomicBool::new(false)),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn select_device(&self) -> Result<nusb::DeviceInfo> {
        let devices = nusb::list_devices()
            .map_err(|e| ScopeError::DeviceAccess(format!("USB enumeration failed: {}", e)))?;
        let unfiltered = self.config.is_unfiltered();
        devices
            .filter(|d| self.config.matches(d.vendor_id(), d.product_id()))
            .find(|d| !unfiltered || d.class() != USB_CLASS_HUB)
            .ok_or_else(|| ScopeError::DeviceAccess("No matching USB device found".into()))
    }

    fn open(&mut self) -> Result<()> {
        let info = self.select_device()?;
        info!(
            "Opening USB device {:04x}:{:04x} {}",
            info.vendor_id(),
            info.product_id(),
            info.product_string().unwrap_or("")
        );
        let device = info
            .open()
            .map_err(|e| ScopeError::DeviceAccess(format!("USB open failed: {}", e)))?;
        if let Err(e) = device.set_configuration(CONFIGURATION) {
            // Linux refuses when the configuration is already active
            warn!("set_configuration({}) failed: {}", CONFIGURATION, e);
        }
        let interface = device.claim_interface(INTERFACE).map_err(|e| {
            ScopeError::DeviceAccess(format!("Claiming interface {} failed: {}", INTERFACE, e))
        })?;

        self.reading.store(true, Ordering::SeqCst);
        self.reader = Some(tokio::spawn(read_loop(
            interface.clone(),
            self.sink.clone(),
            self.reading.clone(),
            self.failed.clone(),
        )));
        self.interface = Some(interface);
        Ok(())
    }

    async fn release(&mut self) {
        self.reading.store(false, Ordering::SeqCst);
        // An in-flight bulk-IN only completes when data arrives; abort drops it.
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
        if self.interface.take().is_some() {
            debug!("Released USB interface {}", INTERFACE);
        }
    }
}

#[async_trait]
impl Transport for UsbTransport {
    fn kind(&self) -> TransportMode {
        TransportMode::Usb
    }

    fn set_event_sink(&mut self, sink: EventSink) {
        self.sink = sink;
    }

    async fn connect(&mut self) -> Result<()> {
        self.failed.store(false, Ordering::SeqCst);
        self.sink.state(ConnectionState::Connecting);

        if let Err(e) = self.open() {
            error!("USB connect failed: {}", e);
            self.release().await;
            self.sink.state(ConnectionState::Error);
            return Err(e);
        }

        self.sink.state(ConnectionState::Handshaking);
        let handshake = encode_command(&Command::handshake())?;
        if let Err(e) = self.send(&handshake).await {
            error!("USB handshake write failed: {}", e);
            self.release().await;
            self.sink.state(ConnectionState::Error);
            return Err(e);
        }

        tokio::time::sleep(self.config.settle()).await;

        if self.failed.load(Ordering::SeqCst) {
            self.release().await;
            return Err(ScopeError::Transport(
                "USB link dropped during handshake".into(),
            ));
        }

        self.sink.state(ConnectionState::Ready);
        Ok(())
    }

    async fn send(&self, line: &str) -> Result<()> {
        let interface = self.interface.as_ref().ok_or(ScopeError::NotConnected)?;
        interface
            .bulk_out(EP_BULK_OUT, line.as_bytes().to_vec())
            .await
            .into_result()
            .map_err(|e| ScopeError::Transport(format!("Bulk OUT failed: {}", e)))?;
        debug!("USB sent {} bytes", line.len());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.release().await;
        self.sink.state(ConnectionState::Disconnected);
        Ok(())
    }
}

async fn read_loop(
    interface: nusb::Interface,
    sink: EventSink,
    reading: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
) {
    let mut lines = LineBuffer::new();

    while reading.load(Ordering::SeqCst) {
        let completion = interface
            .bulk_in(EP_BULK_IN, RequestBuffer::new(TRANSFER_SIZE))
            .await;
        match completion.into_result() {
            Ok(data) => {
                for line in lines.push(&data) {
                    sink.line(&line);
                }
            }
            Err(e) => {
                if reading.load(Ordering::SeqCst) {
                    error!("USB read error: {}", e);
                    failed.store(true, Ordering::SeqCst);
                    sink.state(ConnectionState::Error);
                }
                break;
            }
        }
    }
}

/// Enumerate USB devices, skipping hubs.
pub fn list_usb_devices() -> Result<Vec<PortSummary>> {
    let devices = nusb::list_devices()
        .map_err(|e| ScopeError::DeviceAccess(format!("USB enumeration failed: {}", e)))?;
    Ok(devices
        .filter(|d| d.class() != USB_CLASS_HUB)
        .map(|d| PortSummary {
            name: format!("{:04x}:{:04x}", d.vendor_id(), d.product_id()),
            description: format!(
                "{} {}",
                d.manufacturer_string().unwrap_or(""),
                d.product_string().unwrap_or("")
            )
            .trim()
            .to_string(),
        })
        .collect())
}
