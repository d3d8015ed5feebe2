//! Async serial port plumbing.
//!
//! - [`SerialPortIO`]: any `AsyncRead + AsyncWrite` byte stream usable as a port
//! - [`DynSerial`]: the type-erased port the serial transport owns
//! - [`PortProvider`]: how the transport enumerates and opens ports
//! - [`SystemPorts`]: the real provider backed by `tokio-serial` (feature `serial`)
//!
//! Tests swap [`SystemPorts`] for a provider that hands out
//! [`mock_serial`](crate::mock_serial) ports or `tokio::io::duplex` ends.

use async_trait::async_trait;
use scope_core::Result;
use tokio::io::{AsyncRead, AsyncWrite};

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
/// - [`MockSerialPort`](crate::mock_serial::MockSerialPort)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// A port visible to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSummary {
    /// OS name of the port or device.
    pub name: String,
    /// Human-readable description (USB ids, product string).
    pub description: String,
}

/// Enumerates and opens serial ports.
#[async_trait]
pub trait PortProvider: Send + Sync {
    /// Ports currently present, in enumeration order.
    async fn available(&self) -> Result<Vec<PortSummary>>;

    /// Open `path` at `baud_rate`, 8N1, no flow control.
    async fn open(&self, path: &str, baud_rate: u32) -> Result<DynSerial>;
}

/// Real serial ports via `tokio-serial`.
#[cfg(feature = "serial")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

#[cfg(feature = "serial")]
#[async_trait]
impl PortProvider for SystemPorts {
    async fn available(&self) -> Result<Vec<PortSummary>> {
        tokio::task::spawn_blocking(list_serial_ports)
            .await
            .map_err(|e| scope_core::ScopeError::DeviceAccess(e.to_string()))?
    }

    async fn open(&self, path: &str, baud_rate: u32) -> Result<DynSerial> {
        let port = open_serial_async(path, baud_rate)
            .await
            .map_err(|e| scope_core::ScopeError::DeviceAccess(format!("{:#}", e)))?;
        Ok(Box::new(port))
    }
}

/// Enumerate serial ports known to the OS.
#[cfg(feature = "serial")]
pub fn list_serial_ports() -> Result<Vec<PortSummary>> {
    use tokio_serial::SerialPortType;

    let ports = tokio_serial::available_ports()
        .map_err(|e| scope_core::ScopeError::DeviceAccess(e.to_string()))?;
    Ok(ports
        .into_iter()
        .map(|info| {
            let description = match info.port_type {
                SerialPortType::UsbPort(usb) => format!(
                    "USB {:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.unwrap_or_default()
                ),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortSummary {
                name: info.port_name,
                description: description.trim_end().to_string(),
            }
        })
        .collect())
}

/// Open a serial port on a blocking thread.
///
/// Port initialization can block on some platforms. Settings are fixed at
/// 8N1 with no flow control, which is what the scope firmware expects.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio_serial::SerialPortBuilderExt;

    let path = port_path.to_string();
    tokio::task::spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("Failed to open scope serial port {} at {} baud", path, baud_rate))
    })
    .await
    .context("Serial open task panicked")?
}
