//! Physical transports for scope-link.
//!
//! # Feature Flags
//!
//! - `serial` (default): serial-port transport over `tokio-serial`
//! - `usb`: USB-bulk transport over `nusb`
//!
//! The serial transport's framing and handshake logic is always compiled so
//! it can run against [`mock_serial`] ports; only [`SystemPorts`] needs the
//! `serial` feature.

pub mod config;
pub mod mock_serial;
pub mod serial;
pub mod serial_io;
#[cfg(feature = "usb")]
pub mod usb;

pub use config::{SerialConfig, UsbConfig};
pub use serial::SerialTransport;
pub use serial_io::{DynSerial, PortProvider, PortSummary, SerialPortIO};
#[cfg(feature = "serial")]
pub use serial_io::SystemPorts;
#[cfg(feature = "usb")]
pub use usb::UsbTransport;

/// Whether this build can open real serial ports.
#[must_use]
pub fn serial_supported() -> bool {
    cfg!(feature = "serial")
}

/// Whether this build can open USB devices.
#[must_use]
pub fn usb_supported() -> bool {
    cfg!(feature = "usb")
}

/// Serial ports present on this host; empty when built without `serial`.
pub fn list_serial_ports() -> scope_core::Result<Vec<PortSummary>> {
    #[cfg(feature = "serial")]
    {
        serial_io::list_serial_ports()
    }
    #[cfg(not(feature = "serial"))]
    {
        Ok(Vec::new())
    }
}

/// USB devices present on this host; empty when built without `usb`.
pub fn list_usb_devices() -> scope_core::Result<Vec<PortSummary>> {
    #[cfg(feature = "usb")]
    {
        usb::list_usb_devices()
    }
    #[cfg(not(feature = "usb"))]
    {
        Ok(Vec::new())
    }
}
