//! Link settings for the physical transports.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default baud rate of the scope firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Time between sending `HANDSHAKE` and declaring the link ready.
pub const DEFAULT_HANDSHAKE_SETTLE_MS: u64 = 500;

/// Serial-port transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Mode can be disabled at runtime even when compiled in.
    pub enabled: bool,
    /// Port path (`/dev/ttyACM0`, `COM3`). `None` picks the first enumerated port.
    pub port: Option<String>,
    /// Line speed; 8N1 and no flow control are fixed.
    pub baud_rate: u32,
    /// Handshake settle delay in milliseconds.
    pub handshake_settle_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            handshake_settle_ms: DEFAULT_HANDSHAKE_SETTLE_MS,
        }
    }
}

impl SerialConfig {
    pub(crate) fn settle(&self) -> Duration {
        Duration::from_millis(self.handshake_settle_ms)
    }
}

/// USB-bulk transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbConfig {
    /// Mode can be disabled at runtime even when compiled in.
    pub enabled: bool,
    /// Only consider devices with this vendor id.
    pub vendor_id: Option<u16>,
    /// Only consider devices with this product id.
    pub product_id: Option<u16>,
    /// Handshake settle delay in milliseconds.
    pub handshake_settle_ms: u64,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vendor_id: None,
            product_id: None,
            handshake_settle_ms: DEFAULT_HANDSHAKE_SETTLE_MS,
        }
    }
}

impl UsbConfig {
    #[cfg(feature = "usb")]
    pub(crate) fn settle(&self) -> Duration {
        Duration::from_millis(self.handshake_settle_ms)
    }

    /// Whether a device with these ids passes the configured filter.
    #[must_use]
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id.map_or(true, |v| v == vendor_id)
            && self.product_id.map_or(true, |p| p == product_id)
    }

    /// True when neither id is configured.
    #[must_use]
    pub fn is_unfiltered(&self) -> bool {
        self.vendor_id.is_none() && self.product_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_filter() {
        let any = UsbConfig::default();
        assert!(any.is_unfiltered());
        assert!(any.matches(0x1234, 0x0001));

        let vendor_only = UsbConfig {
            vendor_id: Some(0x2e8a),
            ..Default::default()
        };
        assert!(vendor_only.matches(0x2e8a, 0x000a));
        assert!(!vendor_only.matches(0x1234, 0x000a));

        let exact = UsbConfig {
            vendor_id: Some(0x2e8a),
            product_id: Some(0x000a),
            ..Default::default()
        };
        assert!(!exact.matches(0x2e8a, 0x000b));
    }

    #[test]
    fn test_serial_defaults() {
        let cfg = SerialConfig::default();
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.settle(), Duration::from_millis(500));
        assert!(cfg.port.is_none());
    }
}
