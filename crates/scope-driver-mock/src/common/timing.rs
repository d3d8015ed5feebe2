//! Timing profile of the simulated scope.
//!
//! Defaults match the real firmware closely enough that UI code sees the same
//! pacing: a visible connecting and handshaking phase, 1 Hz telemetry and a
//! ~30 fps feed.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delays and periods used by the simulator, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Connecting -> Handshaking
    pub connect_delay_ms: u64,
    /// Handshaking -> HANDSHAKE_ACK + Ready
    pub handshake_delay_ms: u64,
    /// TELEMETRY period
    pub telemetry_interval_ms: u64,
    /// VIDEO_FRAME period while streaming
    pub frame_interval_ms: u64,
    /// CAPTURE_PHOTO -> PHOTO
    pub photo_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_delay_ms: 300,
            handshake_delay_ms: 500,
            telemetry_interval_ms: 1000,
            frame_interval_ms: 33,
            photo_delay_ms: 100,
        }
    }
}

impl TimingConfig {
    pub(crate) fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    pub(crate) fn handshake_delay(&self) -> Duration {
        Duration::from_millis(self.handshake_delay_ms)
    }

    pub(crate) fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms.max(1))
    }

    pub(crate) fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub(crate) fn photo_delay(&self) -> Duration {
        Duration::from_millis(self.photo_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let t = TimingConfig::default();
        assert_eq!(t.connect_delay(), Duration::from_millis(300));
        assert_eq!(t.handshake_delay(), Duration::from_millis(500));
        assert_eq!(t.frame_interval(), Duration::from_millis(33));
    }

    #[test]
    fn test_zero_periods_clamped() {
        let t = TimingConfig {
            telemetry_interval_ms: 0,
            frame_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(t.telemetry_interval(), Duration::from_millis(1));
        assert_eq!(t.frame_interval(), Duration::from_millis(1));
    }
}
