//! Simulated scope for scope-link.
//!
//! [`SimulatedTransport`] implements the same [`Transport`](scope_core::Transport)
//! contract as the serial and USB links and is always available, so demos and
//! tests never need hardware. All delays use `tokio::time`, which means tests
//! can run it under a paused clock.
//!
//! # Default Timing
//!
//! - Connecting for 300 ms, handshaking for 500 ms
//! - TELEMETRY every second (battery 85–95 %)
//! - VIDEO_FRAME every 33 ms while streaming (640x480, JPEG q70)
//! - PHOTO 100 ms after CAPTURE_PHOTO (1280x720, JPEG q90)

pub mod common;
pub mod pattern;
mod simulated;

pub use common::{MockRng, TimingConfig};
pub use simulated::{SimulatedTransport, SimulatorConfig};
