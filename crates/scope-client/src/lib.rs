//! Device-link client for scope-link.
//!
//! UI-agnostic: the CLI, tests and any future frontend drive the same
//! [`ScopeClient`]. Higher-level workflows sit on top of it:
//!
//! - [`reconnect`]: bounded, fixed-delay auto-reconnect with status text
//! - [`capture`]: single photo with deadline, thumbnail and metadata
//! - [`batch`]: paced burst capture with progress and cancellation

pub mod batch;
pub mod capture;
pub mod client;
pub mod reconnect;
pub mod thumbnail;

pub use batch::{BatchCaptureController, BatchObserver, CancelHandle, DEFAULT_BATCH_COUNT};
pub use capture::{CaptureWorkflow, DEFAULT_CAPTURE_TIMEOUT};
pub use client::{ClientEvent, DefaultTransportFactory, PhotoWaiter, ScopeClient, TransportFactory};
pub use reconnect::{AutoReconnect, ReconnectConfig, ReconnectStatus};
pub use thumbnail::{generate_thumbnail, ThumbnailSpec};
