//! # scope-link
//!
//! Host-side tooling for a serial/USB imaging scope. The device link itself
//! lives in the workspace crates:
//!
//! - **`scope-core`**: wire protocol, transport contract, record types, errors
//! - **`scope-hardware`**: serial and USB transports
//! - **`scope-driver-mock`**: a simulated scope for development and tests
//! - **`scope-client`**: the client, auto-reconnect, capture and batch workflows
//!
//! This crate wires them into an application:
//!
//! - **`config`**: Figment-backed [`ScopeConfig`](config::ScopeConfig)
//! - **`logging`**: `tracing-subscriber` setup
//! - **`context`**: the [`AppContext`](context::AppContext) owning client and workflows
//! - **`store`**: [`DirectoryStore`](store::DirectoryStore), captures on disk

pub mod config;
pub mod context;
pub mod logging;
pub mod store;

pub use config::ScopeConfig;
pub use context::AppContext;
pub use store::DirectoryStore;
