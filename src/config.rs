//! Application configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/scope.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `SCOPE_LINK_`, nested with `__`
//!
//! Every field has a default, so an empty or missing file yields a usable
//! configuration.
//!
//! # Example
//! ```no_run
//! use scope_link::config::ScopeConfig;
//!
//! // SCOPE_LINK_CONNECTION__SERIAL__PORT=/dev/ttyACM0 overrides the file
//! let config = ScopeConfig::load()?;
//! println!("Default mode: {}", config.connection.default_mode);
//! # Ok::<(), figment::Error>(())
//! ```

use crate::logging::OutputFormat;
use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use scope_client::{ReconnectConfig, ThumbnailSpec};
use scope_core::TransportMode;
use scope_driver_mock::SimulatorConfig;
use scope_hardware::{SerialConfig, UsbConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/scope.toml";

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "SCOPE_LINK_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Transport selection and per-transport settings
    pub connection: ConnectionConfig,
    /// Auto-reconnect policy
    pub reconnect: ReconnectSettings,
    /// Capture and batch settings
    pub capture: CaptureSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
    /// Emit span NEW/CLOSE events
    pub log_span_events: bool,
    /// Include source file and line in each event
    pub log_file_and_line: bool,
    /// Include the thread name in each event
    pub log_thread_names: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "scope-link".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
            log_span_events: false,
            log_file_and_line: false,
            log_thread_names: false,
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Mode used when the CLI does not name one
    pub default_mode: TransportMode,
    pub serial: SerialConfig,
    pub usb: UsbConfig,
    pub simulator: SimulatorConfig,
}

/// Auto-reconnect configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Whether link failures are retried automatically
    pub enabled: bool,
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Fixed pause between attempts in milliseconds
    pub delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let policy = ReconnectConfig::default();
        Self {
            enabled: policy.enabled,
            max_attempts: policy.max_attempts,
            delay_ms: u64::try_from(policy.delay.as_millis()).unwrap_or(3000),
        }
    }
}

impl ReconnectSettings {
    /// Policy handed to the reconnect controller.
    #[must_use]
    pub fn policy(&self) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: self.max_attempts,
            delay: Duration::from_millis(self.delay_ms),
            enabled: self.enabled,
        }
    }
}

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// How long to wait for a photo in milliseconds
    pub timeout_ms: u64,
    /// Default shots per batch
    pub batch_count: usize,
    /// Pause between batch shots in milliseconds
    pub inter_shot_delay_ms: u64,
    /// Longest thumbnail side in pixels
    pub thumbnail_size: u32,
    /// Thumbnail JPEG quality (1-100)
    pub thumbnail_quality: u8,
    /// Where captures are written
    pub output_dir: PathBuf,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let thumbnail = ThumbnailSpec::default();
        Self {
            timeout_ms: 10_000,
            batch_count: scope_client::DEFAULT_BATCH_COUNT,
            inter_shot_delay_ms: 500,
            thumbnail_size: thumbnail.max_side,
            thumbnail_quality: thumbnail.quality,
            output_dir: PathBuf::from("captures"),
        }
    }
}

impl CaptureSettings {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn inter_shot_delay(&self) -> Duration {
        Duration::from_millis(self.inter_shot_delay_ms)
    }

    #[must_use]
    pub fn thumbnail(&self) -> ThumbnailSpec {
        ThumbnailSpec {
            max_side: self.thumbnail_size,
            quality: self.thumbnail_quality,
        }
    }
}

impl ScopeConfig {
    /// Load configuration from `config/scope.toml` and environment variables
    ///
    /// Example: `SCOPE_LINK_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref(), ENV_PREFIX).extract()
    }

    fn figment(path: &Path, env_prefix: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(env_prefix).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            bail!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            );
        }

        if self.connection.serial.baud_rate == 0 {
            bail!("Invalid serial baud_rate 0");
        }

        if self.reconnect.max_attempts == 0 {
            bail!("reconnect.max_attempts must be at least 1");
        }

        if self.capture.timeout_ms == 0 {
            bail!("capture.timeout_ms must be positive");
        }

        if self.capture.batch_count == 0 {
            bail!("capture.batch_count must be at least 1");
        }

        if self.capture.thumbnail_size == 0 {
            bail!("capture.thumbnail_size must be positive");
        }

        if !(1..=100).contains(&self.capture.thumbnail_quality) {
            bail!(
                "Invalid thumbnail_quality {}. Must be 1-100",
                self.capture.thumbnail_quality
            );
        }

        let timing = &self.connection.simulator.timing;
        if timing.telemetry_interval_ms == 0 || timing.frame_interval_ms == 0 {
            bail!("Simulator telemetry and frame intervals must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScopeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connection.default_mode, TransportMode::Simulated);
        assert_eq!(config.reconnect.policy(), ReconnectConfig::default());
        assert_eq!(config.capture.timeout(), Duration::from_secs(10));
        assert_eq!(config.capture.thumbnail(), ThumbnailSpec::default());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScopeConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ScopeConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"
log_format = "json"
log_file_and_line = true

[connection]
default_mode = "serial"

[connection.serial]
port = "/dev/ttyACM0"

[connection.usb]
vendor_id = 0x2341

[reconnect]
max_attempts = 3
delay_ms = 1500

[capture]
batch_count = 8
output_dir = "/tmp/shots"
"#
        )
        .unwrap();

        let config = ScopeConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.log_format, OutputFormat::Json);
        assert!(config.application.log_file_and_line);
        assert!(!config.application.log_thread_names);
        assert_eq!(config.connection.default_mode, TransportMode::Serial);
        assert_eq!(config.connection.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.connection.serial.baud_rate, 115_200);
        assert_eq!(config.connection.usb.vendor_id, Some(0x2341));
        assert_eq!(config.reconnect.policy().delay, Duration::from_millis(1500));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.capture.batch_count, 8);
        assert_eq!(config.capture.output_dir, PathBuf::from("/tmp/shots"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scope.toml");
        std::fs::write(&path, "[reconnect]\nmax_attempts = 3\n").unwrap();

        std::env::set_var("SCOPE_LINK_CFGTEST_RECONNECT__MAX_ATTEMPTS", "7");
        std::env::set_var("SCOPE_LINK_CFGTEST_CONNECTION__DEFAULT_MODE", "usb");
        let config: ScopeConfig = ScopeConfig::figment(&path, "SCOPE_LINK_CFGTEST_")
            .extract()
            .unwrap();
        std::env::remove_var("SCOPE_LINK_CFGTEST_RECONNECT__MAX_ATTEMPTS");
        std::env::remove_var("SCOPE_LINK_CFGTEST_CONNECTION__DEFAULT_MODE");

        assert_eq!(config.reconnect.max_attempts, 7);
        assert_eq!(config.connection.default_mode, TransportMode::Usb);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ScopeConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = ScopeConfig::default();
        config.capture.batch_count = 0;
        assert!(config.validate().is_err());

        let mut config = ScopeConfig::default();
        config.connection.serial.baud_rate = 0;
        assert!(config.validate().is_err());

        let mut config = ScopeConfig::default();
        config.capture.thumbnail_quality = 0;
        assert!(config.validate().is_err());
    }
}
