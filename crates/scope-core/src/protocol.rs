//! Newline-delimited JSON line protocol spoken by the scope microcontroller.
//!
//! # Wire Format
//!
//! Host → device, one object per line:
//!
//! ```text
//! {"cmd":"SET_BRIGHTNESS","params":{"level":40}}
//! ```
//!
//! Device → host, one object per line:
//!
//! ```text
//! {"type":"TELEMETRY","fps":30,"battery":91.2,"connectionStatus":"connected","timestamp":1718000000000}
//! {"type":"VIDEO_FRAME","data":"<base64 jpeg>","timestamp":1718000000033}
//! ```
//!
//! Image payloads in `data` are base64 JPEG bytes by convention; nothing on
//! the wire says so.
//!
//! Decoding never fails loudly. A line that is not JSON, is truncated, carries
//! an unknown `type` or lacks a required payload decodes to `None` and the
//! caller simply skips it.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Link state owned by the active transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// Enumerating devices.
    Scanning,
    /// Opening the device.
    Connecting,
    /// Device open, handshake sent, waiting for it to settle.
    Handshaking,
    /// Link up, idle.
    Ready,
    /// Link up, video frames flowing.
    Streaming,
    /// Link failed.
    Error,
}

impl ConnectionState {
    /// Short label for status displays.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Scanning => "Scanning...",
            Self::Connecting => "Connecting...",
            Self::Handshaking => "Handshaking...",
            Self::Ready => "Ready",
            Self::Streaming => "Streaming",
            Self::Error => "Error",
        }
    }

    /// Returns true once the handshake has completed and the link is usable.
    #[must_use]
    pub fn is_link_up(&self) -> bool {
        matches!(self, Self::Ready | Self::Streaming)
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Encodes the progression every transport follows:
    /// `{Connecting|Scanning} -> Handshaking -> Ready <-> Streaming -> Disconnected`,
    /// with `Error` reachable from anywhere and `Disconnected` reachable from
    /// anywhere (teardown).
    #[must_use]
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Error) | (_, Disconnected) => true,
            (Disconnected | Error, Scanning | Connecting) => true,
            (Scanning, Connecting | Handshaking) => true,
            (Connecting, Handshaking) => true,
            (Handshaking, Ready) => true,
            (Ready, Streaming) | (Streaming, Ready) => true,
            // STREAM_STOP while idle re-announces Ready
            (Ready, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Streaming => "streaming",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Command names understood by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    /// Link-level handshake sent by transports right after opening.
    Handshake,
    /// Begin the video feed.
    StreamStart,
    /// End the video feed.
    StreamStop,
    /// Take one full-resolution still.
    CapturePhoto,
    /// Set illumination level.
    SetBrightness,
    /// Set focus position.
    SetFocus,
}

/// One outbound command. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    cmd: CommandType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<BTreeMap<String, Value>>,
}

impl Command {
    /// Bare command without parameters.
    #[must_use]
    pub fn new(cmd: CommandType) -> Self {
        Self { cmd, params: None }
    }

    /// Command with a parameter map.
    #[must_use]
    pub fn with_params<I, K>(cmd: CommandType, params: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            cmd,
            params: Some(params.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    /// `HANDSHAKE`
    #[must_use]
    pub fn handshake() -> Self {
        Self::new(CommandType::Handshake)
    }

    /// `STREAM_START {fps, res}`
    #[must_use]
    pub fn stream_start(fps: u32, resolution: &str) -> Self {
        Self::with_params(
            CommandType::StreamStart,
            [("fps", Value::from(fps)), ("res", Value::from(resolution))],
        )
    }

    /// `STREAM_STOP`
    #[must_use]
    pub fn stream_stop() -> Self {
        Self::new(CommandType::StreamStop)
    }

    /// `CAPTURE_PHOTO`
    #[must_use]
    pub fn capture_photo() -> Self {
        Self::new(CommandType::CapturePhoto)
    }

    /// `SET_BRIGHTNESS {level}`
    #[must_use]
    pub fn set_brightness(level: f64) -> Self {
        Self::with_params(CommandType::SetBrightness, [("level", Value::from(level))])
    }

    /// `SET_FOCUS {value}`
    #[must_use]
    pub fn set_focus(value: f64) -> Self {
        Self::with_params(CommandType::SetFocus, [("value", Value::from(value))])
    }

    /// Command name.
    #[must_use]
    pub fn kind(&self) -> CommandType {
        self.cmd
    }

    /// Parameter lookup.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|p| p.get(name))
    }

    /// All parameters, if any were given.
    #[must_use]
    pub fn params(&self) -> Option<&BTreeMap<String, Value>> {
        self.params.as_ref()
    }
}

/// Messages the device sends to the host.
///
/// Serialized with an internal `type` tag so the variant fields sit flat
/// alongside it, exactly as the firmware emits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    /// One frame of the live feed.
    VideoFrame {
        /// Base64 JPEG.
        data: String,
        /// Device clock, milliseconds.
        #[serde(
            default,
            deserialize_with = "lenient_count",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<u64>,
    },
    /// Full-resolution still answering `CAPTURE_PHOTO`.
    Photo {
        /// Base64 JPEG.
        data: String,
        /// Payload length as reported by the device.
        #[serde(
            default,
            deserialize_with = "lenient_count",
            skip_serializing_if = "Option::is_none"
        )]
        size: Option<u64>,
        /// Device clock, milliseconds.
        #[serde(
            default,
            deserialize_with = "lenient_count",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<u64>,
    },
    /// Periodic health report.
    Telemetry {
        /// Current frame rate.
        #[serde(default, deserialize_with = "number_or_zero")]
        fps: f64,
        /// Battery percentage.
        #[serde(default, deserialize_with = "number_or_zero")]
        battery: f64,
        /// Free-form link status from the firmware.
        #[serde(
            rename = "connectionStatus",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        connection_status: Option<String>,
        /// Device clock, milliseconds.
        #[serde(
            default,
            deserialize_with = "lenient_count",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<u64>,
    },
    /// Answer to `HANDSHAKE`.
    HandshakeAck {
        /// Device clock, milliseconds.
        #[serde(
            default,
            deserialize_with = "lenient_count",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<u64>,
    },
    /// Firmware-reported fault.
    Error {
        /// Fault description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Device clock, milliseconds.
        #[serde(
            default,
            deserialize_with = "lenient_count",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<u64>,
    },
}

/// Any JSON number (or `null`) as a whole count. Firmware builds disagree on
/// whether clocks and sizes are integers.
fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64))
}

/// A JSON number, with `null` read as zero.
fn number_or_zero<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

impl InboundMessage {
    /// Wire tag of this message, for logging.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::VideoFrame { .. } => "VIDEO_FRAME",
            Self::Photo { .. } => "PHOTO",
            Self::Telemetry { .. } => "TELEMETRY",
            Self::HandshakeAck { .. } => "HANDSHAKE_ACK",
            Self::Error { .. } => "ERROR",
        }
    }
}

/// Last-known device health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Frames per second reported by the device.
    pub fps: f64,
    /// Battery percentage.
    pub battery: f64,
    /// Status string reported by the device.
    pub connection_status: String,
    /// Host time the snapshot was taken, `None` before the first report.
    pub last_update: Option<DateTime<Utc>>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            fps: 0.0,
            battery: 0.0,
            connection_status: "disconnected".to_string(),
            last_update: None,
        }
    }
}

impl Telemetry {
    /// Build a snapshot from a TELEMETRY message's fields.
    #[must_use]
    pub fn from_report(fps: f64, battery: f64, connection_status: Option<&str>) -> Self {
        Self {
            fps,
            battery,
            connection_status: connection_status.unwrap_or("unknown").to_string(),
            last_update: Some(Utc::now()),
        }
    }
}

/// Serialize a command to one protocol line, newline included.
pub fn encode_command(command: &Command) -> Result<String> {
    let mut line = serde_json::to_string(command)?;
    line.push('\n');
    Ok(line)
}

/// Parse one device line. Returns `None` for anything malformed.
#[must_use]
pub fn decode_message(line: &str) -> Option<InboundMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::trace!("Dropping undecodable line ({}): {:.64}", e, trimmed);
            None
        }
    }
}

/// Device-side dual of [`encode_command`]: serialize a message to one line.
pub fn encode_message(message: &InboundMessage) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Device-side dual of [`decode_message`]: parse a host command line.
#[must_use]
pub fn decode_command(line: &str) -> Option<Command> {
    serde_json::from_str(line.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_command_single_line() {
        let line = encode_command(&Command::set_brightness(40.0)).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let parsed: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed, json!({"cmd": "SET_BRIGHTNESS", "params": {"level": 40.0}}));
    }

    #[test]
    fn test_bare_command_omits_params() {
        let line = encode_command(&Command::handshake()).unwrap();
        assert_eq!(line, "{\"cmd\":\"HANDSHAKE\"}\n");
    }

    #[test]
    fn test_param_with_newline_stays_escaped() {
        let cmd = Command::with_params(CommandType::SetFocus, [("note", Value::from("a\nb"))]);
        let line = encode_command(&cmd).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode_command(&line), Some(cmd));
    }

    #[test]
    fn test_decode_telemetry_fields() {
        let msg = decode_message(
            r#"  {"type":"TELEMETRY","fps":30,"battery":88.5,"connectionStatus":"connected","timestamp":12}  "#,
        )
        .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Telemetry {
                fps: 30.0,
                battery: 88.5,
                connection_status: Some("connected".into()),
                timestamp: Some(12),
            }
        );
    }

    #[test]
    fn test_decode_telemetry_missing_fields_default() {
        let msg = decode_message(r#"{"type":"TELEMETRY"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Telemetry {
                fps: 0.0,
                battery: 0.0,
                connection_status: None,
                timestamp: None,
            }
        );
    }

    #[test]
    fn test_decode_accepts_fractional_and_null_numbers() {
        assert_eq!(
            decode_message(r#"{"type":"TELEMETRY","fps":30,"battery":90,"timestamp":1718000000000.5}"#),
            Some(InboundMessage::Telemetry {
                fps: 30.0,
                battery: 90.0,
                connection_status: None,
                timestamp: Some(1_718_000_000_000),
            })
        );
        assert_eq!(
            decode_message(r#"{"type":"TELEMETRY","fps":null,"battery":90}"#),
            Some(InboundMessage::Telemetry {
                fps: 0.0,
                battery: 90.0,
                connection_status: None,
                timestamp: None,
            })
        );
        assert_eq!(
            decode_message(r#"{"type":"VIDEO_FRAME","data":"QUJD","timestamp":12.25}"#),
            Some(InboundMessage::VideoFrame {
                data: "QUJD".into(),
                timestamp: Some(12),
            })
        );
        assert_eq!(
            decode_message(r#"{"type":"PHOTO","data":"QUJD","size":4.0,"timestamp":null}"#),
            Some(InboundMessage::Photo {
                data: "QUJD".into(),
                size: Some(4),
                timestamp: None,
            })
        );
    }

    #[test]
    fn test_decode_error_message() {
        let msg = decode_message(r#"{"type":"ERROR","error":"sensor overheat"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Error {
                error: Some("sensor overheat".into()),
                timestamp: None
            }
        );
        assert_eq!(msg.type_name(), "ERROR");
    }

    #[test]
    fn test_decode_malformed_lines() {
        for line in [
            "",
            "   ",
            "not json",
            "{\"type\":\"TELEMETRY\"",
            "{\"type\":\"UNKNOWN\"}",
            "{\"data\":\"abc\"}",
            "{\"type\":\"PHOTO\"}",
            "[1,2,3]",
        ] {
            assert_eq!(decode_message(line), None, "line {:?} should be dropped", line);
        }
    }

    #[test]
    fn test_message_roundtrip() {
        let messages = [
            InboundMessage::VideoFrame {
                data: "AAAA".into(),
                timestamp: Some(5),
            },
            InboundMessage::Photo {
                data: "BBBB".into(),
                size: Some(4),
                timestamp: None,
            },
            InboundMessage::HandshakeAck { timestamp: Some(1) },
        ];
        for msg in messages {
            let line = encode_message(&msg).unwrap();
            assert_eq!(decode_message(&line), Some(msg));
        }
    }

    #[test]
    fn test_transition_rules() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Handshaking));
        assert!(Handshaking.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Ready));
        assert!(Streaming.can_transition_to(Error));
        assert!(Handshaking.can_transition_to(Disconnected));
        assert!(!Connecting.can_transition_to(Ready));
        assert!(!Disconnected.can_transition_to(Streaming));
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Handshaking).unwrap(),
            "\"handshaking\""
        );
        assert_eq!(ConnectionState::Streaming.to_string(), "streaming");
        assert!(ConnectionState::Streaming.is_link_up());
        assert!(!ConnectionState::Handshaking.is_link_up());
    }
}
