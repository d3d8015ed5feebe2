//! Clinical record types and the narrow store interface captures go through.
//!
//! The link and capture pipeline never write anywhere on their own; the
//! application hands a finished [`CapturedImage`] to [`save_capture`] with
//! whatever [`CaptureStore`] it was configured with.

use crate::error::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which eye a session or capture concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eye {
    #[allow(missing_docs)]
    Left,
    #[allow(missing_docs)]
    Right,
}

impl fmt::Display for Eye {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Left => "left",
            Self::Right => "right",
        })
    }
}

/// An eye name that is none of left/right/l/r/os/od.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown eye '{0}' (expected left, right, l, r, os or od)")]
pub struct ParseEyeError(pub String);

impl FromStr for Eye {
    type Err = ParseEyeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" | "l" | "os" => Ok(Self::Left),
            "right" | "r" | "od" => Ok(Self::Right),
            _ => Err(ParseEyeError(s.to_string())),
        }
    }
}

/// Kind of examination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionType {
    /// Scheduled check.
    Routine,
    /// Follow-up on an earlier finding.
    FollowUp,
    /// Unscheduled urgent visit.
    Emergency,
}

/// A patient as the record store knows them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub doctor: String,
}

/// One examination of one eye.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub patient_id: String,
    pub session_type: SessionType,
    pub eye: Eye,
    pub timestamp: DateTime<Utc>,
}

/// A stored capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capture {
    pub id: String,
    pub session_id: String,
    /// Full-resolution JPEG bytes.
    #[serde(skip)]
    pub image: Vec<u8>,
    /// Thumbnail JPEG bytes.
    #[serde(skip)]
    pub thumbnail: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

/// Metadata stamped on a photo once it is matched to a capture request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetadata {
    /// `capture_<unix-millis>_<9 base36 chars>`
    pub id: String,
    pub session_id: String,
    pub patient_id: String,
    pub eye: Eye,
    pub timestamp: DateTime<Utc>,
}

/// Result of one successful capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedImage {
    /// Base64 JPEG as received from the device.
    pub photo: String,
    /// Base64 JPEG thumbnail.
    pub thumbnail: String,
    pub metadata: CaptureMetadata,
}

/// Persistence seam for finished captures.
#[async_trait]
pub trait CaptureStore: Send + Sync {
    /// Persist one capture's image bytes.
    async fn add_capture(
        &self,
        id: &str,
        session_id: &str,
        image: Vec<u8>,
        thumbnail: Vec<u8>,
    ) -> Result<()>;
}

/// Decode both payloads of `image` and hand them to `store`.
pub async fn save_capture(store: &dyn CaptureStore, image: &CapturedImage) -> Result<()> {
    let photo = STANDARD.decode(image.photo.as_bytes())?;
    let thumbnail = STANDARD.decode(image.thumbnail.as_bytes())?;
    tracing::debug!(
        "Saving capture {} ({} + {} bytes)",
        image.metadata.id,
        photo.len(),
        thumbnail.len()
    );
    store
        .add_capture(
            &image.metadata.id,
            &image.metadata.session_id,
            photo,
            thumbnail,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScopeError;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<(String, String, Vec<u8>, Vec<u8>)>>,
    }

    #[async_trait]
    impl CaptureStore for MemoryStore {
        async fn add_capture(
            &self,
            id: &str,
            session_id: &str,
            image: Vec<u8>,
            thumbnail: Vec<u8>,
        ) -> Result<()> {
            self.saved
                .lock()
                .await
                .push((id.into(), session_id.into(), image, thumbnail));
            Ok(())
        }
    }

    fn sample(photo: &str) -> CapturedImage {
        CapturedImage {
            photo: photo.into(),
            thumbnail: STANDARD.encode([9u8, 8, 7]),
            metadata: CaptureMetadata {
                id: "capture_1_abc".into(),
                session_id: "s1".into(),
                patient_id: "p1".into(),
                eye: Eye::Left,
                timestamp: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn test_save_capture_decodes_payloads() {
        let store = MemoryStore::default();
        save_capture(&store, &sample(&STANDARD.encode([1u8, 2, 3])))
            .await
            .unwrap();
        let saved = store.saved.lock().await;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "capture_1_abc");
        assert_eq!(saved[0].1, "s1");
        assert_eq!(saved[0].2, vec![1, 2, 3]);
        assert_eq!(saved[0].3, vec![9, 8, 7]);
    }

    #[tokio::test]
    async fn test_save_capture_rejects_bad_base64() {
        let store = MemoryStore::default();
        let err = save_capture(&store, &sample("%%%")).await.unwrap_err();
        assert!(matches!(err, ScopeError::Payload(_)));
        assert!(store.saved.lock().await.is_empty());
    }

    #[test]
    fn test_record_serialization() {
        assert_eq!(
            serde_json::to_string(&SessionType::FollowUp).unwrap(),
            "\"followUp\""
        );
        assert_eq!(serde_json::to_string(&Eye::Right).unwrap(), "\"right\"");
        assert_eq!("L".parse::<Eye>().unwrap(), Eye::Left);
    }

    #[test]
    fn test_eye_parse() {
        assert_eq!("OD".parse::<Eye>().unwrap(), Eye::Right);
        assert_eq!("os".parse::<Eye>().unwrap(), Eye::Left);
        assert_eq!(
            "both".parse::<Eye>().unwrap_err(),
            ParseEyeError("both".to_string())
        );
    }
}
