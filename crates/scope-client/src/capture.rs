//! Single-photo capture workflow.
//!
//! A capture reserves the client's photo slot, sends `CAPTURE_PHOTO` and
//! waits for the matching `PHOTO` under a deadline. The slot is released on
//! every exit path (success, timeout, send failure) because the reservation
//! is an RAII guard.

use crate::client::ScopeClient;
use crate::thumbnail::{generate_thumbnail, ThumbnailSpec};
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use scope_core::records::{CaptureMetadata, CapturedImage, Eye};
use scope_core::{Result, ScopeError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

/// How long a capture waits for its photo.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Callback invoked with every successful capture.
pub type CaptureListener = Arc<dyn Fn(&CapturedImage) + Send + Sync>;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `capture_<unix-millis>_<9 base36 chars>`
#[must_use]
pub fn new_capture_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| char::from(ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())]))
        .collect();
    format!("capture_{}_{}", Utc::now().timestamp_millis(), suffix)
}

/// Takes photos through a shared [`ScopeClient`].
pub struct CaptureWorkflow {
    client: Arc<ScopeClient>,
    timeout: Duration,
    thumbnail: ThumbnailSpec,
    listener: Mutex<Option<CaptureListener>>,
}

impl CaptureWorkflow {
    #[must_use]
    pub fn new(client: Arc<ScopeClient>) -> Self {
        Self {
            client,
            timeout: DEFAULT_CAPTURE_TIMEOUT,
            thumbnail: ThumbnailSpec::default(),
            listener: Mutex::new(None),
        }
    }

    /// Override the photo deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override thumbnail bounds.
    #[must_use]
    pub fn with_thumbnail(mut self, spec: ThumbnailSpec) -> Self {
        self.thumbnail = spec;
        self
    }

    /// Install or clear the capture-complete listener.
    pub fn set_capture_complete_handler(&self, listener: Option<CaptureListener>) {
        *self.listener.lock() = listener;
    }

    #[must_use]
    pub fn client(&self) -> &Arc<ScopeClient> {
        &self.client
    }

    /// Take one photo and stamp it with capture metadata.
    pub async fn capture(&self, session_id: &str, patient_id: &str, eye: Eye) -> Result<CapturedImage> {
        let mut waiter = self.client.await_photo()?;
        let deadline = Instant::now() + self.timeout;

        self.client.capture_photo().await?;

        let photo = match timeout_at(deadline, waiter.recv()).await {
            Ok(photo) => photo?,
            Err(_) => {
                warn!("No photo within {:?}", self.timeout);
                return Err(ScopeError::CaptureTimeout(self.timeout));
            }
        };
        drop(waiter);

        let thumbnail = generate_thumbnail(&photo, self.thumbnail)?;
        let metadata = CaptureMetadata {
            id: new_capture_id(),
            session_id: session_id.to_string(),
            patient_id: patient_id.to_string(),
            eye,
            timestamp: Utc::now(),
        };
        info!("Captured {} ({} eye, session {})", metadata.id, eye, session_id);

        let image = CapturedImage {
            photo,
            thumbnail,
            metadata,
        };
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(&image);
        }
        Ok(image)
    }

    /// Wait `seconds`, then [`capture`](Self::capture).
    pub async fn capture_with_timer(
        &self,
        session_id: &str,
        patient_id: &str,
        eye: Eye,
        seconds: u64,
    ) -> Result<CapturedImage> {
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        self.capture(session_id, patient_id, eye).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_id_format() {
        let id = new_capture_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "capture");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(new_capture_id(), new_capture_id());
    }
}
