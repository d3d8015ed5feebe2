//! On-disk capture store.
//!
//! Writes `<id>.jpg` and `<id>_thumb.jpg` into one directory, creating it on
//! first use.

use async_trait::async_trait;
use scope_core::records::CaptureStore;
use scope_core::{Result, ScopeError};
use std::path::{Path, PathBuf};
use tracing::info;

/// [`CaptureStore`] backed by a local directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the full-size image for `id`.
    #[must_use]
    pub fn image_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.jpg", id))
    }

    /// Path of the thumbnail for `id`.
    #[must_use]
    pub fn thumbnail_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}_thumb.jpg", id))
    }
}

fn checked_id(id: &str) -> Result<&str> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(id)
    } else {
        Err(ScopeError::Store(format!("invalid capture id '{}'", id)))
    }
}

#[async_trait]
impl CaptureStore for DirectoryStore {
    async fn add_capture(
        &self,
        id: &str,
        session_id: &str,
        image: Vec<u8>,
        thumbnail: Vec<u8>,
    ) -> Result<()> {
        let id = checked_id(id)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.image_path(id), &image).await?;
        tokio::fs::write(self.thumbnail_path(id), &thumbnail).await?;
        info!(
            "Stored capture {} for session {} in {}",
            id,
            session_id,
            self.root.display()
        );
        Ok(())
    }
}
