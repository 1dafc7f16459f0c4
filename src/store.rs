use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::filesystem_store::FilesystemStore;
use crate::frame::Frame;
use crate::s3_store::S3Store;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

/// Durable storage of full frame content, addressed by frame ID.
///
/// All backends persist the gzip-JSON blob produced by
/// [`Frame::to_gzip_json`] and share the typed not-found / conflict
/// contract callers branch on.
#[async_trait]
pub trait FrameStore: Send + Sync {
    /// Persist a frame. Fails with [`Error::FrameAlreadyStored`] if the ID
    /// is already present.
    async fn save_frame(&self, frame: &Frame) -> Result<()>;

    /// Fetch a frame by ID. Fails with [`Error::FrameNotFound`] if absent.
    async fn get_frame(&self, id: &str) -> Result<Frame>;

    /// Delete a frame by ID. Fails with [`Error::FrameNotFound`] if absent;
    /// retries after a partial delete are therefore safe.
    async fn delete_frame(&self, id: &str) -> Result<()>;
}

/// Build a store backend from its typed configuration.
pub async fn from_config(config: &StoreConfig) -> Result<Box<dyn FrameStore>> {
    match config {
        StoreConfig::Memory => {
            info!(store = "memory", "Initialized frame store");

            Ok(Box::new(MemoryStore::new()))
        }
        StoreConfig::Filesystem { base_dir } => {
            info!(store = "filesystem", base_dir = %base_dir.display(), "Initialized frame store");

            Ok(Box::new(FilesystemStore::new(base_dir.clone()).await?))
        }
        StoreConfig::S3(s3_config) => {
            info!(store = "s3", bucket = %s3_config.bucket, "Initialized frame store");

            Ok(Box::new(S3Store::new(s3_config).await?))
        }
    }
}

/// Frame IDs become path and object-key components on the filesystem and
/// S3 backends. Anything outside the safe character set is rejected
/// outright: folding characters together would let two distinct IDs alias
/// the same key.
pub(crate) fn validate_id_component(id: &str) -> Result<()> {
    let safe = !id.is_empty()
        && id
            .chars()
            .all(|c| matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_'));

    if !safe {
        return Err(Error::InvalidId);
    }

    Ok(())
}

/// In-memory backend. Holds the compressed blobs in a mutex-guarded map;
/// the lock is only held for the map operation, never across encoding or
/// await points.
pub struct MemoryStore {
    frames: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameStore for MemoryStore {
    async fn save_frame(&self, frame: &Frame) -> Result<()> {
        let blob = frame.to_gzip_json()?;

        let mut frames = self.frames.lock();

        if frames.contains_key(&frame.metadata.id) {
            return Err(Error::FrameAlreadyStored);
        }

        frames.insert(frame.metadata.id.clone(), blob);

        debug!(id = %frame.metadata.id, "Saved frame to memory store");

        Ok(())
    }

    async fn get_frame(&self, id: &str) -> Result<Frame> {
        let blob = {
            let frames = self.frames.lock();

            frames.get(id).cloned().ok_or(Error::FrameNotFound)?
        };

        Frame::from_gzip_json(&blob)
    }

    async fn delete_frame(&self, id: &str) -> Result<()> {
        let mut frames = self.frames.lock();

        frames.remove(id).ok_or(Error::FrameNotFound)?;

        debug!(id = %id, "Deleted frame from memory store");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::fake_frame;

    #[tokio::test]
    async fn test_save_get_round_trip() {
        let store = MemoryStore::new();
        let frame = fake_frame();

        store.save_frame(&frame).await.unwrap();

        let fetched = store.get_frame(&frame.metadata.id).await.unwrap();
        assert_eq!(fetched, frame);
    }

    #[tokio::test]
    async fn test_duplicate_save_is_a_conflict() {
        let store = MemoryStore::new();
        let frame = fake_frame();

        store.save_frame(&frame).await.unwrap();

        let err = store.save_frame(&frame).await.unwrap_err();
        assert!(matches!(err, Error::FrameAlreadyStored));

        // The stored content is unchanged.
        let fetched = store.get_frame(&frame.metadata.id).await.unwrap();
        assert_eq!(fetched, frame);
    }

    #[tokio::test]
    async fn test_get_missing_frame_is_not_found() {
        let store = MemoryStore::new();

        let err = store.get_frame("nonexistent").await.unwrap_err();
        assert!(matches!(err, Error::FrameNotFound));
    }

    #[tokio::test]
    async fn test_delete_missing_frame_is_not_found() {
        let store = MemoryStore::new();

        let err = store.delete_frame("nonexistent").await.unwrap_err();
        assert!(matches!(err, Error::FrameNotFound));
    }

    #[tokio::test]
    async fn test_delete_removes_frame() {
        let store = MemoryStore::new();
        let frame = fake_frame();

        store.save_frame(&frame).await.unwrap();
        store.delete_frame(&frame.metadata.id).await.unwrap();

        let err = store.get_frame(&frame.metadata.id).await.unwrap_err();
        assert!(matches!(err, Error::FrameNotFound));
    }

    #[test]
    fn test_validate_id_component() {
        assert!(validate_id_component("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(matches!(
            validate_id_component("../etc/passwd"),
            Err(Error::InvalidId)
        ));
        assert!(matches!(
            validate_id_component("a.b"),
            Err(Error::InvalidId)
        ));
        assert!(matches!(validate_id_component(""), Err(Error::InvalidId)));
    }
}
