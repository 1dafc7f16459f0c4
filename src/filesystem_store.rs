use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::store::{validate_id_component, FrameStore};
use anyhow::Context;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filesystem backend: one gzipped JSON file per frame ID under
/// `<base_dir>/frames/`.
pub struct FilesystemStore {
    base_dir: PathBuf,
}

impl FilesystemStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(base_dir.join("frames"))
            .await
            .context("failed to create frame store base directory")?;

        Ok(Self { base_dir })
    }

    fn frame_path(&self, id: &str) -> PathBuf {
        self.base_dir.join("frames").join(format!("{}.json.gz", id))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[async_trait]
impl FrameStore for FilesystemStore {
    async fn save_frame(&self, frame: &Frame) -> Result<()> {
        validate_id_component(&frame.metadata.id)?;

        let path = self.frame_path(&frame.metadata.id);

        match tokio::fs::try_exists(&path).await {
            Ok(true) => return Err(Error::FrameAlreadyStored),
            Ok(false) => {}
            Err(err) => return Err(Error::internal("failed to stat frame file", err)),
        }

        let blob = frame.to_gzip_json()?;

        tokio::fs::write(&path, blob)
            .await
            .context("failed to write frame file")?;

        debug!(id = %frame.metadata.id, path = %path.display(), "Saved frame to filesystem store");

        Ok(())
    }

    async fn get_frame(&self, id: &str) -> Result<Frame> {
        validate_id_component(id)?;

        let path = self.frame_path(id);

        let blob = match tokio::fs::read(&path).await {
            Ok(blob) => blob,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(Error::FrameNotFound),
            Err(err) => return Err(Error::internal("failed to read frame file", err)),
        };

        Frame::from_gzip_json(&blob)
    }

    async fn delete_frame(&self, id: &str) -> Result<()> {
        validate_id_component(id)?;

        let path = self.frame_path(id);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(id = %id, "Deleted frame from filesystem store");

                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Error::FrameNotFound),
            Err(err) => Err(Error::internal("failed to delete frame file", err)),
        }
    }
}
