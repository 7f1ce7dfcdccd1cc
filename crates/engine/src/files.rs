//! Disk-backed file store: metadata in the repository, blobs in a flat
//! content directory keyed by file id.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use db::repository::files;
use db::{DbError, DbPool};
use nodes::traits::{FileStore, StoredFile};
use nodes::NodeError;

pub struct DiskFileStore {
    pool: DbPool,
    root: PathBuf,
}

impl DiskFileStore {
    pub fn new(pool: DbPool, root: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist an uploaded blob under the content root, keyed by file id.
    /// Returns the stored path for the metadata row.
    pub async fn save(&self, file_id: Uuid, bytes: &[u8]) -> Result<PathBuf, std::io::Error> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(format!("{file_id}.pdf"));
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

#[async_trait]
impl FileStore for DiskFileStore {
    async fn load(&self, file_id: Uuid) -> Result<StoredFile, NodeError> {
        let row = files::get_file(&self.pool, file_id).await.map_err(|e| match e {
            DbError::NotFound => NodeError::NotFound(format!("File {file_id} not found")),
            other => NodeError::Internal(other.to_string()),
        })?;

        let bytes = tokio::fs::read(&row.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NodeError::NotFound(format!("stored blob for file {file_id} is missing"))
            } else {
                NodeError::Internal(format!("failed to read stored file: {e}"))
            }
        })?;

        Ok(StoredFile {
            filename: row.filename,
            mime_type: row.mime_type,
            size_bytes: row.size_bytes,
            bytes,
        })
    }
}
