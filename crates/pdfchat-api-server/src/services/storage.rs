use anyhow::Result;
use pdfchat_core::collection::sanitize_component;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Staging storage for raw upload bytes. The staged path is recorded on the
/// document row and carried in the ingest job, so the worker (and the
/// reconciliation sweep) can load the bytes independently of the request.
pub struct UploadStorage {
    root: PathBuf,
}

impl UploadStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Unique staged location for one upload.
    pub fn staged_path(&self, chat_id: i32, file_name: &str) -> String {
        let safe_name = sanitize_component(file_name);
        self.root
            .join(format!("chat_{}", chat_id))
            .join(format!("{}_{}", Uuid::new_v4(), safe_name))
            .to_string_lossy()
            .into_owned()
    }

    pub async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = Path::new(path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(path, data).await?;
        debug!("Staged {} bytes at {:?}", data.len(), path);

        Ok(())
    }
}
