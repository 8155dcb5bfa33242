use crate::utils::error::WorkerError;
use anyhow::Result;
use mime_guess::mime;
use std::fs;
use std::path::Path;
use tracing::debug;

pub struct DocumentLoader;

impl DocumentLoader {
    /// Check whether the file can be text-extracted by the parser.
    pub fn is_supported(path: &Path) -> bool {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match extension.as_deref() {
            Some("pdf") | Some("txt") | Some("md") | Some("markdown") => true,
            _ => {
                // MIME fallback: any text/* file parses as plain text
                let mime = mime_guess::from_path(path).first();
                matches!(mime, Some(m) if m.type_() == mime::TEXT)
            }
        }
    }

    /// Validate the staged file before processing.
    pub fn validate_file(path: &Path, max_size_mb: u64) -> Result<()> {
        if !path.exists() {
            return Err(WorkerError::FileNotFound(path.display().to_string()).into());
        }

        if !Self::is_supported(path) {
            return Err(WorkerError::UnsupportedFileType(path.display().to_string()).into());
        }

        let metadata = fs::metadata(path)?;
        let size_mb = metadata.len() / 1024 / 1024;

        if size_mb > max_size_mb {
            return Err(WorkerError::FileTooLarge(size_mb, max_size_mb).into());
        }

        debug!("Validated file: {:?} ({} bytes)", path, metadata.len());

        Ok(())
    }
}
