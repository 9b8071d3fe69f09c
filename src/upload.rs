//! Upload handling: persist the submitted bytes under the upload directory.
//!
//! Stored uploads land at `<upload_dir>/<YYYY>/<MM>/<random>.<ext>`. The
//! random name comes from `tempfile`, which creates the file exclusively, so
//! two submissions can never overwrite each other even with identical
//! filenames. A [`StoredUpload`] deletes its file when dropped unless it was
//! [kept](StoredUpload::keep): every failure before the debit commits leaves
//! nothing behind.

use crate::error::PrintError;
use crate::pipeline::classify::extension;
use chrono::{DateTime, Datelike, Local};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// A file as submitted by the client.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Original filename, used for classification and as the job title.
    pub filename: String,
    /// Declared content type, if the client sent one.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Read a local file as an upload.
    pub async fn from_path(path: &Path) -> Result<Self, PrintError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| PrintError::UploadFailed {
                filename: path.display().to_string(),
                source,
            })?;
        Ok(Self::new(filename, bytes))
    }
}

/// An upload persisted under the upload directory.
#[derive(Debug)]
pub struct StoredUpload {
    path: PathBuf,
    relative: String,
    keep: bool,
}

impl StoredUpload {
    /// Absolute location of the stored file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location relative to the upload directory, `/`-separated.
    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// Keep the file after this value is dropped.
    pub fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for StoredUpload {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed stored upload {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

/// Write `upload` to a fresh path under `upload_dir`.
pub async fn store(upload: &Upload, upload_dir: &Path) -> Result<StoredUpload, PrintError> {
    let bytes = upload.bytes.clone();
    let filename = upload.filename.clone();
    let dir = upload_dir.to_path_buf();
    tokio::task::spawn_blocking(move || store_blocking(&bytes, &filename, &dir, Local::now()))
        .await
        .map_err(|e| PrintError::Internal(format!("Upload task panicked: {e}")))?
}

/// Blocking implementation of [`store`], with the clock passed in.
pub fn store_blocking(
    bytes: &[u8],
    filename: &str,
    upload_dir: &Path,
    now: DateTime<Local>,
) -> Result<StoredUpload, PrintError> {
    let failed = |source: std::io::Error| PrintError::UploadFailed {
        filename: filename.to_string(),
        source,
    };

    let year = format!("{:04}", now.year());
    let month = format!("{:02}", now.month());
    let dir = upload_dir.join(&year).join(&month);
    std::fs::create_dir_all(&dir).map_err(failed)?;

    let mut file = tempfile::Builder::new()
        .prefix("")
        .suffix(&format!(".{}", safe_extension(filename)))
        .rand_bytes(16)
        .tempfile_in(&dir)
        .map_err(failed)?;
    file.write_all(bytes).map_err(failed)?;
    file.flush().map_err(failed)?;
    let (_, path) = file.keep().map_err(|e| failed(e.error))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let relative = format!("{year}/{month}/{name}");
    debug!("Stored upload {} as {}", filename, relative);

    Ok(StoredUpload {
        path,
        relative,
        keep: false,
    })
}

/// Write `upload` to a temporary file that disappears when dropped. Used by
/// dry-run estimates, which must not leave anything in the upload directory.
pub async fn stage(upload: &Upload, work_dir: Option<&Path>) -> Result<NamedTempFile, PrintError> {
    let bytes = upload.bytes.clone();
    let filename = upload.filename.clone();
    let dir = work_dir.map(Path::to_path_buf);
    tokio::task::spawn_blocking(move || {
        let failed = |source: std::io::Error| PrintError::UploadFailed {
            filename: filename.clone(),
            source,
        };
        let suffix = format!(".{}", safe_extension(&filename));
        let mut builder = tempfile::Builder::new();
        builder.prefix("printmeter-estimate-").suffix(&suffix);
        let mut file = match &dir {
            Some(d) => {
                std::fs::create_dir_all(d).map_err(failed)?;
                builder.tempfile_in(d)
            }
            None => builder.tempfile(),
        }
        .map_err(failed)?;
        file.write_all(&bytes).map_err(failed)?;
        file.flush().map_err(failed)?;
        Ok(file)
    })
    .await
    .map_err(|e| PrintError::Internal(format!("Upload task panicked: {e}")))?
}

/// Alphanumeric extension of at most 10 characters, or `bin`.
fn safe_extension(filename: &str) -> String {
    extension(filename)
        .filter(|e| e.len() <= 10 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}
