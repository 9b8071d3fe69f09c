//! Page counting from PDF structure.
//!
//! Uses `lopdf` to walk the page tree; nothing is rendered. Parsing is
//! CPU-bound and synchronous, so the async entry point moves it onto the
//! blocking pool.

use crate::error::PrintError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Count the pages of the PDF at `path`.
pub async fn page_count(path: &Path) -> Result<u32, PrintError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || count_pages(&owned))
        .await
        .map_err(|e| PrintError::Internal(format!("Page count task panicked: {e}")))?
}

/// Blocking page count.
pub fn count_pages(path: &Path) -> Result<u32, PrintError> {
    let doc = lopdf::Document::load(path).map_err(|e| page_count_failed(path, e.to_string()))?;
    let pages = doc.get_pages().len();
    debug!("{} has {} pages", path.display(), pages);
    u32::try_from(pages).map_err(|_| page_count_failed(path, format!("{pages} pages")))
}

/// Best-effort page count for files of unknown type. `None` if the file is
/// not a readable PDF.
pub async fn probe_pages(path: &Path) -> Option<u32> {
    let owned: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || count_pages(&owned).ok())
        .await
        .ok()
        .flatten()
        .filter(|&n| n > 0)
}

fn page_count_failed(path: &Path, detail: String) -> PrintError {
    PrintError::PageCountFailed {
        path: path.to_path_buf(),
        detail,
    }
}
