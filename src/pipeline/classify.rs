//! Format classification: pick the conversion path for an upload.
//!
//! The filename extension wins when it is recognised; otherwise the first
//! bytes of the content decide. Classification never fails. Anything that is
//! not recognisable ends up as [`FileKind::Unknown`] and is passed through to
//! the printer untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// How many leading bytes are inspected for content sniffing.
pub const SNIFF_LEN: usize = 8 * 1024;

const OFFICE_EXTS: &[&str] = &[
    "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "rtf",
];
const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];
const TEXT_EXTS: &[&str] = &["txt", "text", "log", "csv", "md"];

/// The conversion path an upload takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Office,
    Image,
    Text,
    Unknown,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Office => "office",
            FileKind::Image => "image",
            FileKind::Text => "text",
            FileKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased extension of `filename`, if any.
pub fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// Classify from the original filename and the first bytes of the content.
pub fn classify(head: &[u8], filename: &str) -> FileKind {
    if let Some(kind) = extension(filename).and_then(|ext| by_extension(&ext)) {
        debug!(filename, %kind, "Classified by extension");
        return kind;
    }
    let kind = by_content(head);
    debug!(filename, %kind, "Classified by content");
    kind
}

/// Classify a file on disk, reading at most [`SNIFF_LEN`] bytes. An
/// unreadable file is [`FileKind::Unknown`].
pub fn classify_file(path: &Path, filename: &str) -> FileKind {
    match read_head(path) {
        Ok(head) => classify(&head, filename),
        Err(e) => {
            debug!(path = %path.display(), filename, error = %e, "Unreadable upload");
            FileKind::Unknown
        }
    }
}

pub(crate) fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    Ok(head)
}

fn by_extension(ext: &str) -> Option<FileKind> {
    if ext == "pdf" {
        Some(FileKind::Pdf)
    } else if OFFICE_EXTS.contains(&ext) {
        Some(FileKind::Office)
    } else if IMAGE_EXTS.contains(&ext) {
        Some(FileKind::Image)
    } else if TEXT_EXTS.contains(&ext) {
        Some(FileKind::Text)
    } else {
        None
    }
}

fn by_content(head: &[u8]) -> FileKind {
    if let Some(kind) = infer::get(head) {
        let mime = kind.mime_type();
        if mime == "application/pdf" {
            return FileKind::Pdf;
        }
        if mime.starts_with("image/") {
            return FileKind::Image;
        }
        if is_office_mime(mime) {
            return FileKind::Office;
        }
    }
    if head.starts_with(b"{\\rtf") {
        return FileKind::Office;
    }
    if looks_like_text(head) {
        return FileKind::Text;
    }
    FileKind::Unknown
}

/// MIME type sniffed from content, if recognisable.
pub fn sniff_mime(head: &[u8]) -> Option<&'static str> {
    infer::get(head).map(|t| t.mime_type())
}

fn is_office_mime(mime: &str) -> bool {
    mime == "application/msword"
        || mime == "application/rtf"
        || mime == "text/rtf"
        || mime.starts_with("application/vnd.ms-")
        || mime.starts_with("application/vnd.openxmlformats-officedocument.")
        || mime.starts_with("application/vnd.oasis.opendocument.")
}

/// Valid UTF-8 without NUL bytes. The head may cut a multi-byte character
/// in half; an incomplete trailing sequence is accepted.
fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && head.len() >= SNIFF_LEN,
    }
}
