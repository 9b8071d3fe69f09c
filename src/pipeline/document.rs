//! Turn a classified upload into something printable with a page count.

use super::{classify, office, pdf, raster, text, FileKind};
use crate::config::PrintConfig;
use crate::error::PrintError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

pub const PDF_MIME: &str = "application/pdf";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// A document ready for billing and dispatch.
///
/// Intermediate files live in a work directory owned by this value and are
/// removed when it is dropped.
#[derive(Debug)]
pub struct PreparedDocument {
    pub kind: FileKind,
    /// Billable pages, never below 1.
    pub pages: u32,
    /// True when `pages` comes from a heuristic rather than document structure.
    pub estimated: bool,
    /// The file to hand to the printer.
    pub print_path: PathBuf,
    pub mime: String,
    workdir: Option<TempDir>,
}

impl PreparedDocument {
    /// Scoped work directory, if conversion needed one.
    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_ref().map(|d| d.path())
    }
}

/// Prepare the upload at `path` according to `kind`.
///
/// `declared_mime` is the content type the client sent; it is only used for
/// files that pass through unconverted.
pub async fn prepare(
    kind: FileKind,
    path: &Path,
    declared_mime: Option<&str>,
    config: &PrintConfig,
) -> Result<PreparedDocument, PrintError> {
    let doc = match kind {
        FileKind::Pdf => PreparedDocument {
            kind,
            pages: pdf::page_count(path).await?,
            estimated: false,
            print_path: path.to_path_buf(),
            mime: PDF_MIME.into(),
            workdir: None,
        },
        FileKind::Office => {
            let workdir = scratch(config, path)?;
            let soffice = office::locate(config.soffice_path.as_deref())?;
            let out = office::convert_to_pdf(
                &soffice,
                path,
                workdir.path(),
                config.convert_timeout_secs,
            )
            .await?;
            PreparedDocument {
                kind,
                pages: pdf::page_count(&out).await?,
                estimated: false,
                print_path: out,
                mime: PDF_MIME.into(),
                workdir: Some(workdir),
            }
        }
        FileKind::Image => {
            let workdir = scratch(config, path)?;
            let out = workdir.path().join("image.pdf");
            let (input, target) = (path.to_path_buf(), out.clone());
            tokio::task::spawn_blocking(move || raster::image_to_pdf(&input, &target))
                .await
                .map_err(|e| PrintError::Internal(format!("Image task panicked: {e}")))??;
            PreparedDocument {
                kind,
                pages: 1,
                estimated: false,
                print_path: out,
                mime: PDF_MIME.into(),
                workdir: Some(workdir),
            }
        }
        FileKind::Text => {
            let workdir = scratch(config, path)?;
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| PrintError::PageCountFailed {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                })?;
            let layout = text::TextLayout {
                chars_per_line: config.text_chars_per_line,
                lines_per_page: config.text_lines_per_page,
            };
            let out = workdir.path().join("text.pdf");
            let target = out.clone();
            let pages = tokio::task::spawn_blocking(move || {
                let laid_out = text::paginate(&String::from_utf8_lossy(&bytes), layout);
                text::render_pdf(&laid_out, &target).map(|()| laid_out.len())
            })
            .await
            .map_err(|e| PrintError::Internal(format!("Text task panicked: {e}")))??;
            PreparedDocument {
                kind,
                pages: u32::try_from(pages).unwrap_or(u32::MAX),
                estimated: true,
                print_path: out,
                mime: PDF_MIME.into(),
                workdir: Some(workdir),
            }
        }
        FileKind::Unknown => {
            let probed = pdf::probe_pages(path).await;
            let declared = declared_mime
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string);
            let mime = match declared {
                Some(mime) => mime,
                None => sniffed_mime(path)
                    .await
                    .unwrap_or_else(|| OCTET_STREAM.to_string()),
            };
            PreparedDocument {
                kind,
                pages: probed.unwrap_or(1),
                estimated: probed.is_none(),
                print_path: path.to_path_buf(),
                mime,
                workdir: None,
            }
        }
    };

    let doc = PreparedDocument {
        pages: doc.pages.max(1),
        ..doc
    };
    info!(
        kind = %doc.kind,
        pages = doc.pages,
        estimated = doc.estimated,
        "Prepared {}",
        path.display()
    );
    Ok(doc)
}

fn scratch(config: &PrintConfig, input: &Path) -> Result<TempDir, PrintError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("printmeter-");
    let made = match &config.work_dir {
        Some(parent) => std::fs::create_dir_all(parent).and_then(|()| builder.tempdir_in(parent)),
        None => builder.tempdir(),
    };
    let dir = made.map_err(|source| PrintError::UploadFailed {
        filename: input.display().to_string(),
        source,
    })?;
    debug!("Work directory {}", dir.path().display());
    Ok(dir)
}

async fn sniffed_mime(path: &Path) -> Option<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let head = classify::read_head(&path).ok()?;
        classify::sniff_mime(&head).map(str::to_string)
    })
    .await
    .ok()
    .flatten()
}
