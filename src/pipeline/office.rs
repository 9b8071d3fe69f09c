//! Office documents: headless LibreOffice conversion to PDF.
//!
//! The converter runs with a private user profile inside the scoped work
//! directory, so concurrent conversions do not fight over the shared profile
//! lock. It is killed when the time budget runs out or when the future that
//! awaits it is dropped.

use crate::error::PrintError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Resolve the converter binary, honouring an explicit path.
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, PrintError> {
    office_locate::locate_soffice(explicit).map_err(|e| PrintError::ConverterNotFound {
        hint: e.to_string(),
    })
}

/// Convert `input` to PDF inside `workdir` and return the produced file.
pub async fn convert_to_pdf(
    soffice: &Path,
    input: &Path,
    workdir: &Path,
    timeout_secs: u64,
) -> Result<PathBuf, PrintError> {
    let out_dir = workdir.join("out");
    let profile = workdir.join("profile");
    for dir in [&out_dir, &profile] {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| conversion_failed(input, format!("create {}: {e}", dir.display())))?;
    }

    info!("Converting {} with {}", input.display(), soffice.display());
    let child = Command::new(soffice)
        .arg(format!("-env:UserInstallation=file://{}", profile.display()))
        .arg("--headless")
        .arg("--norestore")
        .arg("--convert-to")
        .arg("pdf")
        .arg("--outdir")
        .arg(&out_dir)
        .arg(input)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| conversion_failed(input, format!("failed to start {}: {e}", soffice.display())))?;

    let output = match tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        child.wait_with_output(),
    )
    .await
    {
        Ok(result) => result.map_err(|e| conversion_failed(input, e.to_string()))?,
        Err(_) => {
            warn!("Conversion of {} timed out after {}s", input.display(), timeout_secs);
            return Err(PrintError::ConversionTimeout { secs: timeout_secs });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(conversion_failed(
            input,
            format!("converter exited with {}: {}", output.status, tail(&stderr, 512)),
        ));
    }

    find_output(input, &out_dir)
}

/// `<stem>.pdf` if present, otherwise the first `*.pdf` in sorted order.
fn find_output(input: &Path, out_dir: &Path) -> Result<PathBuf, PrintError> {
    if let Some(stem) = input.file_stem() {
        let mut expected = stem.to_os_string();
        expected.push(".pdf");
        let expected = out_dir.join(expected);
        if expected.is_file() {
            debug!("Converter output at {}", expected.display());
            return Ok(expected);
        }
    }

    let entries = std::fs::read_dir(out_dir)
        .map_err(|e| conversion_failed(input, format!("read {}: {e}", out_dir.display())))?;
    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    found.sort();

    match found.len() {
        0 => Err(conversion_failed(input, "converter produced no PDF".into())),
        1 => Ok(found.remove(0)),
        n => {
            warn!(
                "Converter produced {} PDFs for {}, using {}",
                n,
                input.display(),
                found[0].display()
            );
            Ok(found.remove(0))
        }
    }
}

fn tail(s: &str, max: usize) -> &str {
    let s = s.trim();
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

fn conversion_failed(path: &Path, detail: String) -> PrintError {
    PrintError::ConversionFailed {
        path: path.to_path_buf(),
        detail,
    }
}
