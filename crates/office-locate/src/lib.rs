//! # office-locate
//!
//! Find a LibreOffice binary capable of `--headless --convert-to pdf`, so
//! that callers do not have to hard-code `soffice` and hope it is on `PATH`.
//!
//! ## Resolution order
//!
//! 1. An explicit path handed to [`locate_soffice`] (must exist).
//! 2. The `PRINTMETER_SOFFICE` environment variable (must exist).
//! 3. `soffice` / `libreoffice` on `PATH`.
//! 4. Well-known install locations for the current platform.
//!
//! Steps 3 and 4 are cached for the lifetime of the process; the explicit and
//! environment overrides are re-checked on every call.
//!
//! ## Platform support
//!
//! | OS      | Binary names               | Install locations checked                                   |
//! |---------|----------------------------|-------------------------------------------------------------|
//! | Linux   | `soffice`, `libreoffice`   | `/usr/bin`, `/usr/local/bin`, `/opt/libreoffice*/program`, `/snap/bin` |
//! | macOS   | `soffice`                  | `/Applications/LibreOffice.app`, `~/Applications/LibreOffice.app` |
//! | Windows | `soffice.exe`              | `%ProgramFiles%\LibreOffice\program`                         |

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Environment variable that points at a specific converter binary.
pub const ENV_OVERRIDE: &str = "PRINTMETER_SOFFICE";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by office-locate operations.
#[derive(Error, Debug)]
pub enum LocateError {
    /// An explicit path or the env override names a file that does not exist.
    #[error("LibreOffice binary '{path}' does not exist")]
    Missing { path: PathBuf },

    /// No candidate was found on `PATH` or in the platform install locations.
    #[error(
        "LibreOffice was not found (searched PATH and {} install locations).\n\
Install LibreOffice or set PRINTMETER_SOFFICE=/path/to/soffice.",
        .searched.len()
    )]
    NotFound { searched: Vec<PathBuf> },
}

// ── Internal: platform metadata ──────────────────────────────────────────────

struct PlatformInfo {
    /// Executable names to look for on `PATH`, in preference order.
    binary_names: &'static [&'static str],
    /// Absolute install locations of the binary.
    install_paths: Vec<PathBuf>,
}

fn detect_platform() -> PlatformInfo {
    match std::env::consts::OS {
        "macos" => {
            let mut install_paths = vec![PathBuf::from(
                "/Applications/LibreOffice.app/Contents/MacOS/soffice",
            )];
            if let Some(home) = dirs::home_dir() {
                install_paths.push(home.join("Applications/LibreOffice.app/Contents/MacOS/soffice"));
            }
            PlatformInfo {
                binary_names: &["soffice"],
                install_paths,
            }
        }
        "windows" => {
            let program_files = std::env::var_os("ProgramFiles")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(r"C:\Program Files"));
            PlatformInfo {
                binary_names: &["soffice.exe", "soffice.com"],
                install_paths: vec![program_files.join(r"LibreOffice\program\soffice.exe")],
            }
        }
        _ => {
            let mut install_paths = vec![
                PathBuf::from("/usr/bin/soffice"),
                PathBuf::from("/usr/local/bin/soffice"),
                PathBuf::from("/usr/lib/libreoffice/program/soffice"),
                PathBuf::from("/snap/bin/libreoffice"),
            ];
            install_paths.extend(opt_installs(Path::new("/opt")));
            PlatformInfo {
                binary_names: &["soffice", "libreoffice"],
                install_paths,
            }
        }
    }
}

/// Vendor tarballs install to `/opt/libreoffice<version>/program/soffice`.
fn opt_installs(opt: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(opt) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("libreoffice"))
        .map(|e| e.path().join("program").join("soffice"))
        .collect();
    // Reverse lexicographic: `libreoffice7.6` before `libreoffice7.5`.
    found.sort();
    found.reverse();
    found
}

// ── Thread-safe singleton path cache ─────────────────────────────────────────

static DISCOVERED: OnceLock<PathBuf> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// Resolve the converter binary.
///
/// `explicit` wins when given; it is an error for it to be missing rather
/// than a reason to fall back, so a typo in configuration is loud.
pub fn locate_soffice(explicit: Option<&Path>) -> Result<PathBuf, LocateError> {
    if let Some(path) = explicit {
        return existing(path.to_path_buf());
    }

    if let Some(env_path) = std::env::var_os(ENV_OVERRIDE) {
        if !env_path.is_empty() {
            return existing(PathBuf::from(env_path));
        }
    }

    if let Some(path) = DISCOVERED.get() {
        return Ok(path.clone());
    }

    let path = discover()?;
    let _ = DISCOVERED.set(path.clone());
    Ok(path)
}

/// Search a `PATH`-style variable for the first executable named in `names`.
pub fn search_path(names: &[&str], path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| is_executable(candidate))
}

/// Install locations that would be checked on this platform.
pub fn candidate_install_paths() -> Vec<PathBuf> {
    detect_platform().install_paths
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn existing(path: PathBuf) -> Result<PathBuf, LocateError> {
    if path.exists() {
        Ok(path)
    } else {
        Err(LocateError::Missing { path })
    }
}

fn discover() -> Result<PathBuf, LocateError> {
    let info = detect_platform();

    if let Some(path_var) = std::env::var_os("PATH") {
        if let Some(found) = search_path(info.binary_names, &path_var) {
            return Ok(found);
        }
    }

    let found = info.install_paths.iter().find(|p| is_executable(p)).cloned();
    found.ok_or(LocateError::NotFound {
        searched: info.install_paths,
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
