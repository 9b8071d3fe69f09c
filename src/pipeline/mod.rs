//! Pipeline stages that turn an upload into a printable document.
//!
//! Each submodule handles exactly one concern, and each format has exactly
//! one handler. All of them produce the same [`PreparedDocument`].
//!
//! ## Data Flow
//!
//! ```text
//! upload ──▶ classify ──▶ pdf     (count pages)
//!                    ├──▶ office  (soffice → pdf → count)
//!                    ├──▶ raster  (image → 1-page pdf)
//!                    ├──▶ text    (estimate → courier pdf)
//!                    └──▶ unknown (probe, else 1 page; pass through)
//! ```
//!
//! 1. [`classify`]: extension first, content signature second; never fails
//! 2. [`document`]: dispatches on [`FileKind`] and owns the scoped work
//!    directory for intermediates
//! 3. [`pdf`], [`office`], [`raster`], [`text`]: the per-format handlers

pub mod classify;
pub mod document;
pub mod office;
pub mod pdf;
pub mod raster;
pub mod text;

pub use classify::{classify, classify_file, FileKind};
pub use document::{prepare, PreparedDocument};
