//! Configuration for the submission pipeline.
//!
//! Everything the pipeline can tune lives in [`PrintConfig`], built via its
//! [`PrintConfigBuilder`]. Pricing is not here: per-page prices are runtime
//! settings stored in the database and read inside each billing transaction.

use crate::error::PrintError;
use crate::events::SubmissionObserver;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a [`crate::PrintService`].
///
/// Built via [`PrintConfig::builder()`] or using [`PrintConfig::default()`].
///
/// # Example
/// ```rust
/// use printmeter::PrintConfig;
///
/// let config = PrintConfig::builder()
///     .upload_dir("/var/spool/printmeter")
///     .convert_timeout_secs(30)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PrintConfig {
    /// Root directory for stored uploads. Default: `./uploads`.
    ///
    /// Files land in `<upload_dir>/<YYYY>/<MM>/<random>.<ext>`; job records
    /// keep the path relative to this root.
    pub upload_dir: PathBuf,

    /// Parent directory for scoped conversion work directories.
    /// If None, uses the system temp directory.
    pub work_dir: Option<PathBuf>,

    /// Time budget for one office conversion in seconds. Range: 1–3600. Default: 60.
    pub convert_timeout_secs: u64,

    /// Time budget for one backend hand-off in seconds. Range: 1–3600. Default: 120.
    pub dispatch_timeout_secs: u64,

    /// Extra seconds past `dispatch_timeout_secs` before a still-`queued` job
    /// counts as stuck and can be refunded by hand. Range: 0–3600. Default: 30.
    pub settle_grace_secs: u64,

    /// Explicit converter binary. If None, resolved by `office-locate`.
    pub soffice_path: Option<PathBuf>,

    /// Lines per page for the plain-text estimate and layout. Default: 60.
    pub text_lines_per_page: usize,

    /// Characters per line before wrapping. Default: 80.
    pub text_chars_per_line: usize,

    /// Append a `refund` row to the top-up ledger on compensation. Default: true.
    pub record_refunds: bool,

    /// Receives submission milestones. If None, events are dropped.
    pub observer: Option<Arc<dyn SubmissionObserver>>,
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            work_dir: None,
            convert_timeout_secs: 60,
            dispatch_timeout_secs: 120,
            settle_grace_secs: 30,
            soffice_path: None,
            text_lines_per_page: 60,
            text_chars_per_line: 80,
            record_refunds: true,
            observer: None,
        }
    }
}

impl fmt::Debug for PrintConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintConfig")
            .field("upload_dir", &self.upload_dir)
            .field("work_dir", &self.work_dir)
            .field("convert_timeout_secs", &self.convert_timeout_secs)
            .field("dispatch_timeout_secs", &self.dispatch_timeout_secs)
            .field("settle_grace_secs", &self.settle_grace_secs)
            .field("soffice_path", &self.soffice_path)
            .field("text_lines_per_page", &self.text_lines_per_page)
            .field("text_chars_per_line", &self.text_chars_per_line)
            .field("record_refunds", &self.record_refunds)
            .field(
                "observer",
                &self.observer.as_ref().map(|_| "<dyn SubmissionObserver>"),
            )
            .finish()
    }
}

impl PrintConfig {
    /// Create a new builder for `PrintConfig`.
    pub fn builder() -> PrintConfigBuilder {
        PrintConfigBuilder {
            config: Self::default(),
        }
    }

    /// How long after its debit a `queued` job may still be settling.
    pub fn in_flight_window_secs(&self) -> u64 {
        self.dispatch_timeout_secs + self.settle_grace_secs
    }

    pub(crate) fn observer(&self) -> Option<&dyn SubmissionObserver> {
        self.observer.as_deref()
    }
}

/// Builder for [`PrintConfig`].
#[derive(Debug)]
pub struct PrintConfigBuilder {
    config: PrintConfig,
}

impl PrintConfigBuilder {
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn convert_timeout_secs(mut self, secs: u64) -> Self {
        self.config.convert_timeout_secs = secs.clamp(1, 3600);
        self
    }

    pub fn dispatch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.dispatch_timeout_secs = secs.clamp(1, 3600);
        self
    }

    pub fn settle_grace_secs(mut self, secs: u64) -> Self {
        self.config.settle_grace_secs = secs.min(3600);
        self
    }

    pub fn soffice_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.soffice_path = Some(path.into());
        self
    }

    pub fn text_lines_per_page(mut self, n: usize) -> Self {
        self.config.text_lines_per_page = n.max(1);
        self
    }

    pub fn text_chars_per_line(mut self, n: usize) -> Self {
        self.config.text_chars_per_line = n.max(1);
        self
    }

    pub fn record_refunds(mut self, v: bool) -> Self {
        self.config.record_refunds = v;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SubmissionObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PrintConfig, PrintError> {
        let c = &self.config;
        if c.upload_dir.as_os_str().is_empty() {
            return Err(PrintError::InvalidConfig(
                "upload_dir must not be empty".into(),
            ));
        }
        if let Some(work) = &c.work_dir {
            if work.as_os_str().is_empty() {
                return Err(PrintError::InvalidConfig(
                    "work_dir must not be empty".into(),
                ));
            }
        }
        if c.text_lines_per_page == 0 || c.text_chars_per_line == 0 {
            return Err(PrintError::InvalidConfig(
                "text layout must be at least 1×1".into(),
            ));
        }
        Ok(self.config)
    }
}
