//! Hand-off of a prepared document to the print backend.
//!
//! [`PrintBackend`] is the seam: the service only ever sees a backend job id
//! or a [`DispatchError`]. [`LpBackend`] drives the CUPS `lp` command.

use crate::error::DispatchError;
use crate::request::Sides;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Everything the backend needs for one job.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub printer: String,
    pub file: PathBuf,
    pub mime: String,
    /// Submitting user, reported to the backend.
    pub username: String,
    /// Original filename, used as the job title.
    pub filename: String,
    pub sides: Sides,
    pub color: bool,
    pub copies: u32,
    pub page_range: Option<String>,
}

/// A print system that accepts jobs.
#[async_trait]
pub trait PrintBackend: Send + Sync {
    /// Submit one job and return the backend's identifier for it.
    async fn submit(&self, req: &DispatchRequest) -> Result<String, DispatchError>;
}

/// Submit through `backend`, giving up after `timeout_secs`.
pub async fn dispatch(
    backend: &dyn PrintBackend,
    req: &DispatchRequest,
    timeout_secs: u64,
) -> Result<String, DispatchError> {
    debug!(printer = %req.printer, file = %req.file.display(), "Dispatching");
    match tokio::time::timeout(Duration::from_secs(timeout_secs), backend.submit(req)).await {
        Ok(Ok(id)) => {
            info!(printer = %req.printer, backend_job_id = %id, "Backend accepted job");
            Ok(id)
        }
        Ok(Err(e)) => {
            warn!(printer = %req.printer, "Backend refused job: {}", e);
            Err(e)
        }
        Err(_) => {
            warn!(printer = %req.printer, "Backend timed out after {}s", timeout_secs);
            Err(DispatchError::Timeout { secs: timeout_secs })
        }
    }
}

static REQUEST_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"request id is (\S+)").expect("valid regex"));

/// Backend that shells out to CUPS `lp`.
#[derive(Debug, Clone)]
pub struct LpBackend {
    program: PathBuf,
    server: Option<String>,
}

impl Default for LpBackend {
    fn default() -> Self {
        Self {
            program: PathBuf::from("lp"),
            server: None,
        }
    }
}

impl LpBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different `lp` binary.
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// CUPS server (`host[:port]`), passed as `-h`.
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    fn args(&self, req: &DispatchRequest) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(server) = &self.server {
            args.extend(["-h".to_string(), server.clone()]);
        }
        args.extend([
            "-d".to_string(),
            req.printer.clone(),
            "-U".to_string(),
            req.username.clone(),
            "-t".to_string(),
            req.filename.clone(),
            "-n".to_string(),
            req.copies.to_string(),
            "-o".to_string(),
            format!("sides={}", req.sides),
            "-o".to_string(),
            format!(
                "print-color-mode={}",
                if req.color { "color" } else { "monochrome" }
            ),
        ]);
        if let Some(range) = &req.page_range {
            args.extend(["-P".to_string(), range.clone()]);
        }
        args.extend([
            "-o".to_string(),
            format!("document-format={}", req.mime),
            "--".to_string(),
            req.file.display().to_string(),
        ]);
        args
    }
}

#[async_trait]
impl PrintBackend for LpBackend {
    async fn submit(&self, req: &DispatchRequest) -> Result<String, DispatchError> {
        let output = Command::new(&self.program)
            .args(self.args(req))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DispatchError::Unavailable {
                detail: format!("{}: {e}", self.program.display()),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = match stderr.trim() {
                "" => format!("{} exited with {}", self.program.display(), output.status),
                msg => msg.to_string(),
            };
            return Err(DispatchError::Rejected { detail });
        }
        parse_request_id(&stdout).ok_or_else(|| DispatchError::UnrecognisedReply {
            reply: stdout.trim().to_string(),
        })
    }
}

/// Extract the job id from `lp` output such as
/// `request id is office-42 (1 file(s))`.
pub fn parse_request_id(stdout: &str) -> Option<String> {
    REQUEST_ID.captures(stdout).map(|c| c[1].to_string())
}
