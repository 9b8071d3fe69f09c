//! Error types for the printmeter library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PrintError`]: **Fatal** for the current request. Bad input, a failed
//!   conversion, a spending constraint, a storage failure. Returned as
//!   `Err(PrintError)` from every [`crate::PrintService`] operation.
//!
//! * [`DispatchError`]: why a single hand-off to the print backend failed.
//!   It never reaches the caller directly: a dispatch failure happens after
//!   money moved, so the service first runs the refund and only then reports
//!   [`PrintError::DispatchFailed`] carrying the backend's reason.
//!
//! Errors raised before the debit commits have no side effects. Errors after
//! it are always paired with compensation.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the printmeter library.
#[derive(Debug, Error)]
pub enum PrintError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A required form field was absent or empty.
    #[error("missing {field} field")]
    MissingField { field: &'static str },

    /// A form field was present but could not be interpreted.
    #[error("invalid {field} field: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Copies must lie within 1–100.
    #[error("unsupported copies count '{value}' (expected 1–{max})")]
    InvalidCopies { value: String, max: u32 },

    /// The upload could not be written to the upload or work directory.
    #[error("failed to save upload '{filename}': {source}")]
    UploadFailed {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// The document structure could not be read to count pages.
    #[error("failed to read pages of '{path}': {detail}")]
    PageCountFailed { path: PathBuf, detail: String },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// No converter binary is available for office documents.
    #[error("document converter unavailable: {hint}")]
    ConverterNotFound { hint: String },

    /// The converter ran but did not produce a usable PDF.
    #[error("conversion of '{path}' failed: {detail}")]
    ConversionFailed { path: PathBuf, detail: String },

    /// The converter exceeded its time budget and was killed.
    #[error("conversion timed out after {secs}s")]
    ConversionTimeout { secs: u64 },

    // ── Constraint violations ─────────────────────────────────────────────
    /// The account referenced by the identity does not exist.
    #[error("account {account_id} not found")]
    AccountNotFound { account_id: i64 },

    /// Balance does not cover the cost.
    #[error("insufficient balance: {balance_cents} available, {cost_cents} required")]
    InsufficientBalance { balance_cents: i64, cost_cents: i64 },

    /// The monthly spend cap would be exceeded.
    #[error("monthly limit exceeded: {spent_cents} spent + {cost_cents} > {limit_cents}")]
    MonthlyLimitExceeded {
        spent_cents: i64,
        cost_cents: i64,
        limit_cents: i64,
    },

    /// The yearly spend cap would be exceeded.
    #[error("yearly limit exceeded: {spent_cents} spent + {cost_cents} > {limit_cents}")]
    YearlyLimitExceeded {
        spent_cents: i64,
        cost_cents: i64,
        limit_cents: i64,
    },

    /// `pages * price` does not fit in an i64.
    #[error("cost of {pages} pages at {price_cents} per page overflows")]
    CostOverflow { pages: u32, price_cents: i64 },

    // ── Dispatch errors ───────────────────────────────────────────────────
    /// The print backend rejected the job; the debit has been refunded.
    #[error("print error: {source}")]
    DispatchFailed {
        job_id: i64,
        #[source]
        source: DispatchError,
    },

    /// The backend accepted the job but it could not be marked `printed`.
    /// The debit stands; `backend_job_id` is the only record of the print.
    #[error("job {job_id} printed as {backend_job_id} but was not recorded: {detail}")]
    PrintNotRecorded {
        job_id: i64,
        backend_job_id: String,
        detail: String,
    },

    /// Compensation after a dispatch failure did not complete.
    ///
    /// The only state in which balance and job status can disagree; the job
    /// stays `queued` and can be settled later with
    /// [`crate::PrintService::refund_job`].
    #[error("refund for job {job_id} failed: {detail}")]
    CompensationFailed { job_id: i64, detail: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// SQLite returned an error; the surrounding transaction rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A job id did not resolve to a record.
    #[error("print job {job_id} not found")]
    JobNotFound { job_id: i64 },

    /// The job is still queued because its dispatch may be running; only
    /// older queued jobs can be refunded by hand.
    #[error("print job {job_id} may still be dispatching, retry in {retry_after_secs}s")]
    JobInFlight { job_id: i64, retry_after_secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PrintError {
    /// HTTP-style status code for the request surface.
    pub fn status_code(&self) -> u16 {
        match self {
            PrintError::MissingField { .. }
            | PrintError::InvalidField { .. }
            | PrintError::InvalidCopies { .. }
            | PrintError::PageCountFailed { .. }
            | PrintError::ConversionFailed { .. }
            | PrintError::ConversionTimeout { .. }
            | PrintError::CostOverflow { .. } => 400,
            PrintError::InsufficientBalance { .. }
            | PrintError::MonthlyLimitExceeded { .. }
            | PrintError::YearlyLimitExceeded { .. } => 402,
            PrintError::AccountNotFound { .. } | PrintError::JobNotFound { .. } => 404,
            PrintError::JobInFlight { .. } => 409,
            PrintError::DispatchFailed { .. } => 502,
            PrintError::ConverterNotFound { .. } => 503,
            PrintError::UploadFailed { .. }
            | PrintError::CompensationFailed { .. }
            | PrintError::PrintNotRecorded { .. }
            | PrintError::Storage(_)
            | PrintError::InvalidConfig(_)
            | PrintError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            PrintError::MissingField { .. } => "missing_field",
            PrintError::InvalidField { .. } => "invalid_field",
            PrintError::InvalidCopies { .. } => "invalid_copies",
            PrintError::UploadFailed { .. } => "upload_failed",
            PrintError::PageCountFailed { .. } => "page_count_failed",
            PrintError::ConverterNotFound { .. } => "converter_not_found",
            PrintError::ConversionFailed { .. } => "conversion_failed",
            PrintError::ConversionTimeout { .. } => "conversion_timeout",
            PrintError::AccountNotFound { .. } => "account_not_found",
            PrintError::InsufficientBalance { .. } => "insufficient_balance",
            PrintError::MonthlyLimitExceeded { .. } => "monthly_limit_exceeded",
            PrintError::YearlyLimitExceeded { .. } => "yearly_limit_exceeded",
            PrintError::CostOverflow { .. } => "cost_overflow",
            PrintError::DispatchFailed { .. } => "dispatch_failed",
            PrintError::CompensationFailed { .. } => "compensation_failed",
            PrintError::PrintNotRecorded { .. } => "print_not_recorded",
            PrintError::Storage(_) => "storage",
            PrintError::JobNotFound { .. } => "job_not_found",
            PrintError::JobInFlight { .. } => "job_in_flight",
            PrintError::InvalidConfig(_) => "invalid_config",
            PrintError::Internal(_) => "internal",
        }
    }

    /// True for spend-constraint rejections (balance, monthly, yearly).
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            PrintError::InsufficientBalance { .. }
                | PrintError::MonthlyLimitExceeded { .. }
                | PrintError::YearlyLimitExceeded { .. }
        )
    }
}

/// Why one hand-off to the print backend failed.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum DispatchError {
    /// The backend process or connection could not be started.
    #[error("backend unavailable: {detail}")]
    Unavailable { detail: String },

    /// The backend answered with a refusal.
    #[error("backend rejected job: {detail}")]
    Rejected { detail: String },

    /// The backend accepted the job but its reply had no job identifier.
    #[error("unrecognised backend reply: {reply}")]
    UnrecognisedReply { reply: String },

    /// The backend did not answer in time.
    #[error("backend timed out after {secs}s")]
    Timeout { secs: u64 },
}
