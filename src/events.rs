//! Observer trait for submission milestones.
//!
//! Inject an [`Arc<dyn SubmissionObserver>`] via
//! [`crate::config::PrintConfigBuilder::observer`] to receive events as a
//! submission moves from preparation to settlement.
//!
//! # Example
//!
//! ```rust
//! use printmeter::{PrintConfig, SubmissionObserver};
//! use std::sync::{Arc, atomic::{AtomicI64, Ordering}};
//!
//! struct Spend {
//!     total: AtomicI64,
//! }
//!
//! impl SubmissionObserver for Spend {
//!     fn on_charged(&self, _job_id: i64, cost_cents: i64, _balance_after: i64) {
//!         self.total.fetch_add(cost_cents, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = PrintConfig::builder()
//!     .observer(Arc::new(Spend { total: AtomicI64::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::FileKind;
use std::sync::Arc;

/// Called by [`crate::PrintService`] as a submission progresses.
///
/// Implementations must be `Send + Sync`: settlement runs on a spawned task.
/// All methods default to no-ops.
pub trait SubmissionObserver: Send + Sync {
    /// The upload was classified and converted.
    ///
    /// # Arguments
    /// * `kind`: detected format
    /// * `pages`: page count used for billing
    /// * `estimated`: true when `pages` comes from a heuristic
    fn on_prepared(&self, kind: FileKind, pages: u32, estimated: bool) {
        let _ = (kind, pages, estimated);
    }

    /// The debit committed and the job is `queued`.
    fn on_charged(&self, job_id: i64, cost_cents: i64, balance_after: i64) {
        let _ = (job_id, cost_cents, balance_after);
    }

    /// The backend accepted the job.
    fn on_dispatched(&self, job_id: i64, backend_job_id: &str) {
        let _ = (job_id, backend_job_id);
    }

    /// A debit was returned and the job marked `failed`.
    fn on_refunded(&self, job_id: i64, amount_cents: i64) {
        let _ = (job_id, amount_cents);
    }

    /// Compensation itself failed; the job is still `queued`.
    fn on_compensation_failed(&self, job_id: i64, error: &str) {
        let _ = (job_id, error);
    }
}

/// Observer that ignores every event. Used when none is configured.
pub struct NoopObserver;

impl SubmissionObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::PrintConfig`].
pub type Observer = Arc<dyn SubmissionObserver>;
