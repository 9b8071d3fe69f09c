//! # printmeter
//!
//! Metered print submission: accept an upload, count its pages, charge a
//! prepaid account, hand the document to CUPS and settle the job.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Classify  extension first, content signature second
//!  ├─ 2. Prepare   pdf as-is, office via soffice, image/text rendered to pdf
//!  ├─ 3. Charge    rollover, price, limit checks, debit, job `queued`
//!  ├─ 4. Dispatch  PrintBackend (lp) with a timeout
//!  └─ 5. Settle    `printed`, or refund + `failed`
//! ```
//!
//! Steps 3–5 run on a spawned task, so a client that disconnects mid-request
//! never strands a debit.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use printmeter::{LpBackend, PrintConfig, PrintRequest, PrintService, Store, Upload};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::open("data/printmeter.db")?;
//!     let config = PrintConfig::builder().upload_dir("data/uploads").build()?;
//!     let service = PrintService::new(store, Arc::new(LpBackend::new()), config);
//!
//!     let identity = service.identity("dana").await?.ok_or("no such user")?;
//!     let upload = Upload::from_path("report.pdf".as_ref()).await?;
//!     let printed = service
//!         .submit(&identity, &upload, &PrintRequest::new("office"))
//!         .await?;
//!     println!("{} pages, {} cents, job {}", printed.pages, printed.cost_cents, printed.job_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `printmeter` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! printmeter = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod ledger;
pub mod output;
pub mod pipeline;
pub mod refund;
pub mod request;
pub mod store;
pub mod submit;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PrintConfig, PrintConfigBuilder};
pub use dispatch::{DispatchRequest, LpBackend, PrintBackend};
pub use error::{DispatchError, PrintError};
pub use events::{NoopObserver, SubmissionObserver};
pub use ledger::Period;
pub use output::{EstimateResponse, ErrorResponse, PrintResponse};
pub use pipeline::{FileKind, PreparedDocument};
pub use refund::RefundOutcome;
pub use request::{Identity, PrintRequest, Sides};
pub use store::{Account, JobFilter, JobStatus, NewAccount, PrintJob, Pricing, Role, Store};
pub use submit::PrintService;
pub use upload::Upload;
