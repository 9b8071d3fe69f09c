//! Submission entry points.
//!
//! [`PrintService`] ties the stages together:
//!
//! ```text
//! upload ─▶ store ─▶ classify ─▶ prepare ─▶ charge ─▶ dispatch ─┬─▶ printed
//!                                            (queued)          └─▶ refund ─▶ failed
//! ```
//!
//! Everything before the charge is free of side effects apart from the
//! stored upload, which is removed again on failure. Once the charge
//! transaction starts, settlement runs on a spawned task: dropping the
//! caller's future cannot leave a debited job stuck in `queued`.

use crate::config::PrintConfig;
use crate::dispatch::{self, DispatchRequest, PrintBackend};
use crate::error::{DispatchError, PrintError};
use crate::ledger::{self, ChargeRequest, Period};
use crate::output::{EstimateResponse, PrintResponse};
use crate::pipeline::{self, PreparedDocument};
use crate::refund::{self, RefundOutcome};
use crate::request::{Identity, PrintRequest};
use crate::store::{
    accounts, jobs, topups, Account, JobFilter, NewAccount, NewTopup, PrintJob, Pricing, Store,
    TopupKind, TopupRecord,
};
use crate::upload::{self, StoredUpload, Upload};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Operator name recorded on refunds issued by the service itself.
pub const SYSTEM_OPERATOR: &str = "system";

/// Attempts at recording a print the backend already accepted.
const RECORD_ATTEMPTS: u32 = 3;

/// Metered print submission over a [`Store`] and a [`PrintBackend`].
#[derive(Clone)]
pub struct PrintService {
    store: Store,
    backend: Arc<dyn PrintBackend>,
    config: PrintConfig,
}

impl std::fmt::Debug for PrintService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintService")
            .field("store", &self.store)
            .field("backend", &"<dyn PrintBackend>")
            .field("config", &self.config)
            .finish()
    }
}

impl PrintService {
    pub fn new(store: Store, backend: Arc<dyn PrintBackend>, config: PrintConfig) -> Self {
        Self {
            store,
            backend,
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &PrintConfig {
        &self.config
    }

    /// Price an upload for `identity` without storing or charging anything.
    pub async fn estimate(
        &self,
        identity: &Identity,
        upload: &Upload,
        color: bool,
    ) -> Result<EstimateResponse, PrintError> {
        info!("Estimating {} for {}", upload.filename, identity.username);

        let staged = upload::stage(upload, self.config.work_dir.as_deref()).await?;
        let kind = pipeline::classify_file(staged.path(), &upload.filename);
        let doc = pipeline::prepare(
            kind,
            staged.path(),
            upload.content_type.as_deref(),
            &self.config,
        )
        .await?;
        if let Some(obs) = self.config.observer() {
            obs.on_prepared(doc.kind, doc.pages, doc.estimated);
        }

        let (account_id, pages, period) = (identity.user_id, doc.pages, Period::current());
        let quote = self
            .store
            .read(move |tx| ledger::quote(tx, account_id, pages, color, &period))
            .await?;

        Ok(EstimateResponse {
            pages: doc.pages,
            estimated: doc.estimated,
            per_page_cents: quote.pricing.per_page_cents,
            color_page_cents: quote.pricing.color_page_cents,
            cost_cents: quote.cost_cents,
            balance_cents: quote.account.balance_cents,
            month_spent_cents: quote.account.month_spent_cents,
            year_spent_cents: quote.account.year_spent_cents,
            monthly_limit_cents: quote.account.monthly_limit_cents,
            yearly_limit_cents: quote.account.yearly_limit_cents,
            insufficient_balance: quote.violations.insufficient_balance,
            would_exceed_monthly: quote.violations.would_exceed_monthly,
            would_exceed_yearly: quote.violations.would_exceed_yearly,
        })
    }

    /// Store, convert, charge and print an upload.
    ///
    /// # Errors
    /// - input, conversion and constraint errors leave no trace: no job, no
    ///   debit, no stored file
    /// - [`PrintError::DispatchFailed`] after the debit was refunded and the
    ///   job marked `failed`
    /// - [`PrintError::CompensationFailed`] if that refund itself failed; the
    ///   job stays `queued` for [`PrintService::refund_job`]
    /// - [`PrintError::PrintNotRecorded`] if the backend accepted the job but
    ///   it could not be marked `printed`
    pub async fn submit(
        &self,
        identity: &Identity,
        upload: &Upload,
        request: &PrintRequest,
    ) -> Result<PrintResponse, PrintError> {
        info!(
            printer = %request.printer,
            "Submitting {} for {}",
            upload.filename,
            identity.username
        );
        request.validate()?;

        // ── Step 1: Persist the upload ───────────────────────────────────
        let stored = upload::store(upload, &self.config.upload_dir).await?;

        // ── Step 2: Classify and prepare ─────────────────────────────────
        let kind = pipeline::classify_file(stored.path(), &upload.filename);
        let doc = pipeline::prepare(
            kind,
            stored.path(),
            upload.content_type.as_deref(),
            &self.config,
        )
        .await?;
        if let Some(obs) = self.config.observer() {
            obs.on_prepared(doc.kind, doc.pages, doc.estimated);
        }

        // ── Step 3: Charge, dispatch, settle ─────────────────────────────
        let settle = Settlement {
            store: self.store.clone(),
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            identity: identity.clone(),
            filename: upload.filename.clone(),
            request: request.clone(),
        };
        tokio::spawn(settle.run(stored, doc))
            .await
            .map_err(|e| PrintError::Internal(format!("settlement task failed: {e}")))?
    }

    /// Compensate a job that is still `queued`. Idempotent.
    ///
    /// # Errors
    /// [`PrintError::JobInFlight`] while the job is younger than
    /// [`PrintConfig::in_flight_window_secs`]: its dispatch may still succeed.
    pub async fn refund_job(&self, job_id: i64) -> Result<RefundOutcome, PrintError> {
        let record = self.config.record_refunds.then(|| SYSTEM_OPERATOR.to_string());
        let period = Period::current();
        let window = chrono::Duration::seconds(self.config.in_flight_window_secs() as i64);
        let outcome = self
            .store
            .write(move |tx| {
                refund::refund_stale(
                    tx,
                    job_id,
                    &period,
                    record.as_deref(),
                    window,
                    chrono::Utc::now(),
                )
            })
            .await?;
        if let (RefundOutcome::Refunded { amount_cents, .. }, Some(obs)) =
            (&outcome, self.config.observer())
        {
            obs.on_refunded(job_id, *amount_cents);
        }
        Ok(outcome)
    }

    /// Print records visible to `identity`. Non-admins only ever see their
    /// own, whatever the filter says.
    pub async fn list_jobs(
        &self,
        identity: &Identity,
        mut filter: JobFilter,
    ) -> Result<Vec<PrintJob>, PrintError> {
        if !identity.is_admin() {
            filter.account_id = Some(identity.user_id);
            filter.username = None;
        }
        self.store
            .read(move |tx| Ok(jobs::list(tx, &filter)?))
            .await
    }

    /// Add funds to an account and append a `manual` ledger row.
    pub async fn topup(
        &self,
        account_id: i64,
        amount_cents: i64,
        operator: &str,
    ) -> Result<TopupRecord, PrintError> {
        if amount_cents <= 0 {
            return Err(PrintError::InvalidField {
                field: "amount",
                reason: format!("must be positive, got {amount_cents}"),
            });
        }
        let operator = operator.trim().to_string();
        if operator.is_empty() {
            return Err(PrintError::MissingField { field: "operator" });
        }

        let record = self
            .store
            .write(move |tx| {
                let mut account = ledger::load(tx, account_id)?;
                let before = account.balance_cents;
                account.balance_cents = before.checked_add(amount_cents).ok_or_else(|| {
                    PrintError::InvalidField {
                        field: "amount",
                        reason: "balance would overflow".into(),
                    }
                })?;
                accounts::save_ledger(tx, &account)?;
                let id = topups::insert(
                    tx,
                    &NewTopup {
                        account_id,
                        amount_cents,
                        balance_before_cents: before,
                        balance_after_cents: account.balance_cents,
                        kind: TopupKind::Manual,
                        operator_name: operator,
                        job_id: None,
                    },
                )?;
                topups::get(tx, id)?
                    .ok_or_else(|| PrintError::Internal(format!("topup {id} vanished")))
            })
            .await?;

        info!(
            account_id,
            amount = amount_cents,
            balance = record.balance_after_cents,
            "Topped up"
        );
        Ok(record)
    }

    pub async fn create_account(&self, new: NewAccount) -> Result<Account, PrintError> {
        let period = Period::current();
        let account = self
            .store
            .write(move |tx| accounts::insert(tx, &new, &period))
            .await?;
        info!(account_id = account.id, "Created account {}", account.username);
        Ok(account)
    }

    pub async fn account(&self, account_id: i64) -> Result<Account, PrintError> {
        self.store.read(move |tx| ledger::load(tx, account_id)).await
    }

    /// Resolve a username to the identity the request surface would supply.
    pub async fn identity(&self, username: &str) -> Result<Option<Identity>, PrintError> {
        let username = username.to_string();
        let account = self
            .store
            .read(move |tx| Ok(accounts::by_username(tx, &username)?))
            .await?;
        Ok(account.map(|a| Identity {
            user_id: a.id,
            username: a.username,
            role: a.role,
        }))
    }

    pub async fn topups(&self, account_id: i64) -> Result<Vec<TopupRecord>, PrintError> {
        self.store
            .read(move |tx| Ok(topups::for_account(tx, account_id)?))
            .await
    }

    pub async fn pricing(&self) -> Result<Pricing, PrintError> {
        self.store.read(|tx| Ok(Pricing::load(tx)?)).await
    }

    pub async fn set_pricing(&self, pricing: Pricing) -> Result<(), PrintError> {
        if pricing.per_page_cents < 0 || pricing.color_page_cents < 0 {
            return Err(PrintError::InvalidField {
                field: "price",
                reason: "prices must not be negative".into(),
            });
        }
        self.store.write(move |tx| Ok(pricing.save(tx)?)).await?;
        info!(
            per_page = pricing.per_page_cents,
            color_page = pricing.color_page_cents,
            "Updated pricing"
        );
        Ok(())
    }
}

/// Everything the detached charge → dispatch → settle task owns.
struct Settlement {
    store: Store,
    backend: Arc<dyn PrintBackend>,
    config: PrintConfig,
    identity: Identity,
    filename: String,
    request: PrintRequest,
}

impl Settlement {
    async fn run(
        self,
        mut stored: StoredUpload,
        doc: PreparedDocument,
    ) -> Result<PrintResponse, PrintError> {
        let req = &self.request;
        let charge = ChargeRequest {
            account_id: self.identity.user_id,
            pages: doc.pages,
            color: req.color,
            printer: req.printer.clone(),
            filename: self.filename.clone(),
            stored_path: stored.relative().to_string(),
            sides: req.sides.as_str().to_string(),
            is_duplex: req.is_duplex(),
            copies: req.copies,
            page_range: req.page_range.clone(),
        };
        let period = Period::current();
        let charged = self
            .store
            .write(move |tx| ledger::charge(tx, &charge, &period))
            .await?;
        // The job row references the stored file from here on.
        stored.keep();
        let job_id = charged.job_id;
        if let Some(obs) = self.config.observer() {
            obs.on_charged(job_id, charged.cost_cents, charged.balance_after_cents);
        }

        let dispatch_req = DispatchRequest {
            printer: req.printer.clone(),
            file: doc.print_path.clone(),
            mime: doc.mime.clone(),
            username: self.identity.username.clone(),
            filename: self.filename.clone(),
            sides: req.sides,
            color: req.color,
            copies: req.copies,
            page_range: req.page_range.clone(),
        };
        let outcome = dispatch::dispatch(
            self.backend.as_ref(),
            &dispatch_req,
            self.config.dispatch_timeout_secs,
        )
        .await;
        let pages = doc.pages;
        drop(doc);

        match outcome {
            Ok(backend_job_id) => {
                self.record_printed(job_id, &backend_job_id).await?;
                if let Some(obs) = self.config.observer() {
                    obs.on_dispatched(job_id, &backend_job_id);
                }
                info!(job_id, backend_job_id = %backend_job_id, "Printed");
                Ok(PrintResponse {
                    job_id: backend_job_id,
                    ok: true,
                    pages,
                    cost_cents: charged.cost_cents,
                    balance_cents: charged.balance_after_cents,
                    month_spent_cents: charged.month_spent_cents,
                    year_spent_cents: charged.year_spent_cents,
                    is_duplex: req.is_duplex(),
                    is_color: req.color,
                })
            }
            Err(source) => self.compensate(job_id, source).await,
        }
    }

    /// The backend accepted the job; the debit stands whatever happens here.
    /// A job that cannot be moved to `printed` is an error for the caller,
    /// with the backend id carried in it.
    async fn record_printed(&self, job_id: i64, backend_job_id: &str) -> Result<(), PrintError> {
        let mut attempt = 0;
        let detail = loop {
            attempt += 1;
            let id = backend_job_id.to_string();
            match self
                .store
                .write(move |tx| {
                    if jobs::mark_printed(tx, job_id, &id)? {
                        return Ok(None);
                    }
                    let job = jobs::get(tx, job_id)?.ok_or(PrintError::JobNotFound { job_id })?;
                    Ok(Some(job.status))
                })
                .await
            {
                Ok(None) => {
                    debug!(job_id, "Marked printed");
                    return Ok(());
                }
                Ok(Some(status)) => break format!("job was already {status}"),
                Err(e) if attempt < RECORD_ATTEMPTS => {
                    warn!(job_id, attempt, "Failed to mark job printed, retrying: {}", e);
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
                Err(e) => break e.to_string(),
            }
        };
        error!(
            job_id,
            backend_job_id,
            "Backend accepted job but it was not recorded: {}",
            detail
        );
        Err(PrintError::PrintNotRecorded {
            job_id,
            backend_job_id: backend_job_id.to_string(),
            detail,
        })
    }

    async fn compensate(
        &self,
        job_id: i64,
        source: DispatchError,
    ) -> Result<PrintResponse, PrintError> {
        let record = self.config.record_refunds.then(|| SYSTEM_OPERATOR.to_string());
        let period = Period::current();
        let refunded = self
            .store
            .write(move |tx| refund::refund(tx, job_id, &period, record.as_deref()))
            .await;

        match refunded {
            Ok(RefundOutcome::Refunded { amount_cents, .. }) => {
                if let Some(obs) = self.config.observer() {
                    obs.on_refunded(job_id, amount_cents);
                }
            }
            Ok(RefundOutcome::AlreadySettled(status)) => {
                warn!(job_id, %status, "Job settled before compensation ran");
            }
            Err(e) => {
                error!(job_id, "Compensation failed, job left queued: {}", e);
                let detail = e.to_string();
                if let Some(obs) = self.config.observer() {
                    obs.on_compensation_failed(job_id, &detail);
                }
                return Err(PrintError::CompensationFailed { job_id, detail });
            }
        }
        Err(PrintError::DispatchFailed { job_id, source })
    }
}
