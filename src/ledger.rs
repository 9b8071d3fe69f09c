//! Billing ledger: period rollover, cost, spend-limit checks and the debit.
//!
//! Every function here runs inside a transaction handed in by the caller.
//! [`charge`] must be called inside a write transaction; [`quote`] works in a
//! read-only one and never persists anything, not even the rollover.

use crate::error::PrintError;
use crate::store::{accounts, jobs, Account, NewJob, Pricing};
use chrono::{DateTime, Datelike, Local, TimeZone};
use rusqlite::Connection;
use tracing::{debug, info};

// ── Periods ──────────────────────────────────────────────────────────────

/// Calendar period tags, `YYYY-MM` and `YYYY`, in local time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub month: String,
    pub year: String,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Self {
        Self {
            month: format!("{year:04}-{month:02}"),
            year: format!("{year:04}"),
        }
    }

    pub fn at<Tz: TimeZone>(instant: &DateTime<Tz>) -> Self {
        Self::new(instant.year(), instant.month())
    }

    pub fn current() -> Self {
        Self::at(&Local::now())
    }
}

/// Reset spend counters whose period tag is stale. Returns true if anything
/// changed. Applying it twice with the same period changes nothing the
/// second time.
pub fn roll_over(account: &mut Account, period: &Period) -> bool {
    let mut changed = false;
    if account.month_period != period.month {
        account.month_spent_cents = 0;
        account.month_period = period.month.clone();
        changed = true;
    }
    if account.year_period != period.year {
        account.year_spent_cents = 0;
        account.year_period = period.year.clone();
        changed = true;
    }
    changed
}

// ── Cost and constraints ─────────────────────────────────────────────────

/// `pages * price`, rejecting overflow.
pub fn cost_cents(pages: u32, price_cents: i64) -> Result<i64, PrintError> {
    i64::from(pages)
        .checked_mul(price_cents)
        .ok_or(PrintError::CostOverflow { pages, price_cents })
}

/// Which constraints a cost would violate, without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Violations {
    pub insufficient_balance: bool,
    pub would_exceed_monthly: bool,
    pub would_exceed_yearly: bool,
}

impl Violations {
    pub fn of(account: &Account, cost: i64) -> Self {
        Self {
            insufficient_balance: account.balance_cents < cost,
            would_exceed_monthly: exceeds(account.month_spent_cents, cost, account.monthly_limit_cents),
            would_exceed_yearly: exceeds(account.year_spent_cents, cost, account.yearly_limit_cents),
        }
    }

    pub fn any(&self) -> bool {
        self.insufficient_balance || self.would_exceed_monthly || self.would_exceed_yearly
    }
}

fn exceeds(spent: i64, cost: i64, limit: i64) -> bool {
    limit > 0 && spent.saturating_add(cost) > limit
}

/// Enforce balance, then monthly limit, then yearly limit.
pub fn check(account: &Account, cost: i64) -> Result<(), PrintError> {
    let v = Violations::of(account, cost);
    if v.insufficient_balance {
        return Err(PrintError::InsufficientBalance {
            balance_cents: account.balance_cents,
            cost_cents: cost,
        });
    }
    if v.would_exceed_monthly {
        return Err(PrintError::MonthlyLimitExceeded {
            spent_cents: account.month_spent_cents,
            cost_cents: cost,
            limit_cents: account.monthly_limit_cents,
        });
    }
    if v.would_exceed_yearly {
        return Err(PrintError::YearlyLimitExceeded {
            spent_cents: account.year_spent_cents,
            cost_cents: cost,
            limit_cents: account.yearly_limit_cents,
        });
    }
    Ok(())
}

// ── Dry run ──────────────────────────────────────────────────────────────

/// Result of a dry-run pricing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub pricing: Pricing,
    pub cost_cents: i64,
    /// The account as it would look after rollover. Not persisted.
    pub account: Account,
    pub violations: Violations,
}

/// Price `pages` for `account_id` without changing anything.
pub fn quote(
    conn: &Connection,
    account_id: i64,
    pages: u32,
    color: bool,
    period: &Period,
) -> Result<Quote, PrintError> {
    let mut account = load(conn, account_id)?;
    roll_over(&mut account, period);

    let pricing = Pricing::load(conn)?;
    let cost = cost_cents(pages, pricing.price_for(color))?;
    let violations = Violations::of(&account, cost);

    debug!(account_id, pages, color, cost, ?violations, "Quoted");
    Ok(Quote {
        pricing,
        cost_cents: cost,
        account,
        violations,
    })
}

// ── Debit ────────────────────────────────────────────────────────────────

/// What is being billed. Everything except the money comes from the request.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub account_id: i64,
    pub pages: u32,
    pub color: bool,
    pub printer: String,
    pub filename: String,
    pub stored_path: String,
    pub sides: String,
    pub is_duplex: bool,
    pub copies: u32,
    pub page_range: Option<String>,
}

/// A committed debit and the `queued` job it created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charged {
    pub job_id: i64,
    pub cost_cents: i64,
    pub balance_before_cents: i64,
    pub balance_after_cents: i64,
    pub month_spent_cents: i64,
    pub year_spent_cents: i64,
}

/// Roll over, price, check, debit and insert the job as `queued`.
///
/// Must run inside a write transaction: on any error the caller's rollback
/// also discards the persisted rollover.
pub fn charge(conn: &Connection, req: &ChargeRequest, period: &Period) -> Result<Charged, PrintError> {
    let mut account = load(conn, req.account_id)?;
    if roll_over(&mut account, period) {
        accounts::save_ledger(conn, &account)?;
        debug!(account_id = account.id, month = %period.month, "Rolled over spend counters");
    }

    let pricing = Pricing::load(conn)?;
    let cost = cost_cents(req.pages, pricing.price_for(req.color))?;
    check(&account, cost)?;

    let before = account.balance_cents;
    account.balance_cents -= cost;
    account.month_spent_cents = account.month_spent_cents.saturating_add(cost);
    account.year_spent_cents = account.year_spent_cents.saturating_add(cost);
    accounts::save_ledger(conn, &account)?;

    let job_id = jobs::insert_queued(
        conn,
        &NewJob {
            account_id: account.id,
            username: account.username.clone(),
            printer: req.printer.clone(),
            filename: req.filename.clone(),
            stored_path: req.stored_path.clone(),
            pages: req.pages,
            cost_cents: cost,
            is_duplex: req.is_duplex,
            is_color: req.color,
            sides: req.sides.clone(),
            copies: req.copies,
            page_range: req.page_range.clone(),
            balance_before_cents: before,
            balance_after_cents: account.balance_cents,
            month_total_cents: account.month_spent_cents,
            year_total_cents: account.year_spent_cents,
        },
    )?;

    info!(
        job_id,
        account_id = account.id,
        pages = req.pages,
        cost,
        balance = account.balance_cents,
        "Debited"
    );
    Ok(Charged {
        job_id,
        cost_cents: cost,
        balance_before_cents: before,
        balance_after_cents: account.balance_cents,
        month_spent_cents: account.month_spent_cents,
        year_spent_cents: account.year_spent_cents,
    })
}

pub(crate) fn load(conn: &Connection, account_id: i64) -> Result<Account, PrintError> {
    accounts::get(conn, account_id)?.ok_or(PrintError::AccountNotFound { account_id })
}
