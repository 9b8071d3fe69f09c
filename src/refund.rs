//! Compensation for a debit whose dispatch failed.
//!
//! [`refund`] is safe to call any number of times for the same job: only a
//! `queued` job is refunded, and refunding moves it to `failed` in the same
//! transaction. [`refund_stale`] is the variant for refunds issued by hand,
//! which must not race a dispatch that is still running.

use crate::error::PrintError;
use crate::ledger::{self, Period};
use crate::store::{accounts, jobs, topups, JobStatus, NewTopup, TopupKind};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

/// What [`refund`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    /// The cost went back to the balance and the job is now `failed`.
    Refunded {
        amount_cents: i64,
        balance_after_cents: i64,
    },
    /// The job had already left `queued`; nothing changed.
    AlreadySettled(JobStatus),
}

/// Return the cost of `job_id` to its account and mark the job `failed`.
///
/// `record` names the operator for the `refund` row appended to the top-up
/// ledger; `None` skips the row. Must run inside a write transaction.
pub fn refund(
    conn: &Connection,
    job_id: i64,
    period: &Period,
    record: Option<&str>,
) -> Result<RefundOutcome, PrintError> {
    let job = jobs::get(conn, job_id)?.ok_or(PrintError::JobNotFound { job_id })?;
    if job.status != JobStatus::Queued {
        debug!(job_id, status = %job.status, "Refund skipped, job already settled");
        return Ok(RefundOutcome::AlreadySettled(job.status));
    }

    let mut account = ledger::load(conn, job.account_id)?;
    ledger::roll_over(&mut account, period);

    let before = account.balance_cents;
    account.balance_cents = account.balance_cents.saturating_add(job.cost_cents);
    // A rollover since the debit already zeroed the counter; never go negative.
    account.month_spent_cents = (account.month_spent_cents - job.cost_cents).max(0);
    account.year_spent_cents = (account.year_spent_cents - job.cost_cents).max(0);
    accounts::save_ledger(conn, &account)?;

    if !jobs::mark_failed(conn, job_id)? {
        return Err(PrintError::Internal(format!(
            "job {job_id} left queued during its own refund"
        )));
    }

    if let Some(operator) = record {
        topups::insert(
            conn,
            &NewTopup {
                account_id: account.id,
                amount_cents: job.cost_cents,
                balance_before_cents: before,
                balance_after_cents: account.balance_cents,
                kind: TopupKind::Refund,
                operator_name: operator.to_string(),
                job_id: Some(job_id),
            },
        )?;
    }

    info!(
        job_id,
        account_id = account.id,
        amount = job.cost_cents,
        balance = account.balance_cents,
        "Refunded"
    );
    Ok(RefundOutcome::Refunded {
        amount_cents: job.cost_cents,
        balance_after_cents: account.balance_cents,
    })
}

/// [`refund`], unless the job is `queued` and was debited less than `window`
/// before `now`: its settlement may still be waiting on the backend.
pub fn refund_stale(
    conn: &Connection,
    job_id: i64,
    period: &Period,
    record: Option<&str>,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<RefundOutcome, PrintError> {
    let job = jobs::get(conn, job_id)?.ok_or(PrintError::JobNotFound { job_id })?;
    if job.status == JobStatus::Queued {
        let age = now - job.created_at;
        if age < window {
            let retry_after_secs = (window - age).num_seconds().max(1) as u64;
            debug!(job_id, retry_after_secs, "Refund refused, job may be in flight");
            return Err(PrintError::JobInFlight {
                job_id,
                retry_after_secs,
            });
        }
    }
    refund(conn, job_id, period, record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{charge, load, ChargeRequest};
    use crate::store::{memory_connection, NewAccount, Role};

    fn setup(balance: i64, period: &Period) -> (Connection, i64) {
        let conn = memory_connection();
        let acct = accounts::insert(
            &conn,
            &NewAccount {
                username: "erin".into(),
                role: Role::User,
                balance_cents: balance,
                monthly_limit_cents: 0,
                yearly_limit_cents: 0,
            },
            period,
        )
        .unwrap();
        (conn, acct.id)
    }

    fn debit(conn: &Connection, account_id: i64, pages: u32, period: &Period) -> i64 {
        charge(
            conn,
            &ChargeRequest {
                account_id,
                pages,
                color: false,
                printer: "office".into(),
                filename: "a.pdf".into(),
                stored_path: "a.pdf".into(),
                sides: "one-sided".into(),
                is_duplex: false,
                copies: 1,
                page_range: None,
            },
            period,
        )
        .unwrap()
        .job_id
    }

    #[test]
    fn refund_restores_and_fails_job() {
        let period = Period::new(2024, 1);
        let (conn, id) = setup(500, &period);
        let job_id = debit(&conn, id, 5, &period);

        let out = refund(&conn, job_id, &period, Some("system")).unwrap();
        assert_eq!(
            out,
            RefundOutcome::Refunded {
                amount_cents: 50,
                balance_after_cents: 500
            }
        );

        let acct = load(&conn, id).unwrap();
        assert_eq!(acct.balance_cents, 500);
        assert_eq!(acct.month_spent_cents, 0);
        assert_eq!(acct.year_spent_cents, 0);

        let job = jobs::get(&conn, job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.backend_job_id, None);

        let rows = topups::for_job(&conn, job_id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, TopupKind::Refund);
        assert_eq!(rows[0].amount_cents, 50);
    }

    #[test]
    fn second_refund_is_noop() {
        let period = Period::new(2024, 1);
        let (conn, id) = setup(500, &period);
        let job_id = debit(&conn, id, 5, &period);

        refund(&conn, job_id, &period, Some("system")).unwrap();
        let again = refund(&conn, job_id, &period, Some("system")).unwrap();
        assert_eq!(again, RefundOutcome::AlreadySettled(JobStatus::Failed));
        assert_eq!(load(&conn, id).unwrap().balance_cents, 500);
        assert_eq!(topups::for_job(&conn, job_id).unwrap().len(), 1);
    }

    #[test]
    fn printed_job_is_not_refunded() {
        let period = Period::new(2024, 1);
        let (conn, id) = setup(500, &period);
        let job_id = debit(&conn, id, 5, &period);
        jobs::mark_printed(&conn, job_id, "p-1").unwrap();

        let out = refund(&conn, job_id, &period, None).unwrap();
        assert_eq!(out, RefundOutcome::AlreadySettled(JobStatus::Printed));
        assert_eq!(load(&conn, id).unwrap().balance_cents, 450);
    }

    #[test]
    fn counters_clamp_across_rollover() {
        let jan = Period::new(2024, 1);
        let (conn, id) = setup(500, &jan);
        let job_id = debit(&conn, id, 5, &jan);

        // Month changed between debit and refund.
        let feb = Period::new(2024, 2);
        refund(&conn, job_id, &feb, None).unwrap();
        let acct = load(&conn, id).unwrap();
        assert_eq!(acct.balance_cents, 500);
        assert_eq!(acct.month_spent_cents, 0);
        assert_eq!(acct.month_period, "2024-02");
        assert_eq!(acct.year_spent_cents, 0);
        assert!(topups::for_job(&conn, job_id).unwrap().is_empty());
    }

    #[test]
    fn young_queued_job_is_in_flight() {
        let period = Period::new(2024, 1);
        let (conn, id) = setup(500, &period);
        let job_id = debit(&conn, id, 5, &period);
        let window = Duration::seconds(60);

        let err = refund_stale(&conn, job_id, &period, None, window, Utc::now()).unwrap_err();
        assert!(matches!(err, PrintError::JobInFlight { job_id: j, .. } if j == job_id));
        assert_eq!(load(&conn, id).unwrap().balance_cents, 450);
        assert_eq!(jobs::get(&conn, job_id).unwrap().unwrap().status, JobStatus::Queued);

        let later = Utc::now() + Duration::seconds(61);
        let out = refund_stale(&conn, job_id, &period, None, window, later).unwrap();
        assert!(matches!(out, RefundOutcome::Refunded { amount_cents: 50, .. }));
        assert_eq!(load(&conn, id).unwrap().balance_cents, 500);
    }

    #[test]
    fn young_settled_job_reports_status() {
        let period = Period::new(2024, 1);
        let (conn, id) = setup(500, &period);
        let job_id = debit(&conn, id, 5, &period);
        jobs::mark_printed(&conn, job_id, "p-1").unwrap();

        let out =
            refund_stale(&conn, job_id, &period, None, Duration::seconds(60), Utc::now()).unwrap();
        assert_eq!(out, RefundOutcome::AlreadySettled(JobStatus::Printed));
    }

    #[test]
    fn unknown_job() {
        let period = Period::new(2024, 1);
        let (conn, _) = setup(0, &period);
        let err = refund(&conn, 42, &period, None).unwrap_err();
        assert!(matches!(err, PrintError::JobNotFound { job_id: 42 }));
    }
}
