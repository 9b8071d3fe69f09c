//! Print job records.
//!
//! A job is inserted `queued` inside the debit transaction and leaves that
//! state exactly once, to `printed` or `failed`. Both transitions are guarded
//! by `status = 'queued'` so a second settlement is a no-op rather than a
//! double refund.

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Printed,
    Failed,
}

super::text_enum!(JobStatus {
    Queued => "queued",
    Printed => "printed",
    Failed => "failed",
});

/// Everything known about a job at debit time.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub account_id: i64,
    pub username: String,
    pub printer: String,
    pub filename: String,
    /// Relative to the upload directory.
    pub stored_path: String,
    pub pages: u32,
    pub cost_cents: i64,
    pub is_duplex: bool,
    pub is_color: bool,
    pub sides: String,
    pub copies: u32,
    pub page_range: Option<String>,
    pub balance_before_cents: i64,
    pub balance_after_cents: i64,
    pub month_total_cents: i64,
    pub year_total_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    pub id: i64,
    pub account_id: i64,
    pub username: String,
    pub printer: String,
    pub filename: String,
    pub stored_path: String,
    pub pages: u32,
    pub cost_cents: i64,
    pub is_duplex: bool,
    pub is_color: bool,
    pub sides: String,
    pub copies: u32,
    pub page_range: Option<String>,
    pub balance_before_cents: i64,
    pub balance_after_cents: i64,
    pub month_total_cents: i64,
    pub year_total_cents: i64,
    pub status: JobStatus,
    /// Only present once `printed`.
    pub backend_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Selection for [`list`]. Empty filter lists everything, newest first.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub account_id: Option<i64>,
    pub username: Option<String>,
    pub status: Option<JobStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

const COLUMNS: &str = "id, account_id, username, printer, filename, stored_path, pages, cost_cents, \
     is_duplex, is_color, sides, copies, page_range, balance_before_cents, balance_after_cents, \
     month_total_cents, year_total_cents, status, backend_job_id, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<PrintJob> {
    Ok(PrintJob {
        id: row.get(0)?,
        account_id: row.get(1)?,
        username: row.get(2)?,
        printer: row.get(3)?,
        filename: row.get(4)?,
        stored_path: row.get(5)?,
        pages: row.get(6)?,
        cost_cents: row.get(7)?,
        is_duplex: row.get(8)?,
        is_color: row.get(9)?,
        sides: row.get(10)?,
        copies: row.get(11)?,
        page_range: row.get(12)?,
        balance_before_cents: row.get(13)?,
        balance_after_cents: row.get(14)?,
        month_total_cents: row.get(15)?,
        year_total_cents: row.get(16)?,
        status: row.get(17)?,
        backend_job_id: row.get(18)?,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

/// Insert a job in the `queued` state and return its id.
pub fn insert_queued(conn: &Connection, job: &NewJob) -> rusqlite::Result<i64> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO print_jobs (
            account_id, username, printer, filename, stored_path, pages, cost_cents,
            is_duplex, is_color, sides, copies, page_range,
            balance_before_cents, balance_after_cents, month_total_cents, year_total_cents,
            status, backend_job_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, NULL, ?18, ?18)",
        params![
            job.account_id,
            job.username,
            job.printer,
            job.filename,
            job.stored_path,
            job.pages,
            job.cost_cents,
            job.is_duplex,
            job.is_color,
            job.sides,
            job.copies,
            job.page_range,
            job.balance_before_cents,
            job.balance_after_cents,
            job.month_total_cents,
            job.year_total_cents,
            JobStatus::Queued,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> rusqlite::Result<Option<PrintJob>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM print_jobs WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
}

/// `queued → printed`. Returns false when the job was not `queued`.
pub fn mark_printed(conn: &Connection, id: i64, backend_job_id: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE print_jobs SET status = ?1, backend_job_id = ?2, updated_at = ?3
          WHERE id = ?4 AND status = ?5",
        params![
            JobStatus::Printed,
            backend_job_id,
            Utc::now(),
            id,
            JobStatus::Queued
        ],
    )?;
    Ok(changed == 1)
}

/// `queued → failed`. Returns false when the job was not `queued`.
pub fn mark_failed(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE print_jobs SET status = ?1, backend_job_id = NULL, updated_at = ?2
          WHERE id = ?3 AND status = ?4",
        params![JobStatus::Failed, Utc::now(), id, JobStatus::Queued],
    )?;
    Ok(changed == 1)
}

pub fn list(conn: &Connection, filter: &JobFilter) -> rusqlite::Result<Vec<PrintJob>> {
    let mut conds: Vec<&str> = vec!["1 = 1"];
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(id) = filter.account_id {
        conds.push("account_id = ?");
        args.push(Box::new(id));
    }
    if let Some(name) = &filter.username {
        conds.push("username = ?");
        args.push(Box::new(name.clone()));
    }
    if let Some(status) = filter.status {
        conds.push("status = ?");
        args.push(Box::new(status));
    }
    if let Some(since) = filter.since {
        conds.push("created_at >= ?");
        args.push(Box::new(since));
    }
    if let Some(until) = filter.until {
        conds.push("created_at <= ?");
        args.push(Box::new(until));
    }

    let mut sql = format!(
        "SELECT {COLUMNS} FROM print_jobs WHERE {} ORDER BY created_at DESC, id DESC",
        conds.join(" AND ")
    );
    if let Some(limit) = filter.limit.filter(|&n| n > 0) {
        sql.push_str(" LIMIT ?");
        args.push(Box::new(limit));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter().map(|a| a.as_ref())), from_row)?;
    rows.collect()
}
