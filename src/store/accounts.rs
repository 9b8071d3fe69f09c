//! Account rows: identity, balance, spend counters and limits.

use crate::error::PrintError;
use crate::ledger::Period;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

super::text_enum!(Role {
    Admin => "admin",
    User => "user",
});

/// A ledger account. All amounts are integer minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub balance_cents: i64,
    pub month_spent_cents: i64,
    pub year_spent_cents: i64,
    /// `YYYY-MM` of the month `month_spent_cents` belongs to.
    pub month_period: String,
    /// `YYYY` of the year `year_spent_cents` belongs to.
    pub year_period: String,
    /// 0 means unlimited.
    pub monthly_limit_cents: i64,
    /// 0 means unlimited.
    pub yearly_limit_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`insert`].
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub role: Role,
    pub balance_cents: i64,
    pub monthly_limit_cents: i64,
    pub yearly_limit_cents: i64,
}

const COLUMNS: &str = "id, username, role, balance_cents, month_spent_cents, year_spent_cents, \
     month_period, year_period, monthly_limit_cents, yearly_limit_cents, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        username: row.get(1)?,
        role: row.get(2)?,
        balance_cents: row.get(3)?,
        month_spent_cents: row.get(4)?,
        year_spent_cents: row.get(5)?,
        month_period: row.get(6)?,
        year_period: row.get(7)?,
        monthly_limit_cents: row.get(8)?,
        yearly_limit_cents: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Create an account whose period tags start at `period`.
pub fn insert(conn: &Connection, new: &NewAccount, period: &Period) -> Result<Account, PrintError> {
    let username = new.username.trim();
    if username.is_empty() {
        return Err(PrintError::MissingField { field: "username" });
    }
    for (field, value) in [
        ("balance", new.balance_cents),
        ("monthly_limit", new.monthly_limit_cents),
        ("yearly_limit", new.yearly_limit_cents),
    ] {
        if value < 0 {
            return Err(PrintError::InvalidField {
                field,
                reason: format!("must not be negative, got {value}"),
            });
        }
    }

    let now = Utc::now();
    conn.execute(
        "INSERT INTO accounts (username, role, balance_cents, month_period, year_period,
                               monthly_limit_cents, yearly_limit_cents, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            username,
            new.role,
            new.balance_cents,
            period.month,
            period.year,
            new.monthly_limit_cents,
            new.yearly_limit_cents,
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    get(conn, id)?.ok_or(PrintError::AccountNotFound { account_id: id })
}

pub fn get(conn: &Connection, id: i64) -> rusqlite::Result<Option<Account>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM accounts WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
}

pub fn by_username(conn: &Connection, username: &str) -> rusqlite::Result<Option<Account>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM accounts WHERE username = ?1"),
        params![username],
        from_row,
    )
    .optional()
}

pub fn list(conn: &Connection) -> rusqlite::Result<Vec<Account>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM accounts ORDER BY id"))?;
    let rows = stmt.query_map([], from_row)?;
    rows.collect()
}

/// Persist the balance, spend counters and period tags of `account`.
pub fn save_ledger(conn: &Connection, account: &Account) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE accounts
            SET balance_cents = ?1, month_spent_cents = ?2, year_spent_cents = ?3,
                month_period = ?4, year_period = ?5, updated_at = ?6
          WHERE id = ?7",
        params![
            account.balance_cents,
            account.month_spent_cents,
            account.year_spent_cents,
            account.month_period,
            account.year_period,
            Utc::now(),
            account.id,
        ],
    )?;
    Ok(())
}
