//! Append-only credit ledger.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopupKind {
    /// An operator added funds.
    Manual,
    /// A failed print's debit was returned.
    Refund,
}

super::text_enum!(TopupKind {
    Manual => "manual",
    Refund => "refund",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopupRecord {
    pub id: i64,
    pub account_id: i64,
    pub amount_cents: i64,
    pub balance_before_cents: i64,
    pub balance_after_cents: i64,
    pub kind: TopupKind,
    pub operator_name: String,
    /// Set for refunds.
    pub job_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTopup {
    pub account_id: i64,
    pub amount_cents: i64,
    pub balance_before_cents: i64,
    pub balance_after_cents: i64,
    pub kind: TopupKind,
    pub operator_name: String,
    pub job_id: Option<i64>,
}

const COLUMNS: &str = "id, account_id, amount_cents, balance_before_cents, balance_after_cents, \
     kind, operator_name, job_id, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<TopupRecord> {
    Ok(TopupRecord {
        id: row.get(0)?,
        account_id: row.get(1)?,
        amount_cents: row.get(2)?,
        balance_before_cents: row.get(3)?,
        balance_after_cents: row.get(4)?,
        kind: row.get(5)?,
        operator_name: row.get(6)?,
        job_id: row.get(7)?,
        created_at: row.get(8)?,
    })
}

pub fn insert(conn: &Connection, new: &NewTopup) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO topups (account_id, amount_cents, balance_before_cents, balance_after_cents,
                             kind, operator_name, job_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            new.account_id,
            new.amount_cents,
            new.balance_before_cents,
            new.balance_after_cents,
            new.kind,
            new.operator_name,
            new.job_id,
            Utc::now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> rusqlite::Result<Option<TopupRecord>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM topups WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
}

/// Newest first.
pub fn for_account(conn: &Connection, account_id: i64) -> rusqlite::Result<Vec<TopupRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM topups WHERE account_id = ?1 ORDER BY id DESC"
    ))?;
    let rows = stmt.query_map(params![account_id], from_row)?;
    rows.collect()
}

pub fn for_job(conn: &Connection, job_id: i64) -> rusqlite::Result<Vec<TopupRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM topups WHERE job_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![job_id], from_row)?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Period;
    use crate::store::accounts::{self, NewAccount, Role};

    #[test]
    fn insert_and_list_newest_first() {
        let conn = super::super::memory_connection();
        let acct = accounts::insert(
            &conn,
            &NewAccount {
                username: "bob".into(),
                role: Role::User,
                balance_cents: 0,
                monthly_limit_cents: 0,
                yearly_limit_cents: 0,
            },
            &Period::new(2024, 5),
        )
        .unwrap();

        for (amount, before) in [(100, 0), (250, 100)] {
            insert(
                &conn,
                &NewTopup {
                    account_id: acct.id,
                    amount_cents: amount,
                    balance_before_cents: before,
                    balance_after_cents: before + amount,
                    kind: TopupKind::Manual,
                    operator_name: "admin".into(),
                    job_id: None,
                },
            )
            .unwrap();
        }

        let rows = for_account(&conn, acct.id).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].amount_cents, 250);
        assert_eq!(rows[0].balance_after_cents, 350);
        assert_eq!(rows[1].kind, TopupKind::Manual);
        assert!(for_job(&conn, 1).unwrap().is_empty());
    }
}
