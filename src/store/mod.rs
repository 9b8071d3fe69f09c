//! SQLite storage for accounts, pricing settings, print jobs and top-ups.
//!
//! Schema:
//! - accounts: balance, spend counters with their period tags, spend limits
//! - settings: key/value pricing knobs
//! - print_jobs: one row per submission that reached the debit, never deleted
//! - topups: append-only credit ledger (manual top-ups and refunds)
//!
//! There is no long-lived connection. [`Store`] is a cheap handle around the
//! database path; every transaction opens its own connection on the blocking
//! pool, so concurrent submissions contend on SQLite's lock and nothing else.

pub mod accounts;
pub mod jobs;
pub mod settings;
pub mod topups;

pub use accounts::{Account, NewAccount, Role};
pub use jobs::{JobFilter, JobStatus, NewJob, PrintJob};
pub use settings::Pricing;
pub use topups::{NewTopup, TopupKind, TopupRecord};

use crate::error::PrintError;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How long a writer waits for the database lock before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL,
    balance_cents INTEGER NOT NULL DEFAULT 0,
    month_spent_cents INTEGER NOT NULL DEFAULT 0,
    year_spent_cents INTEGER NOT NULL DEFAULT 0,
    month_period TEXT NOT NULL DEFAULT '',
    year_period TEXT NOT NULL DEFAULT '',
    monthly_limit_cents INTEGER NOT NULL DEFAULT 0,
    yearly_limit_cents INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS print_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL,
    username TEXT NOT NULL,
    printer TEXT NOT NULL,
    filename TEXT NOT NULL,
    stored_path TEXT NOT NULL,
    pages INTEGER NOT NULL,
    cost_cents INTEGER NOT NULL,
    is_duplex INTEGER NOT NULL DEFAULT 0,
    is_color INTEGER NOT NULL DEFAULT 0,
    sides TEXT NOT NULL,
    copies INTEGER NOT NULL DEFAULT 1,
    page_range TEXT,
    balance_before_cents INTEGER NOT NULL,
    balance_after_cents INTEGER NOT NULL,
    month_total_cents INTEGER NOT NULL,
    year_total_cents INTEGER NOT NULL,
    status TEXT NOT NULL,
    backend_job_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS topups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL,
    amount_cents INTEGER NOT NULL,
    balance_before_cents INTEGER NOT NULL,
    balance_after_cents INTEGER NOT NULL,
    kind TEXT NOT NULL,
    operator_name TEXT NOT NULL,
    job_id INTEGER,
    created_at TEXT NOT NULL,
    FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
    FOREIGN KEY (job_id) REFERENCES print_jobs(id)
);

CREATE INDEX IF NOT EXISTS idx_print_jobs_account ON print_jobs(account_id);
CREATE INDEX IF NOT EXISTS idx_print_jobs_status ON print_jobs(status);
CREATE INDEX IF NOT EXISTS idx_topups_account ON topups(account_id);
";

/// Implements `Display`, `FromStr`, `ToSql` and `FromSql` for a fieldless
/// enum persisted as lowercase text.
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($ty), other)),
                }
            }
        }

        impl rusqlite::types::ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl rusqlite::types::FromSql for $ty {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| rusqlite::types::FromSqlError::Other(e.into()))
            }
        }
    };
}

pub(crate) use text_enum;

/// Handle to the printmeter database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    path: Arc<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxMode {
    ReadOnly,
    Write,
}

impl Store {
    /// Open or create the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PrintError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                PrintError::Internal(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;",
        )?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened store at {}", path.display());
        Ok(Self {
            path: Arc::new(path),
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction and commit if it
    /// returns `Ok`. Any error rolls the whole transaction back.
    pub async fn write<T, F>(&self, f: F) -> Result<T, PrintError>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T, PrintError> + Send + 'static,
    {
        self.run(TxMode::Write, f).await
    }

    /// Run `f` inside a read-only transaction. The connection is put into
    /// `query_only` mode, so an accidental write fails instead of persisting.
    pub async fn read<T, F>(&self, f: F) -> Result<T, PrintError>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T, PrintError> + Send + 'static,
    {
        self.run(TxMode::ReadOnly, f).await
    }

    async fn run<T, F>(&self, mode: TxMode, f: F) -> Result<T, PrintError>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T, PrintError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.run_blocking(mode, f))
            .await
            .map_err(|e| PrintError::Internal(format!("storage task failed: {e}")))?
    }

    fn run_blocking<T, F>(&self, mode: TxMode, f: F) -> Result<T, PrintError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, PrintError>,
    {
        let mut conn = self.connect()?;
        match mode {
            TxMode::ReadOnly => {
                conn.execute_batch("PRAGMA query_only = ON;")?;
                let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
                // Dropping the transaction rolls it back.
                f(&tx)
            }
            TxMode::Write => {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let out = f(&tx)?;
                tx.commit()?;
                debug!("Committed write transaction");
                Ok(out)
            }
        }
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(self.path.as_path())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }
}

/// In-memory database with the schema applied, for unit tests.
#[cfg(test)]
pub(crate) fn memory_connection() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory sqlite");
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .expect("foreign keys");
    conn.execute_batch(SCHEMA).expect("schema");
    conn
}
