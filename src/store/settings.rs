//! Integer key/value settings. Pricing is the only consumer today.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const PER_PAGE_CENTS: &str = "per_page_cents";
pub const COLOR_PAGE_CENTS: &str = "color_page_cents";

pub const DEFAULT_PER_PAGE_CENTS: i64 = 10;
pub const DEFAULT_COLOR_PAGE_CENTS: i64 = 30;

/// Read an integer setting, falling back to `default` when the key is absent
/// or holds something that is not an integer.
pub fn get_int(conn: &Connection, key: &str, default: i64) -> rusqlite::Result<i64> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    Ok(match raw {
        None => default,
        Some(value) => match value.trim().parse::<i64>() {
            Ok(n) => n,
            Err(_) => {
                warn!(key, value = %value, "Setting is not an integer, using default {default}");
                default
            }
        },
    })
}

pub fn set_int(conn: &Connection, key: &str, value: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value.to_string()],
    )?;
    Ok(())
}

/// Per-page prices in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    pub per_page_cents: i64,
    pub color_page_cents: i64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            per_page_cents: DEFAULT_PER_PAGE_CENTS,
            color_page_cents: DEFAULT_COLOR_PAGE_CENTS,
        }
    }
}

impl Pricing {
    /// Load both prices. A negative stored price is ignored in favour of the
    /// default; it would turn a debit into a credit.
    pub fn load(conn: &Connection) -> rusqlite::Result<Self> {
        let per_page = get_int(conn, PER_PAGE_CENTS, DEFAULT_PER_PAGE_CENTS)?;
        let color = get_int(conn, COLOR_PAGE_CENTS, DEFAULT_COLOR_PAGE_CENTS)?;
        Ok(Self {
            per_page_cents: non_negative(PER_PAGE_CENTS, per_page, DEFAULT_PER_PAGE_CENTS),
            color_page_cents: non_negative(COLOR_PAGE_CENTS, color, DEFAULT_COLOR_PAGE_CENTS),
        })
    }

    pub fn save(&self, conn: &Connection) -> rusqlite::Result<()> {
        set_int(conn, PER_PAGE_CENTS, self.per_page_cents)?;
        set_int(conn, COLOR_PAGE_CENTS, self.color_page_cents)
    }

    pub fn price_for(&self, color: bool) -> i64 {
        if color {
            self.color_page_cents
        } else {
            self.per_page_cents
        }
    }
}

fn non_negative(key: &str, value: i64, default: i64) -> i64 {
    if value < 0 {
        warn!(key, value, "Negative price, using default {default}");
        default
    } else {
        value
    }
}
