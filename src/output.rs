//! Response types for the request surface. Field names are camelCase on the
//! wire.

use crate::error::PrintError;
use serde::{Deserialize, Serialize};

/// Dry-run pricing for an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateResponse {
    pub pages: u32,
    /// True when `pages` comes from a heuristic.
    pub estimated: bool,
    pub per_page_cents: i64,
    pub color_page_cents: i64,
    pub cost_cents: i64,
    pub balance_cents: i64,
    pub month_spent_cents: i64,
    pub year_spent_cents: i64,
    pub monthly_limit_cents: i64,
    pub yearly_limit_cents: i64,
    pub insufficient_balance: bool,
    pub would_exceed_monthly: bool,
    pub would_exceed_yearly: bool,
}

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintResponse {
    /// Identifier assigned by the print backend.
    pub job_id: String,
    pub ok: bool,
    pub pages: u32,
    pub cost_cents: i64,
    pub balance_cents: i64,
    pub month_spent_cents: i64,
    pub year_spent_cents: i64,
    pub is_duplex: bool,
    pub is_color: bool,
}

/// Error body for the request surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub reason: String,
    #[serde(skip)]
    pub status: u16,
}

impl From<&PrintError> for ErrorResponse {
    fn from(e: &PrintError) -> Self {
        Self {
            error: e.to_string(),
            reason: e.reason().to_string(),
            status: e.status_code(),
        }
    }
}
