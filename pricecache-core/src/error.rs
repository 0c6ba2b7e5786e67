//! Structured error type for every data operation in the crate.
//!
//! Variants carry strings rather than source errors so they display the same
//! way in the CLI and in logs.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("No data found for '{symbol}' ({start} to {end}); check symbol or date range")]
    NoData {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// True for the empty-result case, the one failure callers usually want to
    /// tell apart from collaborator failures.
    pub fn is_no_data(&self) -> bool {
        matches!(self, DataError::NoData { .. })
    }
}
