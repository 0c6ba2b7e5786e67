//! Price-history provider trait and raw provider output.
//!
//! The PriceHistoryProvider trait abstracts over remote sources so the cache
//! can be exercised against a mock in tests.

use crate::error::DataError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Raw daily OHLCV bar from a provider, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub adj_close: f64,
}

/// A remote source of daily price history.
///
/// Implementations return an empty list when the range holds no data;
/// deciding that an empty result is an error belongs to the cache layer.
pub trait PriceHistoryProvider: Send + Sync {
    /// Human-readable name of this provider, recorded as the source of
    /// cached tables.
    fn name(&self) -> &str;

    /// Fetch daily bars for `symbol` over `[start, end)`.
    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate)
        -> Result<Vec<RawBar>, DataError>;
}
