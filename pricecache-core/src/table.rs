//! Normalized observation table: close, volume and log return per date.

use crate::error::DataError;
use crate::provider::RawBar;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One normalized row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub close: f64,
    pub volume: i64,
    /// `ln(close[t] / close[t-1])`; `None` on the first row.
    pub log_return: Option<f64>,
}

/// Rows sorted ascending by date. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObservationTable {
    rows: Vec<Observation>,
}

impl ObservationTable {
    /// Normalize raw provider bars: keep close and volume, sort by date and
    /// derive the log return column. Every input bar yields one row.
    pub fn from_raw(mut bars: Vec<RawBar>) -> Result<Self, DataError> {
        bars.sort_by_key(|b| b.date);

        let mut rows = Vec::with_capacity(bars.len());
        let mut prev_close: Option<f64> = None;

        for bar in bars {
            let volume = i64::try_from(bar.volume).map_err(|_| {
                DataError::Other(format!(
                    "volume {} on {} does not fit in i64",
                    bar.volume, bar.date
                ))
            })?;

            rows.push(Observation {
                date: bar.date,
                close: bar.close,
                volume,
                log_return: prev_close.map(|prev| log_return(prev, bar.close)),
            });
            prev_close = Some(bar.close);
        }

        Ok(Self { rows })
    }

    /// Wrap rows that are already normalized, as read back from storage.
    pub fn from_rows(rows: Vec<Observation>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The first `n` rows (fewer if the table is shorter).
    pub fn head(&self, n: usize) -> &[Observation] {
        &self.rows[..n.min(self.rows.len())]
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.date)
    }

    /// Close prices in date order.
    pub fn closes(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.close).collect()
    }

    /// Log returns in date order, `None` where undefined.
    pub fn log_returns(&self) -> Vec<Option<f64>> {
        self.rows.iter().map(|r| r.log_return).collect()
    }

    /// Content hash of the rows, recorded in cache metadata.
    pub fn content_hash(&self) -> Result<String, DataError> {
        let bytes = serde_json::to_vec(&self.rows)
            .map_err(|e| DataError::Other(format!("hash serialization: {e}")))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

/// Natural log of the ratio of consecutive closes.
///
/// Non-positive or NaN closes produce NaN/±inf exactly as `f64::ln` does; the
/// value is reported, not rejected.
pub fn log_return(prev_close: f64, close: f64) -> f64 {
    (close / prev_close).ln()
}
