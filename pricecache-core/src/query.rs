//! Query identity and cache key derivation.

use crate::error::DataError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Date spellings accepted from callers. Chrono parses numeric fields
/// leniently, so `2018-1-1` matches the first format.
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// Punctuation allowed in a symbol besides ASCII alphanumerics
/// (`BRK-B`, `^GSPC`, `EURUSD=X`, `RDS.A`).
const SYMBOL_PUNCTUATION: &[char] = &['.', '-', '^', '=', '_'];

/// A request for one symbol's daily history over a date range.
///
/// Immutable once built; `new` and `parse` are the only constructors and both
/// enforce `start <= end` and a non-empty, file-name-safe symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "QueryFields")]
pub struct Query {
    symbol: String,
    start: NaiveDate,
    end: NaiveDate,
}

impl Query {
    pub fn new(symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Self, DataError> {
        let symbol = symbol.trim();
        validate_symbol(symbol)?;

        if start > end {
            return Err(DataError::InvalidQuery(format!(
                "start date {start} is after end date {end}"
            )));
        }

        Ok(Self {
            symbol: symbol.to_string(),
            start,
            end,
        })
    }

    /// Build a query from caller-supplied date strings.
    pub fn parse(symbol: &str, start: &str, end: &str) -> Result<Self, DataError> {
        Self::new(symbol, parse_date(start)?, parse_date(end)?)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Key under which this query's table is stored.
    ///
    /// Dates render as ISO 8601, so two spellings of the same day share a key.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.symbol, self.start, self.end)
    }
}

/// Unvalidated wire form; deserialization goes through [`Query::new`].
#[derive(Deserialize)]
struct QueryFields {
    symbol: String,
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<QueryFields> for Query {
    type Error = DataError;

    fn try_from(fields: QueryFields) -> Result<Self, Self::Error> {
        Query::new(&fields.symbol, fields.start, fields.end)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}..{}", self.symbol, self.start, self.end)
    }
}

/// Deterministic storage identifier derived from a [`Query`].
///
/// Renders as `{symbol}_{start}_{end}` and keeps the parts it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    stem: String,
    symbol: String,
    start: NaiveDate,
    end: NaiveDate,
}

impl CacheKey {
    fn new(symbol: &str, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            stem: format!("{symbol}_{start}_{end}"),
            symbol: symbol.to_string(),
            start,
            end,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.stem
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Recover a key from a stored file stem, checking it has the
    /// `{symbol}_{start}_{end}` shape. Symbols may themselves contain `_`.
    pub fn from_stem(stem: &str) -> Option<Self> {
        let mut parts = stem.rsplitn(3, '_');
        let end = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
        let start = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
        let symbol = parts.next()?;
        if validate_symbol(symbol).is_err() {
            return None;
        }
        let key = Self::new(symbol, start, end);
        // Reject stems whose dates are not in canonical form
        (key.stem == stem).then_some(key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem)
    }
}

/// Parse a date in any of the accepted spellings.
pub fn parse_date(s: &str) -> Result<NaiveDate, DataError> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .ok_or_else(|| DataError::InvalidQuery(format!("unrecognized date '{s}' (want YYYY-MM-DD)")))
}

fn validate_symbol(symbol: &str) -> Result<(), DataError> {
    if symbol.is_empty() {
        return Err(DataError::InvalidQuery("symbol is empty".into()));
    }
    if symbol.contains("..") {
        return Err(DataError::InvalidQuery(format!(
            "symbol '{symbol}' contains '..'"
        )));
    }
    if let Some(bad) = symbol
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !SYMBOL_PUNCTUATION.contains(c))
    {
        return Err(DataError::InvalidQuery(format!(
            "symbol '{symbol}' contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn key_uses_symbol_and_iso_dates() {
        let q = Query::parse("SPY", "2018-01-01", "2024-01-01").unwrap();
        assert_eq!(q.cache_key().as_str(), "SPY_2018-01-01_2024-01-01");
    }

    #[test]
    fn different_spellings_share_a_key() {
        let a = Query::parse("SPY", "2018-01-01", "2018-01-05").unwrap();
        let b = Query::parse("SPY", "2018-1-1", "2018/1/5").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn same_query_same_key() {
        let q = Query::new("QQQ", date(2020, 3, 1), date(2020, 6, 30)).unwrap();
        assert_eq!(q.cache_key(), q.clone().cache_key());
    }

    #[test]
    fn symbol_is_trimmed() {
        let q = Query::new("  AAPL ", date(2020, 1, 1), date(2020, 1, 2)).unwrap();
        assert_eq!(q.symbol(), "AAPL");
    }

    #[test]
    fn start_equal_to_end_is_allowed() {
        assert!(Query::new("SPY", date(2020, 1, 2), date(2020, 1, 2)).is_ok());
    }

    #[test]
    fn start_after_end_is_rejected() {
        let err = Query::new("SPY", date(2020, 1, 3), date(2020, 1, 2)).unwrap_err();
        assert!(matches!(err, DataError::InvalidQuery(_)));
    }

    #[test]
    fn empty_symbol_is_rejected() {
        assert!(Query::new("   ", date(2020, 1, 1), date(2020, 1, 2)).is_err());
    }

    #[test]
    fn path_like_symbols_are_rejected() {
        for bad in ["../etc", "a/b", "a\\b", "SP Y", "..", "A:B"] {
            assert!(
                Query::new(bad, date(2020, 1, 1), date(2020, 1, 2)).is_err(),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn exchange_style_symbols_are_accepted() {
        for ok in ["BRK-B", "^GSPC", "EURUSD=X", "RDS.A", "BTC_USD"] {
            assert!(Query::new(ok, date(2020, 1, 1), date(2020, 1, 2)).is_ok());
        }
    }

    #[test]
    fn garbage_date_is_rejected() {
        assert!(matches!(
            Query::parse("SPY", "yesterday", "2020-01-01"),
            Err(DataError::InvalidQuery(_))
        ));
    }

    #[test]
    fn key_from_stem_handles_underscored_symbols() {
        let key = CacheKey::from_stem("BTC_USD_2020-01-01_2020-02-01").unwrap();
        assert_eq!(key.as_str(), "BTC_USD_2020-01-01_2020-02-01");
        assert_eq!(key.symbol(), "BTC_USD");
        assert_eq!(key.start(), date(2020, 1, 1));
        assert_eq!(key.end(), date(2020, 2, 1));
        assert!(CacheKey::from_stem("notakey").is_none());
        assert!(CacheKey::from_stem("SPY_2020-01-01_later").is_none());
        assert!(CacheKey::from_stem("SPY_2020-1-1_2020-02-01").is_none());
    }

    #[test]
    fn cache_key_keeps_its_parts() {
        let key = Query::parse("SPY", "2018-1-1", "2018-01-05").unwrap().cache_key();
        assert_eq!(key.symbol(), "SPY");
        assert_eq!(key.start(), date(2018, 1, 1));
        assert_eq!(key.end(), date(2018, 1, 5));
        assert_eq!(CacheKey::from_stem(key.as_str()), Some(key));
    }

    #[test]
    fn deserialize_validates_like_new() {
        let q: Query =
            serde_json::from_str(r#"{"symbol":"SPY","start":"2018-01-01","end":"2018-01-05"}"#)
                .unwrap();
        assert_eq!(q.cache_key().as_str(), "SPY_2018-01-01_2018-01-05");

        let traversal =
            serde_json::from_str::<Query>(r#"{"symbol":"../x","start":"2018-01-01","end":"2018-01-05"}"#);
        assert!(traversal.is_err());

        let reversed =
            serde_json::from_str::<Query>(r#"{"symbol":"SPY","start":"2018-01-05","end":"2018-01-01"}"#);
        assert!(reversed.is_err());
    }
}
