//! pricecache core: daily price history with log returns, cached as Parquet.
//!
//! - `Query` / `CacheKey` identify a (symbol, start, end) request
//! - `PriceHistoryProvider` fetches raw bars (Yahoo Finance implementation)
//! - `TableStore` persists normalized tables (Parquet implementation)
//! - `SeriesCache` decides between the two and normalizes on a miss

pub mod config;
pub mod error;
pub mod provider;
pub mod query;
pub mod series_cache;
pub mod store;
pub mod table;
pub mod yahoo;

pub use config::{CacheConfig, ProviderConfig};
pub use error::DataError;
pub use provider::{PriceHistoryProvider, RawBar};
pub use query::{CacheKey, Query};
pub use series_cache::SeriesCache;
pub use store::{CacheEntry, CacheMeta, ParquetStore, TableStore};
pub use table::{Observation, ObservationTable};
pub use yahoo::YahooProvider;
