//! Cache-or-fetch resolution of a [`Query`] to an [`ObservationTable`].
//!
//! A hit returns the stored table untouched. A miss fetches from the provider,
//! normalizes once, persists, and only then returns.

use crate::config::CacheConfig;
use crate::error::DataError;
use crate::provider::PriceHistoryProvider;
use crate::query::{CacheKey, Query};
use crate::store::{ParquetStore, TableStore};
use crate::table::ObservationTable;
use crate::yahoo::YahooProvider;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Resolves queries against a local store, falling back to a remote provider.
pub struct SeriesCache<P, S> {
    provider: P,
    store: S,
    key_locks: KeyLocks,
}

impl SeriesCache<YahooProvider, ParquetStore> {
    /// Yahoo-backed cache over Parquet files in `config.storage_root`.
    pub fn from_config(config: &CacheConfig) -> Result<Self, DataError> {
        let provider = YahooProvider::new(&config.provider)?;
        let store = ParquetStore::new(&config.storage_root);
        Ok(Self::new(provider, store))
    }
}

impl<P: PriceHistoryProvider, S: TableStore> SeriesCache<P, S> {
    pub fn new(provider: P, store: S) -> Self {
        Self {
            provider,
            store,
            key_locks: KeyLocks::default(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return the table for `query`, downloading and caching it on a miss.
    ///
    /// Fails with [`DataError::NoData`] when the provider has no rows for the
    /// range; nothing is written in that case. Provider and store errors are
    /// returned as-is, and a table is never returned unless it was persisted.
    pub fn fetch(&self, query: &Query) -> Result<ObservationTable, DataError> {
        let key = query.cache_key();

        let lock = self.key_locks.lock_for(&key);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.fetch_locked(query, &key)
        };
        self.key_locks.release(&key, &lock);
        result
    }

    /// Body of [`fetch`](Self::fetch), run while holding the key's lock.
    fn fetch_locked(&self, query: &Query, key: &CacheKey) -> Result<ObservationTable, DataError> {
        if self.store.exists(&key) {
            log::info!("Loading {} from cache...", query.symbol());
            let table = self.store.load(key)?;
            log::debug!("cache hit {key}: {} rows", table.len());
            return Ok(table);
        }

        log::info!(
            "Downloading {} from {}...",
            query.symbol(),
            self.provider.name()
        );
        let bars = self
            .provider
            .fetch(query.symbol(), query.start(), query.end())?;

        if bars.is_empty() {
            log::warn!("provider returned no rows for {query}");
            return Err(DataError::NoData {
                symbol: query.symbol().to_string(),
                start: query.start(),
                end: query.end(),
            });
        }

        let table = ObservationTable::from_raw(bars)?;
        self.store.save_fetched(&table, key, self.provider.name())?;
        log::debug!(
            "cached {key}: {} rows from {}",
            table.len(),
            self.provider.name()
        );

        Ok(table)
    }
}

/// One mutex per cache key, so concurrent fetches of the same query in this
/// process run one at a time while different keys proceed independently.
///
/// Entries live only while some fetch holds or waits on them; the map stays
/// bounded by the number of keys in flight.
#[derive(Default)]
struct KeyLocks {
    locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn lock_for(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Drop the map's entry for `key` once `lock` is the last handle on it
    /// outside the map. Waiters cloned their handle under the map mutex, so
    /// a count of two means nobody else can still be queued on it.
    fn release(&self, key: &CacheKey, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = locks.get(key) {
            if Arc::ptr_eq(entry, lock) && Arc::strong_count(entry) == 2 {
                locks.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
