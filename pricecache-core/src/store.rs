//! Columnar table store.
//!
//! Layout: `{root}/{key}.parquet` plus a `{key}.meta.json` sidecar.
//!
//! - Atomic writes (write to a temp file, persist into place)
//! - The sidecar is written before the table, so a failed save leaves no entry
//! - Loads return the stored rows verbatim; no staleness or schema check
//! - Sidecar metadata (query, source, row count, content hash) for `cache status`

use crate::error::DataError;
use crate::query::CacheKey;
use crate::table::{Observation, ObservationTable};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Persistent keyed storage for observation tables.
pub trait TableStore: Send + Sync {
    fn exists(&self, key: &CacheKey) -> bool;

    fn load(&self, key: &CacheKey) -> Result<ObservationTable, DataError>;

    /// Persist `table` under `key`, replacing any previous entry.
    fn save(&self, table: &ObservationTable, key: &CacheKey) -> Result<(), DataError>;

    /// Persist a freshly fetched table, recording which provider it came from.
    /// Stores without provenance tracking fall back to [`TableStore::save`].
    fn save_fetched(
        &self,
        table: &ObservationTable,
        key: &CacheKey,
        _source: &str,
    ) -> Result<(), DataError> {
        self.save(table, key)
    }
}

/// Metadata sidecar for a cached table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub key: String,
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Provider name, when the table was saved straight from a fetch.
    pub source: Option<String>,
    pub row_count: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub data_hash: String,
    pub cached_at: chrono::NaiveDateTime,
}

/// One cached table as seen by a directory listing.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub size_bytes: u64,
    pub meta: Option<CacheMeta>,
}

/// Parquet-backed store rooted at an explicit directory.
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{key}.parquet`
    pub fn table_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{key}.parquet"))
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{key}.meta.json"))
    }

    /// Sidecar metadata for a key, if present and readable.
    pub fn get_meta(&self, key: &CacheKey) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(key)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// All cached tables under the root, sorted by key.
    ///
    /// A missing root is an empty cache, not an error.
    pub fn entries(&self) -> Result<Vec<CacheEntry>, DataError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let dir = fs::read_dir(&self.root)
            .map_err(|e| DataError::Storage(format!("read dir {}: {e}", self.root.display())))?;

        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| DataError::Storage(format!("dir entry: {e}")))?;
            let path = entry.path();

            // Skip sidecars and in-flight temp files
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(CacheKey::from_stem)
            else {
                continue;
            };

            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let meta = self.get_meta(&key);
            entries.push(CacheEntry {
                key,
                size_bytes,
                meta,
            });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Delete a cached table and its sidecar. Missing files are not an error.
    pub fn remove(&self, key: &CacheKey) -> Result<(), DataError> {
        for path in [self.table_path(key), self.meta_path(key)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(DataError::Storage(format!(
                        "remove {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Ok(())
    }

    fn write_meta(
        &self,
        table: &ObservationTable,
        key: &CacheKey,
        source: Option<&str>,
    ) -> Result<(), DataError> {
        let meta = CacheMeta {
            key: key.to_string(),
            symbol: key.symbol().to_string(),
            start: key.start(),
            end: key.end(),
            source: source.map(str::to_string),
            row_count: table.len(),
            first_date: table.first_date(),
            last_date: table.last_date(),
            data_hash: table.content_hash()?,
            cached_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::Storage(format!("meta serialization: {e}")))?;

        let mut tmp = NamedTempFile::new_in(&self.root)
            .map_err(|e| DataError::Storage(format!("create temp file: {e}")))?;
        tmp.write_all(meta_json.as_bytes())
            .map_err(|e| DataError::Storage(format!("meta write: {e}")))?;
        tmp.persist(self.meta_path(key))
            .map_err(|e| DataError::Storage(format!("meta write: {}", e.error)))?;
        Ok(())
    }
}

impl TableStore for ParquetStore {
    fn exists(&self, key: &CacheKey) -> bool {
        self.table_path(key).is_file()
    }

    fn load(&self, key: &CacheKey) -> Result<ObservationTable, DataError> {
        let path = self.table_path(key);
        log::debug!("reading {}", path.display());
        let df = read_parquet(&path)?;
        dataframe_to_table(&df)
    }

    fn save(&self, table: &ObservationTable, key: &CacheKey) -> Result<(), DataError> {
        self.write_entry(table, key, None)
    }

    fn save_fetched(
        &self,
        table: &ObservationTable,
        key: &CacheKey,
        source: &str,
    ) -> Result<(), DataError> {
        self.write_entry(table, key, Some(source))
    }
}

impl ParquetStore {
    /// Write the table to a uniquely named temp file, then the sidecar, then
    /// persist the table into place. The entry only becomes visible once
    /// everything before it has succeeded.
    fn write_entry(
        &self,
        table: &ObservationTable,
        key: &CacheKey,
        source: Option<&str>,
    ) -> Result<(), DataError> {
        fs::create_dir_all(&self.root).map_err(|e| {
            DataError::Storage(format!("failed to create {}: {e}", self.root.display()))
        })?;

        let path = self.table_path(key);
        let mut tmp = NamedTempFile::new_in(&self.root)
            .map_err(|e| DataError::Storage(format!("create temp file: {e}")))?;

        let mut df = table_to_dataframe(table)?;
        write_parquet(&mut df, tmp.as_file_mut())?;

        self.write_meta(table, key, source)?;

        if let Err(e) = tmp.persist(&path) {
            let _ = fs::remove_file(self.meta_path(key));
            return Err(DataError::Storage(format!("atomic rename failed: {}", e.error)));
        }

        log::debug!("wrote {} rows to {}", table.len(), path.display());
        Ok(())
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    // chrono's default date is 1970-01-01
    NaiveDate::default()
}

fn table_to_dataframe(table: &ObservationTable) -> Result<DataFrame, DataError> {
    let rows = table.rows();
    let dates: Vec<i32> = rows
        .iter()
        .map(|r| (r.date - epoch()).num_days() as i32)
        .collect();
    let closes: Vec<f64> = rows.iter().map(|r| r.close).collect();
    let volumes: Vec<i64> = rows.iter().map(|r| r.volume).collect();
    let log_returns: Vec<Option<f64>> = rows.iter().map(|r| r.log_return).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| DataError::Parquet(format!("date cast: {e}")))?,
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("log_return".into(), log_returns),
    ])
    .map_err(|e| DataError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, file: &mut fs::File) -> Result<(), DataError> {
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<DataFrame, DataError> {
    let file = fs::File::open(path)
        .map_err(|e| DataError::Storage(format!("open {}: {e}", path.display())))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::Parquet(format!("read: {e}")))
}

fn dataframe_to_table(df: &DataFrame) -> Result<ObservationTable, DataError> {
    let map_err = |e: PolarsError| DataError::Parquet(format!("column read: {e}"));

    let date_ca = df
        .column("date")
        .map_err(map_err)?
        .date()
        .map_err(|e| DataError::Parquet(format!("date column type: {e}")))?;
    let close_ca = df
        .column("close")
        .map_err(map_err)?
        .f64()
        .map_err(|e| DataError::Parquet(format!("close column type: {e}")))?;
    let vol_ca = df
        .column("volume")
        .map_err(map_err)?
        .i64()
        .map_err(|e| DataError::Parquet(format!("volume column type: {e}")))?;
    let ret_ca = df
        .column("log_return")
        .map_err(map_err)?
        .f64()
        .map_err(|e| DataError::Parquet(format!("log_return column type: {e}")))?;

    let epoch = epoch();
    let n = df.height();
    let mut rows = Vec::with_capacity(n);

    for i in 0..n {
        let date_days = date_ca
            .get(i)
            .ok_or_else(|| DataError::Parquet(format!("null date at row {i}")))?;

        rows.push(Observation {
            date: epoch + chrono::Duration::days(date_days as i64),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
            log_return: ret_ca.get(i),
        });
    }

    Ok(ObservationTable::from_rows(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RawBar;
    use crate::query::Query;

    fn sample_table() -> ObservationTable {
        let bars = [(2, 100.0, 1000), (3, 102.0, 1100), (4, 101.0, 900)]
            .into_iter()
            .map(|(day, close, volume)| RawBar {
                date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
                open: close,
                high: close,
                low: close,
                close,
                volume,
                adj_close: close,
            })
            .collect();
        ObservationTable::from_raw(bars).unwrap()
    }

    fn key() -> CacheKey {
        Query::parse("SPY", "2024-01-01", "2024-01-05")
            .unwrap()
            .cache_key()
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        let table = sample_table();

        assert!(!store.exists(&key()));
        store.save(&table, &key()).unwrap();
        assert!(store.exists(&key()));

        let loaded = store.load(&key()).unwrap();
        assert_eq!(loaded, table);
        assert_eq!(loaded.rows()[0].log_return, None);
    }

    #[test]
    fn save_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path().join("nested").join("data"));

        store.save(&sample_table(), &key()).unwrap();
        assert!(store.table_path(&key()).is_file());
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        store.save(&sample_table(), &key()).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(
            names
                .iter()
                .all(|n| n.ends_with(".parquet") || n.ends_with(".meta.json")),
            "{names:?}"
        );
    }

    #[test]
    fn save_overwrites_previous_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        store.save(&sample_table(), &key()).unwrap();

        let shorter = ObservationTable::from_rows(sample_table().head(1).to_vec());
        store.save(&shorter, &key()).unwrap();
        assert_eq!(store.load(&key()).unwrap().len(), 1);
    }

    #[test]
    fn load_missing_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        assert!(matches!(store.load(&key()), Err(DataError::Storage(_))));
    }

    #[test]
    fn load_corrupt_file_is_parquet_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        fs::write(store.table_path(&key()), b"not parquet").unwrap();
        assert!(matches!(store.load(&key()), Err(DataError::Parquet(_))));
    }

    #[test]
    fn meta_sidecar_records_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        let table = sample_table();
        store.save(&table, &key()).unwrap();

        let meta = store.get_meta(&key()).unwrap();
        assert_eq!(meta.key, key().as_str());
        assert_eq!(meta.symbol, "SPY");
        assert_eq!(meta.start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(meta.end, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(meta.source, None);
        assert_eq!(meta.row_count, 3);
        assert_eq!(meta.first_date, NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(meta.last_date, NaiveDate::from_ymd_opt(2024, 1, 4));
        assert_eq!(meta.data_hash, table.content_hash().unwrap());
    }

    #[test]
    fn save_fetched_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        store
            .save_fetched(&sample_table(), &key(), "yahoo_finance")
            .unwrap();

        let meta = store.get_meta(&key()).unwrap();
        assert_eq!(meta.source.as_deref(), Some("yahoo_finance"));
        assert_eq!(store.load(&key()).unwrap(), sample_table());
    }

    #[test]
    fn failed_sidecar_write_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        fs::create_dir_all(dir.path().join(format!("{}.meta.json", key()))).unwrap();

        let err = store.save(&sample_table(), &key()).unwrap_err();
        assert!(matches!(err, DataError::Storage(_)));
        assert!(!store.exists(&key()));

        let leftovers: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| !n.ends_with(".meta.json"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn racing_stores_on_one_key_leave_a_readable_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = sample_table();

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let store = ParquetStore::new(dir.path());
                    for _ in 0..5 {
                        store.save(&table, &key()).unwrap();
                    }
                });
            }
        });

        let store = ParquetStore::new(dir.path());
        assert_eq!(store.load(&key()).unwrap(), table);
        assert_eq!(store.entries().unwrap().len(), 1);
    }

    #[test]
    fn entries_lists_only_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        assert!(store.entries().unwrap().is_empty());

        let other = Query::parse("QQQ", "2024-01-01", "2024-01-05")
            .unwrap()
            .cache_key();
        store.save(&sample_table(), &key()).unwrap();
        store.save(&sample_table(), &other).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let entries = store.entries().unwrap();
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["QQQ_2024-01-01_2024-01-05", "SPY_2024-01-01_2024-01-05"]);
        assert!(entries.iter().all(|e| e.size_bytes > 0 && e.meta.is_some()));
    }

    #[test]
    fn entries_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path().join("absent"));
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn remove_deletes_table_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        store.save(&sample_table(), &key()).unwrap();

        store.remove(&key()).unwrap();
        assert!(!store.exists(&key()));
        assert!(store.get_meta(&key()).is_none());
        // Removing again is a no-op
        store.remove(&key()).unwrap();
    }
}
