//! TOML configuration for the cache and its provider.

use crate::error::DataError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_STORAGE_ROOT: &str = "data";
const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Top-level configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Directory holding cached tables.
    pub storage_root: PathBuf,

    pub provider: ProviderConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            provider: ProviderConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn from_toml(s: &str) -> Result<Self, DataError> {
        toml::from_str(s).map_err(|e| DataError::Config(format!("invalid TOML: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self, DataError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DataError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Replace the storage root, e.g. from a command-line override.
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }
}

/// HTTP settings for the Yahoo provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = CacheConfig::from_toml("").unwrap();
        assert_eq!(cfg, CacheConfig::default());
        assert_eq!(cfg.storage_root, PathBuf::from("data"));
        assert_eq!(cfg.provider.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_provider_section_keeps_other_defaults() {
        let cfg = CacheConfig::from_toml(
            r#"
storage_root = "/var/cache/prices"

[provider]
timeout_secs = 5
"#,
        )
        .unwrap();
        assert_eq!(cfg.storage_root, PathBuf::from("/var/cache/prices"));
        assert_eq!(cfg.provider.timeout_secs, 5);
        assert_eq!(cfg.provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = CacheConfig::from_toml("cache_dir = \"x\"").unwrap_err();
        assert!(matches!(err, DataError::Config(_)));
    }

    #[test]
    fn storage_root_override() {
        let cfg = CacheConfig::default().with_storage_root("elsewhere");
        assert_eq!(cfg.storage_root, PathBuf::from("elsewhere"));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricecache.toml");
        std::fs::write(&path, "storage_root = \"cache\"\n").unwrap();
        let cfg = CacheConfig::from_file(&path).unwrap();
        assert_eq!(cfg.storage_root, PathBuf::from("cache"));

        assert!(CacheConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
