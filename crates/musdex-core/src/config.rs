use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const MAX_SETTLE_DELAY_MS: u64 = 5_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Where the catalog database lives. Falls back to the platform data dir.
    pub data_dir: Option<PathBuf>,
    pub sync: SyncConfig,
}

impl AppConfig {
    pub fn from_json_file(path: &Path) -> crate::error::Result<Self> {
        let raw = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&raw)
            .map_err(|err| ConfigValidationError::Malformed(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if let Some(dir) = &self.data_dir {
            if dir.as_os_str().is_empty() {
                return Err(ConfigValidationError::EmptyDataDir);
            }
        }
        self.sync.validate()
    }
}

/// Debounce windows and settle delays, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    pub settle_delay_ms: u64,
    pub added_window_ms: u64,
    pub removed_window_ms: u64,
    pub renamed_window_ms: u64,
    /// Tag editors write several times per save, so this one is longer.
    pub modified_window_ms: u64,
    /// How long a rename "from" half waits for its "to" half.
    pub rename_pairing_ms: u64,
    /// Insert the target of a rename whose source was never cataloged.
    pub rename_inserts_untracked: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 150,
            added_window_ms: 300,
            removed_window_ms: 300,
            renamed_window_ms: 300,
            modified_window_ms: 1_000,
            rename_pairing_ms: 250,
            rename_inserts_untracked: false,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.settle_delay_ms > MAX_SETTLE_DELAY_MS {
            return Err(ConfigValidationError::SettleDelayTooLong(self.settle_delay_ms));
        }
        if self.modified_window_ms < self.added_window_ms {
            return Err(ConfigValidationError::ModifiedWindowTooShort);
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn added_window(&self) -> Duration {
        Duration::from_millis(self.added_window_ms)
    }

    pub fn removed_window(&self) -> Duration {
        Duration::from_millis(self.removed_window_ms)
    }

    pub fn renamed_window(&self) -> Duration {
        Duration::from_millis(self.renamed_window_ms)
    }

    pub fn modified_window(&self) -> Duration {
        Duration::from_millis(self.modified_window_ms)
    }

    pub fn rename_pairing(&self) -> Duration {
        Duration::from_millis(self.rename_pairing_ms)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("data directory must not be empty")]
    EmptyDataDir,
    #[error("settle delay of {0}ms exceeds the 5000ms limit")]
    SettleDelayTooLong(u64),
    #[error("modified window must not be shorter than the added window")]
    ModifiedWindowTooShort,
    #[error("malformed config file: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(AppConfig::default().validate(), Ok(()));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "sync": { "settle_delay_ms": 400 } }"#).expect("parse");
        assert_eq!(config.sync.settle_delay(), Duration::from_millis(400));
        assert_eq!(config.sync.modified_window_ms, 1_000);
        assert_eq!(config.data_dir, None);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut sync = SyncConfig {
            settle_delay_ms: 10_000,
            ..SyncConfig::default()
        };
        assert_eq!(
            sync.validate(),
            Err(ConfigValidationError::SettleDelayTooLong(10_000))
        );

        sync.settle_delay_ms = 100;
        sync.modified_window_ms = 10;
        assert_eq!(
            sync.validate(),
            Err(ConfigValidationError::ModifiedWindowTooShort)
        );

        let config = AppConfig {
            data_dir: Some(PathBuf::new()),
            sync: SyncConfig::default(),
        };
        assert_eq!(config.validate(), Err(ConfigValidationError::EmptyDataDir));
    }

    #[test]
    fn loads_from_json_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("musdex.json");
        std::fs::write(&path, r#"{ "data_dir": "/tmp/musdex" }"#).expect("write");

        let config = AppConfig::from_json_file(&path).expect("load");
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/musdex")));

        std::fs::write(&path, "{ not json").expect("write");
        assert!(AppConfig::from_json_file(&path).is_err());
    }
}
