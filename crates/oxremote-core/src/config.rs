//! Preferences for transfers, vaults and session pooling.
//!
//! Loaded from TOML, every section optional:
//!
//! ```toml
//! [multipart]
//! part_size = 10485760
//! concurrency = 10
//! threshold = 104857600
//!
//! [vault]
//! chunk_size = 32768
//! shortening_threshold = 220
//!
//! [pool]
//! capacity = 5
//!
//! [transfer]
//! failure_policy = "continue"
//! ```
//!
//! `OXREMOTE_PART_SIZE`, `OXREMOTE_CONCURRENCY` and `OXREMOTE_POOL_CAPACITY`
//! override the corresponding values.

use std::path::Path as FsPath;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::fs::content::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use crate::transfer::FailurePolicy;

/// Longest encoded name kept in place before it is shortened.
pub const DEFAULT_SHORTENING_THRESHOLD: usize = 220;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse preferences: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultipartPreferences {
    /// Configured part size in bytes. The effective size may be larger for
    /// files that would otherwise exceed the part limit.
    pub part_size: u64,
    /// Concurrent part uploads per file.
    pub concurrency: usize,
    /// Files at or above this size are uploaded in parts when the target
    /// supports it.
    pub threshold: u64,
}

impl Default for MultipartPreferences {
    fn default() -> Self {
        Self {
            part_size: 10 * 1024 * 1024,
            concurrency: 10,
            threshold: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultPreferences {
    pub chunk_size: u32,
    pub shortening_threshold: usize,
}

impl Default for VaultPreferences {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            shortening_threshold: DEFAULT_SHORTENING_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolPreferences {
    pub capacity: usize,
}

impl Default for PoolPreferences {
    fn default() -> Self {
        Self { capacity: 5 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferPreferences {
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub multipart: MultipartPreferences,
    pub vault: VaultPreferences,
    pub pool: PoolPreferences,
    pub transfer: TransferPreferences,
}

impl Preferences {
    /// Load preferences from `path`, falling back to defaults when the file
    /// does not exist. Environment overrides are applied afterwards.
    pub fn load(path: impl AsRef<FsPath>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut preferences = match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No preferences file, using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        preferences.apply_overrides(|key| std::env::var(key).ok())?;
        preferences.validate()?;
        Ok(preferences)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let preferences: Self = toml::from_str(content)?;
        preferences.validate()?;
        Ok(preferences)
    }

    /// Apply `OXREMOTE_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("OXREMOTE_PART_SIZE") {
            self.multipart.part_size = parse_override("OXREMOTE_PART_SIZE", &value)?;
        }
        if let Some(value) = lookup("OXREMOTE_CONCURRENCY") {
            self.multipart.concurrency = parse_override("OXREMOTE_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("OXREMOTE_POOL_CAPACITY") {
            self.pool.capacity = parse_override("OXREMOTE_POOL_CAPACITY", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.multipart.part_size == 0 {
            return Err(ConfigError::Invalid {
                key: "multipart.part_size",
                reason: "must be positive".to_string(),
            });
        }
        if self.multipart.concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "multipart.concurrency",
                reason: "must be positive".to_string(),
            });
        }
        if self.pool.capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "pool.capacity",
                reason: "must be positive".to_string(),
            });
        }
        if self.vault.chunk_size == 0 || self.vault.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::Invalid {
                key: "vault.chunk_size",
                reason: format!("must be within 1..={MAX_CHUNK_SIZE}"),
            });
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let preferences = Preferences::default();
        assert_eq!(preferences.vault.chunk_size, 32768);
        assert_eq!(preferences.vault.shortening_threshold, 220);
        assert_eq!(preferences.multipart.concurrency, 10);
        assert_eq!(preferences.transfer.failure_policy, FailurePolicy::Abort);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let preferences = Preferences::from_toml_str(
            r#"
            [multipart]
            part_size = 5242880

            [transfer]
            failure_policy = "continue"
            "#,
        )
        .unwrap();
        assert_eq!(preferences.multipart.part_size, 5 * 1024 * 1024);
        assert_eq!(preferences.multipart.concurrency, 10);
        assert_eq!(preferences.pool.capacity, 5);
        assert_eq!(preferences.transfer.failure_policy, FailurePolicy::Continue);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Preferences::from_toml_str("[pool]\ncapacity = 0\n"),
            Err(ConfigError::Invalid { key: "pool.capacity", .. })
        ));
        assert!(matches!(
            Preferences::from_toml_str("[vault]\nchunk_size = \"big\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut preferences = Preferences::default();
        preferences
            .apply_overrides(|key| match key {
                "OXREMOTE_CONCURRENCY" => Some("3".to_string()),
                "OXREMOTE_POOL_CAPACITY" => Some(" 2 ".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(preferences.multipart.concurrency, 3);
        assert_eq!(preferences.pool.capacity, 2);

        let err = preferences
            .apply_overrides(|key| (key == "OXREMOTE_PART_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "OXREMOTE_PART_SIZE", .. }));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let preferences = Preferences::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(preferences.vault, VaultPreferences::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        std::fs::write(&path, "[vault]\nshortening_threshold = 100\n").unwrap();
        let preferences = Preferences::load(&path).unwrap();
        assert_eq!(preferences.vault.shortening_threshold, 100);
    }
}
