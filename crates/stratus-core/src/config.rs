//! Configuration for the sync engine core.
//!
//! Typed configuration that maps to the engine's YAML configuration file,
//! with loading, validation and defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path of the sqlite database holding inode state.
    pub database_path: PathBuf,
    /// Directory holding cached file content.
    pub cache_root: PathBuf,
    /// Seconds an unreferenced inode may sit in memory before eviction.
    pub evict_idle_secs: u64,
    /// Milliseconds between eviction retries while draining at shutdown.
    pub quiesce_retry_ms: u64,
}

impl EngineConfig {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to defaults on any error.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Check the configuration for values the engine cannot run with.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidConfig` describing the first problem.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.quiesce_retry_ms == 0 {
            return Err(DomainError::InvalidConfig(
                "quiesce_retry_ms must be non-zero".to_string(),
            ));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(DomainError::InvalidConfig(
                "database_path must be set".to_string(),
            ));
        }
        if self.cache_root.as_os_str().is_empty() {
            return Err(DomainError::InvalidConfig(
                "cache_root must be set".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("stratus.db"),
            cache_root: PathBuf::from("cache"),
            evict_idle_secs: 300,
            quiesce_retry_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_retry_rejected() {
        let config = EngineConfig {
            quiesce_retry_ms: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database_path: /tmp/stratus/inodes.db\n\
             cache_root: /tmp/stratus/cache\n\
             evict_idle_secs: 60\n\
             quiesce_retry_ms: 250"
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.evict_idle_secs, 60);
        assert_eq!(config.cache_root, PathBuf::from("/tmp/stratus/cache"));
    }

    #[test]
    fn test_load_or_default_falls_back() {
        let config = EngineConfig::load_or_default(Path::new("/no/such/config.yaml"));
        assert_eq!(config.quiesce_retry_ms, 500);
    }
}
