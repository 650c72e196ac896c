/*!
 * Persistence Configuration
 *
 * Mirrors the settings the source's `PersistenceConfig` carried:
 * AOF on/off, filename, sync policy, rewrite thresholds, and the
 * data/temp directory layout. Validated eagerly at construction —
 * an invalid sync policy or an empty AOF filename is a fatal
 * configuration error, never a panic.
 */

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ConfigError;

/// AOF durability policy (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync after every write.
    Always,
    /// fsync at most once per second, only if writes are pending.
    EverySec,
    /// never explicitly fsync; rely on the OS/close to flush.
    No,
}

impl SyncPolicy {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "always" => Ok(SyncPolicy::Always),
            "everysec" => Ok(SyncPolicy::EverySec),
            "no" => Ok(SyncPolicy::No),
            other => Err(ConfigError::InvalidSyncPolicy(other.to_string())),
        }
    }
}

/// Durability and server configuration.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub aof_enabled: bool,
    pub aof_filename: String,
    pub aof_sync_policy: SyncPolicy,
    pub aof_rewrite_percentage: u32,
    pub aof_rewrite_min_size: u64,
    pub rdb_filename: String,
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub persistence_enabled: bool,
    pub recovery_on_startup: bool,
    pub max_memory_usage: u64,
    /// Whether TTL/PTTL render the -1/-2 cases as human sentences (§9).
    pub humanize_expiry_replies: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            aof_enabled: true,
            aof_filename: "appendonly.aof".to_string(),
            aof_sync_policy: SyncPolicy::EverySec,
            aof_rewrite_percentage: 100,
            aof_rewrite_min_size: 1024 * 1024,
            rdb_filename: "dump.rdb".to_string(),
            data_dir: PathBuf::from("./data"),
            temp_dir: PathBuf::from("./data/temp"),
            persistence_enabled: true,
            recovery_on_startup: true,
            max_memory_usage: 100 * 1024 * 1024,
            humanize_expiry_replies: true,
        }
    }
}

impl PersistenceConfig {
    /// Validate the configuration, matching `_validate_config` in the source.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aof_filename.is_empty() {
            return Err(ConfigError::EmptyAofFilename);
        }
        Ok(())
    }

    pub fn aof_path(&self) -> PathBuf {
        self.data_dir.join(&self.aof_filename)
    }

    pub fn rdb_path(&self) -> PathBuf {
        self.data_dir.join(&self.rdb_filename)
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.temp_dir)?;
        Ok(())
    }

    /// Temporary AOF filename for rewrite, timestamped like the source's
    /// `get_aof_temp_filename`.
    pub fn aof_temp_filename(&self) -> PathBuf {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.temp_dir.join(format!("temp-rewrite-aof-{epoch}.aof"))
    }

    pub fn rdb_temp_path(&self) -> PathBuf {
        let mut p = self.rdb_path().into_os_string();
        p.push(".tmp");
        PathBuf::from(p)
    }
}

/// Build a config rooted at a given directory, used by tests that want an
/// isolated on-disk fixture.
pub fn config_in(dir: impl AsRef<Path>) -> PersistenceConfig {
    let dir = dir.as_ref();
    PersistenceConfig {
        data_dir: dir.to_path_buf(),
        temp_dir: dir.join("temp"),
        ..PersistenceConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(PersistenceConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_aof_filename_is_invalid() {
        let mut cfg = PersistenceConfig::default();
        cfg.aof_filename.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyAofFilename)));
    }

    #[test]
    fn sync_policy_parses_known_values() {
        assert_eq!(SyncPolicy::parse("always").unwrap(), SyncPolicy::Always);
        assert_eq!(SyncPolicy::parse("everysec").unwrap(), SyncPolicy::EverySec);
        assert_eq!(SyncPolicy::parse("no").unwrap(), SyncPolicy::No);
        assert!(SyncPolicy::parse("sometimes").is_err());
    }
}
