/*!
 * Persistence manager: lifecycle glue for the AOF writer, RDB handler,
 * and recovery manager. Owns sync-policy timing and the periodic tasks
 * the event loop invokes roughly every 100ms (spec §4.6).
 */

use crate::aof::AofWriter;
use crate::config::PersistenceConfig;
use crate::error::PersistenceError;
use crate::rdb::RdbHandler;
use crate::recovery::{RecoveryManager, RecoverySource};
use crate::storage::DataStore;

pub struct PersistenceStats {
    pub aof_enabled: bool,
    pub last_aof_sync_time: Option<std::time::Instant>,
    pub aof_filename: String,
    pub pending_writes: u64,
}

pub struct PersistenceManager {
    config: PersistenceConfig,
    aof: Option<AofWriter>,
    rdb: RdbHandler,
    recovery: RecoveryManager,
}

impl PersistenceManager {
    pub fn new(config: PersistenceConfig) -> Self {
        let aof = if config.aof_enabled {
            Some(AofWriter::new(config.aof_path(), config.aof_sync_policy))
        } else {
            None
        };
        let rdb = RdbHandler::new(config.rdb_path(), true, true);
        let recovery = RecoveryManager::new(config.aof_path(), config.rdb_path());
        Self {
            config,
            aof,
            rdb,
            recovery,
        }
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Open the AOF for append; ensure data/temp directories exist.
    pub fn start(&self) -> Result<(), PersistenceError> {
        self.config.ensure_directories()?;
        if let Some(aof) = &self.aof {
            aof.open()?;
        }
        Ok(())
    }

    /// Final sync + close.
    pub fn stop(&self) {
        if let Some(aof) = &self.aof {
            aof.close();
        }
    }

    /// Forward a mutation to the AOF writer. A no-op when persistence or
    /// AOF is disabled, or for non-mutating commands (the writer filters
    /// those itself).
    pub fn log_write_command(&self, command: &str, args: &[String]) {
        if !self.config.persistence_enabled {
            return;
        }
        if let Some(aof) = &self.aof {
            if let Err(e) = aof.log_command(command, args) {
                log::error!("AOF write failed for {command}: {e}");
            }
        }
    }

    /// Replay the AOF (preferred) or load the RDB into `store` at boot.
    pub fn recover_data(&self, store: &mut DataStore) -> anyhow::Result<RecoverySource> {
        if !self.config.recovery_on_startup {
            return Ok(RecoverySource::Empty);
        }
        self.recovery.recover_data(store)
    }

    /// Invoked by the event loop roughly every 100ms: flush+fsync under
    /// `everysec` when due, and trigger a rewrite if the AOF has grown
    /// past its threshold. The rewrite runs synchronously and blocks the
    /// loop — there is no background worker in this single-threaded
    /// design (spec §4.6, §5).
    pub fn periodic_tasks(&self, store: &DataStore) {
        let Some(aof) = &self.aof else { return };

        if aof.should_sync() {
            if let Err(e) = aof.sync_to_disk() {
                log::error!("AOF periodic sync failed: {e}");
            }
        }

        if aof.needs_rewrite(self.config.aof_rewrite_min_size, self.config.aof_rewrite_percentage) {
            self.rewrite_now(aof, store);
        }
    }

    /// Trigger a rewrite outside the periodic schedule (used by
    /// `BGREWRITEAOF`).
    pub fn request_rewrite(&self, store: &DataStore) {
        if let Some(aof) = &self.aof {
            self.rewrite_now(aof, store);
        }
    }

    fn rewrite_now(&self, aof: &AofWriter, store: &DataStore) {
        let temp_path = self.config.aof_temp_filename();
        match aof.rewrite(store, &temp_path) {
            Ok(true) => log::info!("AOF rewrite completed"),
            Ok(false) => log::warn!("AOF rewrite did not run"),
            Err(e) => log::error!("AOF rewrite failed: {e}"),
        }
    }

    /// Write a full RDB snapshot of `store` to disk.
    pub fn save_snapshot(&self, store: &DataStore) -> Result<(), PersistenceError> {
        self.rdb.create_snapshot(store)
    }

    pub fn get_stats(&self) -> PersistenceStats {
        PersistenceStats {
            aof_enabled: self.config.aof_enabled,
            last_aof_sync_time: self.aof.as_ref().map(|a| a.last_sync()),
            aof_filename: self.config.aof_path().to_string_lossy().into_owned(),
            pending_writes: self.aof.as_ref().map(|a| a.pending_writes()).unwrap_or(0),
        }
    }
}
