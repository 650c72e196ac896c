/*!
 * Error types for persistence and configuration
 *
 * Per-request errors become RESP error replies and never reach here;
 * these types cover boot-time and durability-path failures that the
 * caller needs to branch on, as opposed to just log-and-continue.
 */

use std::path::PathBuf;
use thiserror::Error;

/// Configuration validation failure. Always fatal, always raised before bind.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid aof_sync_policy '{0}', must be one of always|everysec|no")]
    InvalidSyncPolicy(String),

    #[error("aof_filename cannot be empty")]
    EmptyAofFilename,
}

/// Durability-path failures raised by the AOF/RDB/recovery layers.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to open AOF file {path}: {source}")]
    AofOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("AOF rewrite failed: {0}")]
    Rewrite(String),

    #[error("RDB snapshot has invalid magic/version header")]
    RdbBadHeader,

    #[error("RDB checksum verification failed")]
    RdbChecksumMismatch,

    #[error("RDB payload is truncated or malformed: {0}")]
    RdbMalformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
