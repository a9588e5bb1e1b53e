use std::time::Duration;

use bitflags::bitflags;

// Database open flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DbFlags: u32 {
        /// Open for reading only; writes and erases are rejected
        const RDONLY = 0x20000;
        /// Create the file if it does not exist
        const CREATE = 0x40000;
    }
}

// Transaction durability flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxnFlags: u32 {
        /// Commit without forcing data to stable storage (default)
        const WRITE_NOSYNC = 0x01;
        /// Force data to stable storage on commit
        const SYNC = 0x02;
    }
}

/// Per-file engine cache budget in bytes
pub const DEFAULT_CACHE_SIZE: usize = 16 * 1024 * 1024;

/// Recommended interval between periodic flushes
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Well-known key storing the schema version of a file
pub const VERSION_KEY: &str = "version";

/// Format tag prefixed to every serialized value
pub const SERIAL_VERSION: u32 = 1;

/// Suffix of the temporary file built by a rewrite
pub const REWRITE_SUFFIX: &str = ".rewrite";

/// Suffix of the backup kept when a damaged file is rebuilt
pub const BACKUP_SUFFIX: &str = "bak";
