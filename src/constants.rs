use bitflags::bitflags;

// Database flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DbFlags: u32 {
        /// Skip fsync of records and their directories on put
        const NOSYNC = 0x10000;
        /// Reject put, delete and exclusive locks
        const RDONLY = 0x20000;
    }
}

/// Mode for directories created on demand (before umask)
pub const DIR_MODE: u32 = 0o775;
/// Mode for record files (before umask)
pub const FILE_MODE: u32 = 0o666;
/// Database-wide lock key
pub const LOCK_KEY: &str = ".lock";
/// Prefix of in-flight temp files; dot-prefixed so cursors skip them
pub const TEMP_PREFIX: &str = ".tmp";
pub const TEMP_SUFFIX: &str = ".part";
/// Suffix of backup files left by rename-aside writers
pub const BACKUP_SUFFIX: &str = "~";

/// Decimal base of one shard group
pub const SHARD_BASE: u64 = 100;
/// Digit groups a `u64` can need; bounds the marker letters to `_a`..`_i`
pub const MAX_SHARD_GROUPS: u32 = 10;
