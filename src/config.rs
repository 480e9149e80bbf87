use std::path::PathBuf;

/// Explicit, constructor-passed configuration for a [`crate::Store`].
///
/// There is no process-wide singleton and no INI-file reader here: the
/// embedding application (CLI, server, …) owns config loading and hands
/// the crate a plain struct, the same way it owns the logger it installs
/// for the `log` facade calls this crate makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Size in bytes of one addressable block. Every read/write to the
    /// host file is this size and aligned to it.
    pub block_size: u32,
    /// Minimum total host-file size accepted by `Store::format`.
    pub system_file_min_size: u64,
    /// Default host file path, used by callers that don't pick their own.
    pub default_path: PathBuf,
    /// Default total size for a newly formatted host file.
    pub default_size: u64,
    /// Optional carrier file whose bytes are prepended to disguise the
    /// host file's type.
    pub carrier_path: Option<PathBuf>,
    /// Informational only: the log level the embedding binary should
    /// install for the `log` facade. This crate never sets a logger
    /// itself.
    pub log_level: log::LevelFilter,
}

pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
pub const DEFAULT_SYSTEM_FILE_MIN_SIZE: u64 = 16 * DEFAULT_BLOCK_SIZE as u64;

impl Default for Config {
    fn default() -> Self {
        Config {
            block_size: DEFAULT_BLOCK_SIZE,
            system_file_min_size: DEFAULT_SYSTEM_FILE_MIN_SIZE,
            default_path: PathBuf::from("store.dat"),
            default_size: 64 * 1024 * 1024,
            carrier_path: None,
            log_level: log::LevelFilter::Info,
        }
    }
}

impl Config {
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_carrier(mut self, carrier_path: impl Into<PathBuf>) -> Self {
        self.carrier_path = Some(carrier_path.into());
        self
    }
}
