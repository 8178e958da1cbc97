//! Core types and configuration for the cache system.

use std::path::PathBuf;
use thiserror::Error;

/// Cache-related errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during cache operations
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation attempted on a closed disk store
    #[error("disk store is closed")]
    Closed,

    /// Invalid cache configuration
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
}

/// Memory tier configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum size in units (decoded byte footprint). Default: 64 MB.
    pub max_size_units: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_size_units: 64 * 1024 * 1024,
        }
    }
}

/// Disk tier configuration.
#[derive(Debug, Clone)]
pub struct DiskConfig {
    /// Cache directory root.
    pub directory: PathBuf,
    /// Maximum disk size in bytes across all data files. Default: 256 MB.
    pub max_size_bytes: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
            max_size_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Pick the disk cache directory from platform cache paths, falling back
/// to the temp directory when no platform cache path is available.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pixfetch")
}

/// Complete cache system configuration.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Memory tier configuration
    pub memory: MemoryConfig,
    /// Disk tier configuration
    pub disk: DiskConfig,
}

impl CacheConfig {
    /// Create a configuration with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory tier size in units.
    pub fn with_memory_size(mut self, size: usize) -> Self {
        self.memory.max_size_units = size;
        self
    }

    /// Set the disk tier size in bytes.
    pub fn with_disk_size(mut self, size: u64) -> Self {
        self.disk.max_size_bytes = size;
        self
    }

    /// Set the disk cache directory.
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.disk.directory = dir;
        self
    }
}
