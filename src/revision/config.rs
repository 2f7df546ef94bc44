use serde::Deserialize;

use std::{ffi, fs};

use crate::Result;

/// Default chunk size, 4MB.
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;
/// Smallest chunk size allowed by [Config::validate], 16KB.
pub const MIN_CHUNK_SIZE: usize = 16 * 1024;
/// Largest chunk size allowed by [Config::validate], 64MB.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;
/// Default target for total memory held in chunks, 64MB.
pub const TARGET_SIZE: usize = 64 * 1024 * 1024;
/// Smallest target size allowed by [Config::validate], 16MB.
pub const MIN_TARGET_SIZE: usize = 16 * 1024 * 1024;
/// Default number of chunks kept around for reuse.
pub const FREELIST_LIMIT: usize = 16;
/// Default live-bytes fraction below which sealed chunks are compacted.
pub const COMPACT_RATIO: f64 = 0.5;

/// Configuration for [ChunkAllocator][crate::revision::ChunkAllocator]
/// and [RevisionsCache][crate::revision::RevisionsCache].
#[derive(Clone, Debug)]
pub struct Config {
    /// Size of chunks ordered from the system, documents larger than this
    /// get a chunk of their own.
    ///
    /// Default: [CHUNK_SIZE]
    pub chunk_size: usize,
    /// Total memory, across all collections, the chunk allocator tries to
    /// stay within. Returned chunks beyond this are freed.
    ///
    /// Default: [TARGET_SIZE]
    pub target_size: usize,
    /// Maximum number of returned chunks kept for reuse.
    ///
    /// Default: [FREELIST_LIMIT]
    pub freelist_limit: usize,
    /// Copy documents read from the write-ahead-log into the cache.
    ///
    /// Default: true
    pub promote_wal_reads: bool,
    /// Sealed chunks whose live-bytes fraction falls below this ratio are
    /// compacted.
    ///
    /// Default: [COMPACT_RATIO]
    pub compact_ratio: f64,
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

impl<'a> arbitrary::Arbitrary<'a> for Config {
    fn arbitrary(u: &mut arbitrary::Unstructured) -> arbitrary::Result<Self> {
        let chunk_size = *u.choose(&[MIN_CHUNK_SIZE, 64 * 1024, 1024 * 1024, CHUNK_SIZE])?;
        let target_size = chunk_size * *u.choose(&[1, 4, 16, 64])?;
        let freelist_limit = *u.choose(&[1, 4, FREELIST_LIMIT])?;
        let promote_wal_reads: bool = u.arbitrary()?;
        let compact_ratio = *u.choose(&[0.0, 0.25, COMPACT_RATIO, 1.0])?;

        let config = Config {
            chunk_size,
            target_size,
            freelist_limit,
            promote_wal_reads,
            compact_ratio,
        };
        Ok(config)
    }
}

impl Config {
    /// Create a new configuration value with default parameters, use the
    /// `set_*` methods to change them.
    pub fn new() -> Config {
        Config {
            chunk_size: CHUNK_SIZE,
            target_size: TARGET_SIZE,
            freelist_limit: FREELIST_LIMIT,
            promote_wal_reads: true,
            compact_ratio: COMPACT_RATIO,
        }
    }

    pub fn set_chunk_size(&mut self, chunk_size: usize) -> &mut Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn set_target_size(&mut self, target_size: usize) -> &mut Self {
        self.target_size = target_size;
        self
    }

    pub fn set_freelist_limit(&mut self, limit: usize) -> &mut Self {
        self.freelist_limit = limit;
        self
    }

    pub fn set_promote_wal_reads(&mut self, promote: bool) -> &mut Self {
        self.promote_wal_reads = promote;
        self
    }

    pub fn set_compact_ratio(&mut self, ratio: f64) -> &mut Self {
        self.compact_ratio = ratio;
        self
    }

    /// Validate configuration against the limits accepted at startup.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < MIN_CHUNK_SIZE || self.chunk_size > MAX_CHUNK_SIZE {
            err_at!(
                InvalidConfig, msg: "chunk_size {} not within {}..={}",
                self.chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            )
        } else if self.target_size < MIN_TARGET_SIZE {
            err_at!(
                InvalidConfig, msg: "target_size {} below {}", self.target_size, MIN_TARGET_SIZE
            )
        } else if self.target_size <= self.chunk_size {
            err_at!(
                InvalidConfig, msg: "target_size {} must exceed chunk_size {}",
                self.target_size, self.chunk_size
            )
        } else {
            self.check()
        }
    }

    /// Structural checks, independent of startup limits. Small sizes are
    /// fine here so that tests can exercise eviction cheaply.
    pub fn check(&self) -> Result<()> {
        if self.chunk_size == 0 || self.target_size < self.chunk_size {
            err_at!(
                InvalidConfig, msg: "chunk_size {} target_size {}",
                self.chunk_size, self.target_size
            )
        } else if self.freelist_limit == 0 {
            err_at!(InvalidConfig, msg: "freelist_limit must be non-zero")
        } else if !(0.0..=1.0).contains(&self.compact_ratio) {
            err_at!(InvalidConfig, msg: "compact_ratio {}", self.compact_ratio)
        } else {
            Ok(())
        }
    }

    /// Parse configuration from toml text. Missing parameters take their
    /// default value, the result is validated.
    pub fn from_toml(text: &str) -> Result<Config> {
        let cfg: TomlConfig = err_at!(InvalidConfig, toml::from_str(text))?;
        let config: Config = cfg.into();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from toml file at `loc`.
    pub fn load(loc: &ffi::OsStr) -> Result<Config> {
        let text = err_at!(IOError, fs::read_to_string(loc), "{:?}", loc)?;
        Config::from_toml(&text)
    }
}

/// Toml shape of [Config], every parameter is optional.
#[derive(Clone, Default, Deserialize)]
pub struct TomlConfig {
    chunk_size: Option<usize>,
    target_size: Option<usize>,
    freelist_limit: Option<usize>,
    promote_wal_reads: Option<bool>,
    compact_ratio: Option<f64>,
}

impl From<TomlConfig> for Config {
    fn from(cfg: TomlConfig) -> Config {
        let def = Config::new();
        Config {
            chunk_size: cfg.chunk_size.unwrap_or(def.chunk_size),
            target_size: cfg.target_size.unwrap_or(def.target_size),
            freelist_limit: cfg.freelist_limit.unwrap_or(def.freelist_limit),
            promote_wal_reads: cfg.promote_wal_reads.unwrap_or(def.promote_wal_reads),
            compact_ratio: cfg.compact_ratio.unwrap_or(def.compact_ratio),
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
