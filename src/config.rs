//! Configuration management for bucketsync

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Minimum size of every multipart part except the last (5MB)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Buffered merge data is flushed as a part once it grows past this (16MB)
pub const DEFAULT_FLUSH_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Objects requested per listing page
pub const LIST_PAGE_SIZE: i32 = 1000;

/// Keys per DeleteObjects request
pub const MAX_DELETE_BATCH: usize = 1000;

/// Default number of parallel transfer workers (0 = auto)
pub const DEFAULT_PARALLEL: usize = 0;

/// Content type used for uploads when none is configured
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ==================== Endpoint ====================

    /// Custom S3 endpoint for S3-compatible storage (MinIO, Ceph, ...)
    pub endpoint: Option<String>,

    /// Region name (falls back to the AWS environment chain)
    pub region: Option<String>,

    /// Address buckets as path segments instead of virtual hosts
    pub force_path_style: bool,

    /// Static access key (falls back to the AWS environment chain)
    pub access_key: Option<String>,

    /// Static secret key
    pub secret_key: Option<String>,

    // ==================== Transfers ====================

    /// Number of parallel transfer workers (0 = auto-detect CPU count)
    pub parallel: usize,

    /// Content type for uploaded and merged objects
    pub content_type: String,

    /// Canned ACL for created objects (e.g. "private")
    pub acl: Option<String>,

    /// Show progress bars
    pub progress: bool,

    // ==================== Merge ====================

    /// Sources larger than this are part-copied server-side
    pub part_threshold: u64,

    /// Buffered bytes beyond this are flushed as one part
    pub flush_threshold: u64,

    /// Abort the multipart session when a part fails instead of leaving it open
    pub abort_on_error: bool,

    // ==================== Listing ====================

    /// Objects requested per listing page
    pub page_size: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: None,
            force_path_style: false,
            access_key: None,
            secret_key: None,

            parallel: DEFAULT_PARALLEL,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            acl: None,
            progress: false,

            part_threshold: MIN_PART_SIZE,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            abort_on_error: false,

            page_size: LIST_PAGE_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io("reading config", e))?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io("creating config dir", e))?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("serializing config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| Error::io("writing config", e))?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("bucketsync").join("config.toml"))
            .ok_or_else(|| Error::config("could not determine config directory"))
    }

    /// Reject values the engines cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.page_size <= 0 || self.page_size > 1000 {
            return Err(Error::config(format!(
                "page_size must be between 1 and 1000, got {}",
                self.page_size
            )));
        }
        if self.part_threshold < MIN_PART_SIZE {
            return Err(Error::config(format!(
                "part_threshold must be at least {} bytes",
                MIN_PART_SIZE
            )));
        }
        if self.flush_threshold < self.part_threshold {
            return Err(Error::config(
                "flush_threshold must not be smaller than part_threshold",
            ));
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(Error::config(
                "access_key and secret_key must be given together",
            ));
        }
        Ok(())
    }

    /// Get the effective number of workers (resolves 0 to CPU count)
    pub fn effective_parallel(&self) -> usize {
        if self.parallel == 0 {
            num_cpus::get()
        } else {
            self.parallel
        }
    }

    /// Parse a size string like "100", "100K", "5M", "1G" into bytes
    pub fn parse_size(s: &str) -> Result<u64> {
        let s = s.trim().to_uppercase();
        if s.is_empty() {
            return Ok(0);
        }

        let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (num_part, suffix) = s.split_at(digits_end);

        let multiplier = match suffix.trim_end_matches("IB").trim_end_matches('B') {
            "" => 1u64,
            "K" => 1024,
            "M" => 1024 * 1024,
            "G" => 1024 * 1024 * 1024,
            "T" => 1024u64 * 1024 * 1024 * 1024,
            _ => return Err(Error::config(format!("invalid size suffix: {}", s))),
        };

        let num: u64 = num_part
            .parse()
            .map_err(|_| Error::config(format!("invalid size value: {}", s)))?;

        num.checked_mul(multiplier)
            .ok_or_else(|| Error::config(format!("size out of range: {}", s)))
    }
}
