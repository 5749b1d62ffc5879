//! bucketsync - directory sync and object assembly for S3-compatible storage
//!
//! This library mirrors directory trees between a local filesystem and an
//! object store (or between two bucket prefixes), and assembles large
//! objects out of many smaller ones with multipart uploads.

pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod format;
pub mod listing;
pub mod merge;
pub mod multipart;
pub mod progress;
pub mod put;
pub mod storage;
pub mod sync;
pub mod types;
pub mod uri;
pub mod usage;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
