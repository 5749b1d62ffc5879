//! Core domain types for bucketsync

use crate::error::{Error, Result};
use crate::uri::Locator;
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Metadata describing one file or object at a catalog key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Size in bytes
    pub size: u64,

    /// Content fingerprint (ETag without quotes, or MD5 hex); empty = unknown
    pub digest: String,

    /// Last modification time
    pub modified: Option<SystemTime>,
}

impl Entry {
    /// Create an entry without a known digest
    pub fn new(size: u64) -> Self {
        Self {
            size,
            digest: String::new(),
            modified: None,
        }
    }

    /// Create an entry with a known digest
    pub fn with_digest(size: u64, digest: impl Into<String>) -> Self {
        Self {
            size,
            digest: digest.into(),
            modified: None,
        }
    }

    pub fn has_digest(&self) -> bool {
        !self.digest.is_empty()
    }
}

/// A key -> entry snapshot of one side of a comparison
#[derive(Debug, Clone)]
pub struct Catalog {
    /// Where the keys are rooted
    pub root: Locator,

    /// Relative key -> metadata
    pub entries: BTreeMap<String, Entry>,

    /// False when a listing page failed and the catalog may be missing keys
    pub complete: bool,
}

impl Catalog {
    /// Create an empty, complete catalog
    pub fn new(root: Locator) -> Self {
        Self {
            root,
            entries: BTreeMap::new(),
            complete: true,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: Entry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }

    /// Sum of all entry sizes
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }
}

/// Direction of a single transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Local file to object store
    Upload,

    /// Object store to local file
    Download,

    /// Server-side copy between two object locations
    RemoteCopy,
}

impl TransferKind {
    /// Classify a pair of endpoints
    pub fn classify(from: &Locator, to: &Locator) -> Result<Self> {
        match (from, to) {
            (Locator::Local(_), Locator::Remote(_)) => Ok(TransferKind::Upload),
            (Locator::Remote(_), Locator::Local(_)) => Ok(TransferKind::Download),
            (Locator::Remote(_), Locator::Remote(_)) => Ok(TransferKind::RemoteCopy),
            (Locator::Local(_), Locator::Local(_)) => Err(Error::invalid_locator(
                format!("{} -> {}", from, to),
                "at least one side must be an s3:// location",
            )),
        }
    }
}

/// One unit of work for the transfer scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Catalog key this request was produced for
    pub key: String,
    pub from: Locator,
    pub to: Locator,
    /// Expected size from the source catalog
    pub size: u64,
    pub kind: TransferKind,
}

impl TransferRequest {
    /// Build a request, classifying its endpoints
    pub fn new(key: impl Into<String>, from: Locator, to: Locator, size: u64) -> Result<Self> {
        let kind = TransferKind::classify(&from, &to)?;
        Ok(Self {
            key: key.into(),
            from,
            to,
            size,
            kind,
        })
    }
}

/// What happened to a single key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemAction {
    Transfer(TransferKind),
    Delete,
}

/// Per-item result reported by sync
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub key: String,
    pub action: ItemAction,
    /// Bytes moved (0 for deletes and failures)
    pub bytes: u64,
    /// Error message when the item failed
    pub error: Option<String>,
}

impl ItemOutcome {
    pub fn ok(key: impl Into<String>, action: ItemAction, bytes: u64) -> Self {
        Self {
            key: key.into(),
            action,
            bytes,
            error: None,
        }
    }

    pub fn failed(key: impl Into<String>, action: ItemAction, error: impl ToString) -> Self {
        Self {
            key: key.into(),
            action,
            bytes: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Statistics for a sync operation
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Keys in the source catalog
    pub source_files: u64,

    /// Keys in the destination catalog
    pub dest_files: u64,

    /// Files uploaded
    pub files_uploaded: u64,

    /// Files downloaded
    pub files_downloaded: u64,

    /// Objects copied server-side
    pub files_copied: u64,

    /// Files deleted
    pub files_deleted: u64,

    /// Files skipped (already in sync)
    pub files_skipped: u64,

    /// Total bytes transferred
    pub bytes_transferred: u64,

    /// Failed items (transfers and deletes)
    pub errors: u64,

    /// Duration in seconds
    pub duration_secs: f64,
}

impl SyncStats {
    /// Files moved in any direction
    pub fn files_transferred(&self) -> u64 {
        self.files_uploaded + self.files_downloaded + self.files_copied
    }

    /// Calculate transfer rate in bytes per second
    pub fn transfer_rate(&self) -> f64 {
        if self.duration_secs == 0.0 {
            0.0
        } else {
            self.bytes_transferred as f64 / self.duration_secs
        }
    }

    /// Fold one item outcome into the counters
    pub fn record(&mut self, outcome: &ItemOutcome) {
        if !outcome.is_ok() {
            self.errors += 1;
            return;
        }
        match outcome.action {
            ItemAction::Transfer(TransferKind::Upload) => self.files_uploaded += 1,
            ItemAction::Transfer(TransferKind::Download) => self.files_downloaded += 1,
            ItemAction::Transfer(TransferKind::RemoteCopy) => self.files_copied += 1,
            ItemAction::Delete => self.files_deleted += 1,
        }
        self.bytes_transferred += outcome.bytes;
    }
}
