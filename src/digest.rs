//! Content digests for verified comparisons
//!
//! Local files have no digest until a comparison needs one. The cache
//! computes the full-file MD5 on first use and remembers it for the rest of
//! the run, so the same file is never hashed twice.

use crate::error::{Error, Result};
use crate::uri::Locator;
use dashmap::DashMap;
use md5::{Digest, Md5};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncReadExt;

/// Read buffer for hashing
const HASH_CHUNK: usize = 256 * 1024;

/// Compute the MD5 hex digest of a local file
pub async fn file_md5(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::io(format!("opening {}", path.display()), e))?;

    let mut hasher = Md5::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| Error::io(format!("reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Memoizing digest lookup keyed by locator
#[derive(Debug, Default)]
pub struct DigestCache {
    digests: DashMap<Locator, String>,
    computed: AtomicUsize,
}

impl DigestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Digest of the content at `locator`, if one can be obtained
    ///
    /// Only local files are hashed; remote digests come from listings.
    /// Failures are logged and yield `None`, which callers treat as a
    /// mismatch.
    pub async fn digest_of(&self, locator: &Locator) -> Option<String> {
        if let Some(digest) = self.digests.get(locator) {
            return Some(digest.clone());
        }

        let Locator::Local(path) = locator else {
            return None;
        };

        match file_md5(path).await {
            Ok(digest) => {
                self.computed.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(path = %path.display(), md5 = %digest, "Computed digest");
                self.digests.insert(locator.clone(), digest.clone());
                Some(digest)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot compute digest");
                None
            }
        }
    }

    /// Number of files actually hashed so far
    pub fn computed(&self) -> usize {
        self.computed.load(Ordering::Relaxed)
    }
}
