//! Changelist computation between source and destination catalogs
//!
//! Two comparison modes:
//! - size only: same size means unchanged
//! - verified: same size and same content digest means unchanged
//!
//! Keys only present at the destination are scheduled for deletion in
//! both modes.

use crate::digest::DigestCache;
use crate::types::{Catalog, Entry};

/// Keys to transfer and keys to delete, both sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changelist {
    pub to_transfer: Vec<String>,
    pub to_delete: Vec<String>,
    /// Keys found identical on both sides
    pub unchanged: u64,
}

impl Changelist {
    pub fn is_empty(&self) -> bool {
        self.to_transfer.is_empty() && self.to_delete.is_empty()
    }

    /// Bytes the transfer set will move, according to the source catalog
    pub fn transfer_bytes(&self, source: &Catalog) -> u64 {
        self.to_transfer
            .iter()
            .filter_map(|k| source.get(k))
            .map(|e| e.size)
            .sum()
    }
}

/// Digest of one side: the catalog's own if known, else computed
async fn side_digest(
    catalog: &Catalog,
    key: &str,
    entry: &Entry,
    digests: &DigestCache,
) -> Option<String> {
    if entry.has_digest() {
        Some(entry.digest.clone())
    } else {
        digests.digest_of(&catalog.root.join(key)).await
    }
}

/// Compute what must change at `dest` to mirror `source`
///
/// Catalogs are not modified; computed digests live in `digests`.
pub async fn diff(
    source: &Catalog,
    dest: &Catalog,
    verify_content: bool,
    digests: &DigestCache,
) -> Changelist {
    let mut changes = Changelist::default();

    for (key, src) in source.iter() {
        let Some(dst) = dest.get(key) else {
            tracing::trace!(key = %key, "New key");
            changes.to_transfer.push(key.clone());
            continue;
        };

        if src.size != dst.size {
            tracing::trace!(key = %key, source = src.size, dest = dst.size, "Size differs");
            changes.to_transfer.push(key.clone());
            continue;
        }

        if !verify_content {
            changes.unchanged += 1;
            continue;
        }

        let src_digest = side_digest(source, key, src, digests).await;
        let dst_digest = side_digest(dest, key, dst, digests).await;

        match (src_digest, dst_digest) {
            (Some(a), Some(b)) if a.eq_ignore_ascii_case(&b) => {
                tracing::debug!(key = %key, md5 = %a, "Digest match");
                changes.unchanged += 1;
            }
            (a, b) => {
                tracing::debug!(
                    key = %key,
                    source = a.as_deref().unwrap_or("-"),
                    dest = b.as_deref().unwrap_or("-"),
                    "Digest mismatch"
                );
                changes.to_transfer.push(key.clone());
            }
        }
    }

    changes.to_delete = dest
        .iter()
        .filter(|(key, _)| !source.contains_key(key))
        .map(|(key, _)| key.clone())
        .collect();

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::Locator;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn remote(entries: &[(&str, u64, &str)]) -> Catalog {
        let mut catalog = Catalog::new(Locator::parse("s3://bucket/prefix/").unwrap());
        for (key, size, digest) in entries {
            catalog.insert(*key, Entry::with_digest(*size, *digest));
        }
        catalog
    }

    #[tokio::test]
    async fn test_new_and_changed_keys_transferred() {
        let source = remote(&[("a", 10, "x"), ("b", 20, "y"), ("c", 30, "z")]);
        let dest = remote(&[("a", 10, "x"), ("b", 21, "y")]);

        let changes = diff(&source, &dest, false, &DigestCache::new()).await;
        assert_eq!(changes.to_transfer, vec!["b", "c"]);
        assert!(changes.to_delete.is_empty());
        assert_eq!(changes.unchanged, 1);
        assert_eq!(changes.transfer_bytes(&source), 50);
    }

    #[tokio::test]
    async fn test_verify_compares_digests() {
        let source = remote(&[("a", 10, "aaaa"), ("b", 10, "bbbb")]);
        let dest = remote(&[("a", 10, "AAAA"), ("b", 10, "cccc")]);

        let unverified = diff(&source, &dest, false, &DigestCache::new()).await;
        assert!(unverified.to_transfer.is_empty());

        let verified = diff(&source, &dest, true, &DigestCache::new()).await;
        assert_eq!(verified.to_transfer, vec!["b"]);
    }

    #[tokio::test]
    async fn test_delete_set_independent_of_verify() {
        let source = remote(&[("a", 1, "1"), ("c", 3, "3")]);
        let dest = remote(&[("a", 1, "9"), ("b", 2, "2"), ("d", 4, "4")]);

        let size_only = diff(&source, &dest, false, &DigestCache::new()).await;
        let verified = diff(&source, &dest, true, &DigestCache::new()).await;
        assert_eq!(size_only.to_delete, vec!["b", "d"]);
        assert_eq!(size_only.to_delete, verified.to_delete);
    }

    #[tokio::test]
    async fn test_identical_catalogs_yield_nothing() {
        let catalog = remote(&[("a", 1, "1"), ("b/c", 2, "2")]);
        for verify in [false, true] {
            let changes = diff(&catalog, &catalog, verify, &DigestCache::new()).await;
            assert!(changes.is_empty());
        }
    }

    #[tokio::test]
    async fn test_empty_source_deletes_everything() {
        let source = remote(&[]);
        let dest = remote(&[("x", 1, "1"), ("y", 2, "2")]);
        let changes = diff(&source, &dest, true, &DigestCache::new()).await;
        assert!(changes.to_transfer.is_empty());
        assert_eq!(changes.to_delete, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_local_digest_computed_lazily() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("same.txt"), b"hello").unwrap();
        std::fs::write(tmp.path().join("diff.txt"), b"world").unwrap();
        std::fs::write(tmp.path().join("new.txt"), b"!").unwrap();

        let mut source = Catalog::new(Locator::Local(PathBuf::from(tmp.path())));
        source.insert("same.txt", Entry::new(5));
        source.insert("diff.txt", Entry::new(5));
        source.insert("new.txt", Entry::new(1));

        let dest = remote(&[
            ("same.txt", 5, "5d41402abc4b2a76b9719d911017c592"),
            ("diff.txt", 5, "5d41402abc4b2a76b9719d911017c592"),
        ]);

        let digests = DigestCache::new();
        let changes = diff(&source, &dest, true, &digests).await;
        assert_eq!(changes.to_transfer, vec!["diff.txt", "new.txt"]);
        // new.txt is absent remotely and never hashed
        assert_eq!(digests.computed(), 2);
        assert!(!source.get("same.txt").unwrap().has_digest());
    }

    #[tokio::test]
    async fn test_unobtainable_digest_is_mismatch() {
        let tmp = TempDir::new().unwrap();
        let mut source = Catalog::new(Locator::Local(PathBuf::from(tmp.path())));
        source.insert("gone.txt", Entry::new(3));
        let dest = remote(&[("gone.txt", 3, "abc")]);

        let changes = diff(&source, &dest, true, &DigestCache::new()).await;
        assert_eq!(changes.to_transfer, vec!["gone.txt"]);
    }
}
