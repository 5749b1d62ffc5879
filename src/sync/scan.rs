//! Catalog building for sync, merge and usage
//!
//! A catalog maps relative keys to entries for one side of a comparison.
//! Remote listings are paginated with S3 v1 markers; a failing page stops
//! the loop and leaves the catalog marked incomplete instead of failing
//! the whole command.

use crate::error::Result;
use crate::storage::local::LocalTree;
use crate::storage::ObjectStore;
use crate::types::{Catalog, Entry};
use crate::uri::{Locator, ObjectRef};
use std::path::Path;

/// Suffix some tools use for zero-byte directory placeholders
const FOLDER_MARKER: &str = "_$folder$";

/// Catalog every regular file below `root`
pub async fn build_local_catalog(root: &Path) -> Result<Catalog> {
    let tree = LocalTree::new(root.to_path_buf());
    let mut catalog = Catalog::new(Locator::Local(root.to_path_buf()));

    for (key, entry) in tree.list().await? {
        catalog.insert(key, entry);
    }

    tracing::debug!(root = %root.display(), files = catalog.len(), "Local catalog built");
    Ok(catalog)
}

/// Normalize a listing prefix: trailing delimiter trimmed, then re-appended
/// when the prefix is non-empty
pub fn normalize_prefix(prefix: &str, delimiter: &str) -> String {
    let trimmed = if delimiter.is_empty() {
        prefix
    } else {
        prefix.strip_suffix(delimiter).unwrap_or(prefix)
    };

    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}{}", trimmed, delimiter)
    }
}

/// Zero-byte listing artifacts standing in for directories
fn is_directory_placeholder(key: &str, size: u64, delimiter: &str) -> bool {
    size == 0
        && (key.ends_with(FOLDER_MARKER) || (!delimiter.is_empty() && key.ends_with(delimiter)))
}

/// Catalog every object below a remote prefix
///
/// The listing itself is recursive; `delimiter` only shapes the prefix and
/// the placeholder filter.
pub async fn build_remote_catalog(
    store: &dyn ObjectStore,
    root: &ObjectRef,
    delimiter: &str,
    page_size: i32,
) -> Catalog {
    let prefix = normalize_prefix(&root.key, delimiter);
    let mut catalog = Catalog::new(Locator::Remote(ObjectRef::new(&root.bucket, &prefix)));
    let mut marker: Option<String> = None;
    let mut pages = 0u64;

    loop {
        let page = match store
            .list_objects(&root.bucket, &prefix, "", marker.as_deref(), page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(
                    bucket = %root.bucket,
                    prefix = %prefix,
                    collected = catalog.len(),
                    error = %e,
                    "Listing failed, catalog is incomplete"
                );
                catalog.complete = false;
                break;
            }
        };
        pages += 1;

        let last_key = page.objects.last().map(|o| o.key.clone());

        for object in page.objects {
            let Some(relative) = object.key.strip_prefix(prefix.as_str()) else {
                tracing::warn!(key = %object.key, prefix = %prefix, "Listed key outside prefix");
                continue;
            };
            if relative.is_empty() || is_directory_placeholder(relative, object.size, delimiter) {
                continue;
            }

            catalog.insert(
                relative,
                Entry {
                    size: object.size,
                    digest: object.etag.trim_matches('"').to_string(),
                    modified: object.last_modified,
                },
            );
        }

        if !page.truncated {
            break;
        }

        marker = page.next_marker.or(last_key);
        if marker.is_none() {
            tracing::warn!(bucket = %root.bucket, prefix = %prefix, "Truncated page without a marker");
            catalog.complete = false;
            break;
        }
    }

    tracing::debug!(
        bucket = %root.bucket,
        prefix = %prefix,
        pages,
        objects = catalog.len(),
        "Remote catalog built"
    );
    catalog
}

/// Catalog either side of a sync
pub async fn build_catalog(
    store: &dyn ObjectStore,
    locator: &Locator,
    page_size: i32,
) -> Result<Catalog> {
    match locator {
        Locator::Local(path) => build_local_catalog(path).await,
        Locator::Remote(obj) => Ok(build_remote_catalog(store, obj, "/", page_size).await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::StoreCall;
    use crate::storage::MemoryStore;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("dir", "/"), "dir/");
        assert_eq!(normalize_prefix("dir/", "/"), "dir/");
        assert_eq!(normalize_prefix("", "/"), "");
        assert_eq!(normalize_prefix("/", "/"), "");
        assert_eq!(normalize_prefix("dir", ""), "dir");
    }

    #[tokio::test]
    async fn test_remote_catalog_strips_prefix_and_quotes() {
        let store = MemoryStore::new();
        store.insert("b", "backup/a.txt", "hello");
        store.insert("b", "backup/sub/b.txt", "world!");
        store.insert("b", "other/c.txt", "nope");

        let catalog =
            build_remote_catalog(&store, &ObjectRef::new("b", "backup"), "/", 1000).await;

        assert!(catalog.complete);
        let keys: Vec<_> = catalog.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a.txt", "sub/b.txt"]);

        let entry = catalog.get("a.txt").unwrap();
        assert_eq!(entry.size, 5);
        assert_eq!(entry.digest, "5d41402abc4b2a76b9719d911017c592");
    }

    #[tokio::test]
    async fn test_remote_catalog_skips_placeholders() {
        let store = MemoryStore::new();
        store.insert("b", "p/dir/", "");
        store.insert("b", "p/old_$folder$", "");
        store.insert("b", "p/empty.txt", "");
        store.insert("b", "p/real.txt", "x");

        let catalog = build_remote_catalog(&store, &ObjectRef::new("b", "p/"), "/", 1000).await;
        let keys: Vec<_> = catalog.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["empty.txt", "real.txt"]);
    }

    #[tokio::test]
    async fn test_remote_catalog_paginates_with_last_key() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.insert("b", &format!("p/k{}", i), "data");
        }

        let catalog = build_remote_catalog(&store, &ObjectRef::new("b", "p"), "/", 2).await;
        assert_eq!(catalog.len(), 5);
        assert!(catalog.complete);

        let markers: Vec<Option<String>> = store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::ListObjects { marker, .. } => Some(marker),
                _ => None,
            })
            .collect();
        assert_eq!(
            markers,
            vec![None, Some("p/k1".to_string()), Some("p/k3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_remote_catalog_keeps_partial_results() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.insert("b", &format!("k{}", i), "data");
        }
        store.fail_listing_after("b", 1);

        let catalog = build_remote_catalog(&store, &ObjectRef::new("b", ""), "/", 2).await;
        assert!(!catalog.complete);
        assert_eq!(catalog.len(), 2);
    }

    #[tokio::test]
    async fn test_local_catalog() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("a.txt"), vec![0u8; 10]).unwrap();
        std::fs::write(tmp.path().join("nested/b.txt"), vec![0u8; 20]).unwrap();

        let catalog = build_local_catalog(tmp.path()).await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("nested/b.txt").unwrap().size, 20);
        assert!(!catalog.get("a.txt").unwrap().has_digest());
    }
}
