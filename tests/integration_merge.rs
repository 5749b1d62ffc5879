//! Integration tests for object merging against the in-memory object store

use bucketsync::merge::{MergeEngine, MergeOptions, MergePath, SessionResolution};
use bucketsync::multipart::{self, CleanAction};
use bucketsync::storage::memory::StoreCall;
use bucketsync::storage::{MemoryStore, ObjectStore};
use bucketsync::uri::{Locator, ObjectRef};
use std::sync::Arc;

const MIB: usize = 1024 * 1024;

fn engine(store: &Arc<MemoryStore>, options: MergeOptions) -> MergeEngine {
    let store: Arc<dyn ObjectStore> = store.clone();
    MergeEngine::new(store, options)
}

fn locators(uris: &[&str]) -> Vec<Locator> {
    uris.iter().map(|u| Locator::parse(u).unwrap()).collect()
}

fn dest() -> Locator {
    Locator::parse("s3://bucket/merged.bin").unwrap()
}

/// Multipart primitives only, in the order they were issued
fn multipart_calls(store: &MemoryStore) -> Vec<StoreCall> {
    store
        .calls()
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                StoreCall::InitiateMultipart { .. }
                    | StoreCall::UploadPart { .. }
                    | StoreCall::CopyPart { .. }
                    | StoreCall::CompleteMultipart { .. }
                    | StoreCall::AbortMultipart { .. }
                    | StoreCall::PutObject { .. }
                    | StoreCall::CopyObject { .. }
            )
        })
        .collect()
}

#[tokio::test]
async fn test_single_source_is_plain_copy() {
    let store = Arc::new(MemoryStore::new());
    store.insert("bucket", "in/only", vec![3u8; 1000]);

    let report = engine(&store, MergeOptions::default())
        .merge(&locators(&["s3://bucket/in/"]), &dest())
        .await
        .unwrap();

    assert_eq!(report.path, MergePath::SingleCopy);
    assert_eq!(report.session, None);
    assert_eq!(
        multipart_calls(&store),
        vec![StoreCall::CopyObject {
            dest: "s3://bucket/merged.bin".to_string(),
            source: "s3://bucket/in/only".to_string(),
        }]
    );
    assert_eq!(store.data("bucket", "merged.bin").unwrap().len(), 1000);
}

#[tokio::test]
async fn test_small_sources_become_one_put() {
    let store = Arc::new(MemoryStore::new());
    store.insert("bucket", "in/a", "alpha-");
    store.insert("bucket", "in/b", "beta");

    let report = engine(&store, MergeOptions::default())
        .merge(&locators(&["s3://bucket/in/"]), &dest())
        .await
        .unwrap();

    assert_eq!(report.path, MergePath::BufferedPut);
    assert_eq!(report.session, Some(SessionResolution::Aborted));
    assert!(report.parts.is_empty());
    assert_eq!(store.open_uploads(), 0);

    let calls = multipart_calls(&store);
    assert!(matches!(calls[0], StoreCall::InitiateMultipart { .. }));
    assert!(matches!(calls[1], StoreCall::AbortMultipart { .. }));
    assert_eq!(
        calls[2],
        StoreCall::PutObject {
            key: "merged.bin".to_string(),
            size: 10
        }
    );
    assert_eq!(&store.data("bucket", "merged.bin").unwrap()[..], b"alpha-beta");
}

#[tokio::test]
async fn test_parts_numbered_in_key_order() {
    let store = Arc::new(MemoryStore::new());
    // inserted out of order; merge visits keys sorted
    store.insert("bucket", "in/c", vec![b'c'; 1024]);
    store.insert("bucket", "in/a", vec![b'a'; 6 * MIB]);
    store.insert("bucket", "in/b", vec![b'b'; 6 * MIB]);

    let report = engine(&store, MergeOptions::default())
        .merge(&locators(&["s3://bucket/in/"]), &dest())
        .await
        .unwrap();

    assert_eq!(report.path, MergePath::Multipart);
    assert_eq!(report.session, Some(SessionResolution::Completed));
    assert_eq!(report.bytes_copied, 12 * MIB as u64);
    assert_eq!(report.bytes_uploaded, 1024);

    let calls = multipart_calls(&store);
    assert_eq!(
        calls[1..],
        [
            StoreCall::CopyPart {
                part_number: 1,
                source: "s3://bucket/in/a".to_string()
            },
            StoreCall::CopyPart {
                part_number: 2,
                source: "s3://bucket/in/b".to_string()
            },
            StoreCall::UploadPart {
                part_number: 3,
                size: 1024
            },
            StoreCall::CompleteMultipart {
                part_numbers: vec![1, 2, 3]
            },
        ]
    );

    let merged = store.data("bucket", "merged.bin").unwrap();
    assert_eq!(merged.len(), 12 * MIB + 1024);
    assert_eq!(merged[0], b'a');
    assert_eq!(merged[6 * MIB], b'b');
    assert_eq!(merged[12 * MIB], b'c');
    assert!(store.etag("bucket", "merged.bin").unwrap().ends_with("-3\""));
}

#[tokio::test]
async fn test_large_first_then_small_tail_makes_two_parts() {
    let store = Arc::new(MemoryStore::new());
    store.insert("bucket", "in/a-6mib", vec![1u8; 6 * MIB]);
    store.insert("bucket", "in/b-3mib", vec![2u8; 3 * MIB]);
    store.insert("bucket", "in/c-2mib", vec![3u8; 2 * MIB]);

    let report = engine(&store, MergeOptions::default())
        .merge(&locators(&["s3://bucket/in/"]), &dest())
        .await
        .unwrap();

    assert_eq!(report.path, MergePath::Multipart);
    assert_eq!(report.parts.len(), 2);
    assert_eq!(report.parts[0].size, 6 * MIB as u64);
    assert_eq!(report.parts[1].size, 5 * MIB as u64);
    assert_eq!(store.data("bucket", "merged.bin").unwrap().len(), 11 * MIB);
}

#[tokio::test]
async fn test_large_source_after_small_buffer_is_read() {
    let store = Arc::new(MemoryStore::new());
    store.insert("bucket", "in/a-3mib", vec![1u8; 3 * MIB]);
    store.insert("bucket", "in/b-6mib", vec![2u8; 6 * MIB]);
    store.insert("bucket", "in/c-2mib", vec![3u8; 2 * MIB]);

    let report = engine(&store, MergeOptions::default())
        .merge(&locators(&["s3://bucket/in/"]), &dest())
        .await
        .unwrap();

    // a 3 MiB buffer cannot stand as a part, so b is read in as well
    assert_eq!(report.path, MergePath::BufferedPut);
    assert_eq!(report.summary.copy_count, 1);
    assert!(!store
        .calls()
        .iter()
        .any(|c| matches!(c, StoreCall::CopyPart { .. })));

    let merged = store.data("bucket", "merged.bin").unwrap();
    assert_eq!(merged.len(), 11 * MIB);
    assert_eq!(merged[3 * MIB], 2);
    assert_eq!(merged[9 * MIB], 3);
}

#[tokio::test]
async fn test_buffer_flushed_past_threshold() {
    let store = Arc::new(MemoryStore::new());
    for i in 0..5 {
        store.insert("bucket", &format!("in/{}", i), vec![i as u8; 5 * MIB]);
    }

    let report = engine(&store, MergeOptions::default())
        .merge(&locators(&["s3://bucket/in/"]), &dest())
        .await
        .unwrap();

    assert_eq!(report.path, MergePath::Multipart);
    let uploads: Vec<_> = multipart_calls(&store)
        .into_iter()
        .filter_map(|c| match c {
            StoreCall::UploadPart { part_number, size } => Some((part_number, size)),
            _ => None,
        })
        .collect();
    assert_eq!(
        uploads,
        vec![(1, 20 * MIB as u64), (2, 5 * MIB as u64)]
    );
    assert_eq!(report.bytes_uploaded, 25 * MIB as u64);
}

#[tokio::test]
async fn test_multiple_prefixes_merge_in_key_order() {
    let store = Arc::new(MemoryStore::new());
    store.insert("bucket", "z/2", "two");
    store.insert("bucket", "a/1", "one");
    store.insert("bucket", "a/skip", "");

    let report = engine(&store, MergeOptions::default())
        .merge(&locators(&["s3://bucket/z/", "s3://bucket/a/"]), &dest())
        .await
        .unwrap();

    assert_eq!(report.sources.len(), 2);
    assert_eq!(&store.data("bucket", "merged.bin").unwrap()[..], b"onetwo");
}

#[tokio::test]
async fn test_no_sources_writes_nothing() {
    let store = Arc::new(MemoryStore::new());

    let report = engine(&store, MergeOptions::default())
        .merge(&locators(&["s3://bucket/nothing/"]), &dest())
        .await
        .unwrap();

    assert_eq!(report.path, MergePath::Empty);
    assert!(multipart_calls(&store).is_empty());
    assert!(store.data("bucket", "merged.bin").is_none());
}

#[tokio::test]
async fn test_incomplete_listing_fails_merge() {
    let store = Arc::new(MemoryStore::new());
    store.insert("bucket", "in/a", "a");
    store.fail_listing_after("bucket", 0);

    let err = engine(&store, MergeOptions::default())
        .merge(&locators(&["s3://bucket/in/"]), &dest())
        .await
        .unwrap_err();

    assert!(matches!(err, bucketsync::Error::Listing { .. }));
    assert!(multipart_calls(&store).is_empty());
}

#[tokio::test]
async fn test_retained_session_can_be_cleaned() {
    let store = Arc::new(MemoryStore::new());
    store.insert("bucket", "in/a", vec![1u8; 6 * MIB]);
    store.insert("bucket", "in/b", vec![2u8; 6 * MIB]);
    store.fail_part(2);

    let merge = engine(&store, MergeOptions::default());
    assert!(merge
        .merge(&locators(&["s3://bucket/in/"]), &dest())
        .await
        .is_err());
    assert_eq!(store.open_uploads(), 1);
    assert!(store.data("bucket", "merged.bin").is_none());

    let root = ObjectRef::new("bucket", "");
    let listing = multipart::list_sessions(store.as_ref(), &root, true)
        .await
        .unwrap();
    assert_eq!(listing.sessions.len(), 1);
    assert_eq!(listing.sessions[0].session.key, "merged.bin");
    assert_eq!(listing.sessions[0].total_size(), 6 * MIB as u64);

    let cleaned = multipart::clean_sessions(store.as_ref(), &root, true, None, CleanAction::Complete)
        .await
        .unwrap();
    assert_eq!(cleaned.completed, 1);
    assert_eq!(store.open_uploads(), 0);
    assert_eq!(store.data("bucket", "merged.bin").unwrap().len(), 6 * MIB);
}
