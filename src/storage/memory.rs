//! In-memory object store
//!
//! Behaves like a small S3: sorted listings with markers and delimiters,
//! quoted MD5 ETags, multipart sessions that enforce the minimum part size
//! on completion. Every call is recorded so tests can assert on the exact
//! sequence of primitives an engine issued, and faults can be injected per
//! key or per part number.

use crate::config::MIN_PART_SIZE;
use crate::error::{Error, Result};
use crate::storage::{
    ByteStream, CompletedPart, DeleteFailure, ListPage, MultipartSession, ObjectStore,
    ObjectSummary, Payload, PendingUpload,
};
use crate::uri::ObjectRef;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::StreamExt;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Chunk size of streams returned by `get_object`
const STREAM_CHUNK: usize = 1024 * 1024;

/// A recorded primitive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    ListObjects { bucket: String, prefix: String, marker: Option<String> },
    GetObject { key: String },
    PutObject { key: String, size: u64 },
    CopyObject { dest: String, source: String },
    InitiateMultipart { key: String },
    UploadPart { part_number: i32, size: u64 },
    CopyPart { part_number: i32, source: String },
    CompleteMultipart { part_numbers: Vec<i32> },
    AbortMultipart { upload_id: String },
    DeleteObjects { keys: Vec<String>, quiet: bool },
    ListMultipartUploads { prefix: String },
    ListParts { upload_id: String },
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    last_modified: SystemTime,
}

#[derive(Debug, Clone)]
struct StoredPart {
    data: Bytes,
    etag: String,
}

#[derive(Debug, Clone)]
struct Upload {
    bucket: String,
    key: String,
    initiated: SystemTime,
    parts: BTreeMap<i32, StoredPart>,
}

/// In-memory [`ObjectStore`] implementation
#[derive(Default)]
pub struct MemoryStore {
    objects: DashMap<ObjectRef, StoredObject>,
    uploads: DashMap<String, Upload>,
    calls: Mutex<Vec<StoreCall>>,
    next_upload: AtomicU64,

    // fault injection
    failing_keys: Mutex<HashSet<String>>,
    failing_parts: Mutex<HashSet<i32>>,
    truncated_reads: DashMap<String, u64>,
    listing_limits: DashMap<String, usize>,
    listing_served: DashMap<String, usize>,
}

/// Keys after `marker`; a marker naming a common prefix also skips its keys
fn past_marker(key: &str, marker: &str, delimiter: &str) -> bool {
    if !delimiter.is_empty() && marker.ends_with(delimiter) && key.starts_with(marker) {
        return false;
    }
    key > marker
}

fn quoted_md5(data: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Md5::digest(data)))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, bypassing the call log
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        self.objects.insert(
            ObjectRef::new(bucket, key),
            StoredObject {
                etag: quoted_md5(&data),
                data,
                last_modified: SystemTime::now(),
            },
        );
    }

    /// Contents of an object, if present
    pub fn data(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .get(&ObjectRef::new(bucket, key))
            .map(|o| o.data.clone())
    }

    /// ETag of an object, quotes included
    pub fn etag(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects
            .get(&ObjectRef::new(bucket, key))
            .map(|o| o.etag.clone())
    }

    /// All keys in a bucket, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|e| e.key().bucket == bucket)
            .map(|e| e.key().key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of multipart sessions neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.uploads.len()
    }

    /// Calls recorded so far
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Make every get/put/copy touching `key` fail
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().insert(key.to_string());
    }

    /// Make upload_part/copy_part fail for this part number
    pub fn fail_part(&self, part_number: i32) {
        self.failing_parts.lock().insert(part_number);
    }

    /// Return only the first `len` bytes when `key` is read
    pub fn truncate_reads(&self, key: &str, len: u64) {
        self.truncated_reads.insert(key.to_string(), len);
    }

    /// Let `pages` listing calls on `bucket` succeed, fail every later one
    pub fn fail_listing_after(&self, bucket: &str, pages: usize) {
        self.listing_limits.insert(bucket.to_string(), pages);
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().push(call);
    }

    fn check_key(&self, key: &str) -> Result<()> {
        if self.failing_keys.lock().contains(key) {
            return Err(Error::storage(format!("injected failure for {}", key)));
        }
        Ok(())
    }

    fn check_part(&self, part_number: i32) -> Result<()> {
        if self.failing_parts.lock().contains(&part_number) {
            return Err(Error::storage(format!(
                "injected failure for part {}",
                part_number
            )));
        }
        Ok(())
    }

    fn read(&self, object: &ObjectRef) -> Result<Bytes> {
        self.check_key(&object.key)?;
        let data = self
            .objects
            .get(object)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::storage(format!("NoSuchKey: {}", object)))?;
        Ok(data)
    }

    fn upload(&self, session: &MultipartSession) -> Result<()> {
        if self.uploads.contains_key(&session.upload_id) {
            Ok(())
        } else {
            Err(Error::multipart(
                "NoSuchUpload",
                Some(session.upload_id.as_str()),
            ))
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        marker: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage> {
        self.record(StoreCall::ListObjects {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            marker: marker.map(str::to_string),
        });

        let served = {
            let mut count = self.listing_served.entry(bucket.to_string()).or_insert(0);
            *count += 1;
            *count - 1
        };
        if let Some(limit) = self.listing_limits.get(bucket).map(|l| *l) {
            if served >= limit {
                return Err(Error::storage("injected listing failure"));
            }
        }

        let mut matching: Vec<ObjectSummary> = self
            .objects
            .iter()
            .filter(|e| e.key().bucket == bucket && e.key().key.starts_with(prefix))
            .filter(|e| marker.map_or(true, |m| past_marker(&e.key().key, m, delimiter)))
            .map(|e| ObjectSummary {
                key: e.key().key.clone(),
                size: e.value().data.len() as u64,
                etag: e.value().etag.clone(),
                last_modified: Some(e.value().last_modified),
            })
            .collect();
        matching.sort_by(|a, b| a.key.cmp(&b.key));

        let limit = max_keys.max(1) as usize;
        let mut page = ListPage::default();
        let mut prefixes = BTreeSet::new();
        let mut returned = 0usize;
        let mut last_returned = None;

        for object in matching {
            if returned == limit {
                page.truncated = true;
                break;
            }

            let rest = &object.key[prefix.len()..];
            if !delimiter.is_empty() {
                if let Some(pos) = rest.find(delimiter) {
                    let common = format!("{}{}", prefix, &rest[..pos + delimiter.len()]);
                    if prefixes.insert(common.clone()) {
                        returned += 1;
                        last_returned = Some(common);
                    }
                    continue;
                }
            }

            last_returned = Some(object.key.clone());
            page.objects.push(object);
            returned += 1;
        }

        page.common_prefixes = prefixes.into_iter().collect();
        if page.truncated && !delimiter.is_empty() {
            page.next_marker = last_returned;
        }
        Ok(page)
    }

    async fn get_object(&self, object: &ObjectRef) -> Result<ByteStream> {
        self.record(StoreCall::GetObject {
            key: object.key.clone(),
        });

        let mut data = self.read(object)?;
        if let Some(len) = self.truncated_reads.get(&object.key) {
            data.truncate(*len as usize);
        }

        let chunks: Vec<Result<Bytes>> = data
            .chunks(STREAM_CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn put_object(
        &self,
        object: &ObjectRef,
        payload: Payload,
        _content_type: &str,
        _acl: Option<&str>,
    ) -> Result<()> {
        self.record(StoreCall::PutObject {
            key: object.key.clone(),
            size: payload.len(),
        });
        self.check_key(&object.key)?;

        let data = match payload {
            Payload::Bytes(data) => data,
            Payload::File { path, .. } => Bytes::from(
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| Error::io(format!("reading {}", path.display()), e))?,
            ),
        };
        self.insert(&object.bucket, &object.key, data);
        Ok(())
    }

    async fn copy_object(
        &self,
        dest: &ObjectRef,
        source: &ObjectRef,
        _acl: Option<&str>,
    ) -> Result<()> {
        self.record(StoreCall::CopyObject {
            dest: dest.to_string(),
            source: source.to_string(),
        });
        self.check_key(&dest.key)?;

        let data = self.read(source)?;
        self.insert(&dest.bucket, &dest.key, data);
        Ok(())
    }

    async fn initiate_multipart(
        &self,
        object: &ObjectRef,
        _content_type: &str,
        _acl: Option<&str>,
    ) -> Result<MultipartSession> {
        self.record(StoreCall::InitiateMultipart {
            key: object.key.clone(),
        });
        self.check_key(&object.key)?;

        let upload_id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst) + 1);
        self.uploads.insert(
            upload_id.clone(),
            Upload {
                bucket: object.bucket.clone(),
                key: object.key.clone(),
                initiated: SystemTime::now(),
                parts: BTreeMap::new(),
            },
        );

        Ok(MultipartSession {
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: i32,
        data: Bytes,
    ) -> Result<CompletedPart> {
        self.record(StoreCall::UploadPart {
            part_number,
            size: data.len() as u64,
        });
        self.check_part(part_number)?;
        self.upload(session)?;

        let etag = quoted_md5(&data);
        let size = data.len() as u64;
        if let Some(mut upload) = self.uploads.get_mut(&session.upload_id) {
            upload.parts.insert(
                part_number,
                StoredPart {
                    data,
                    etag: etag.clone(),
                },
            );
        }

        Ok(CompletedPart {
            part_number,
            etag,
            size,
        })
    }

    async fn copy_part(
        &self,
        session: &MultipartSession,
        part_number: i32,
        source: &ObjectRef,
        _source_size: u64,
    ) -> Result<CompletedPart> {
        self.record(StoreCall::CopyPart {
            part_number,
            source: source.to_string(),
        });
        self.check_part(part_number)?;
        self.upload(session)?;

        let data = self.read(source)?;
        let etag = quoted_md5(&data);
        let size = data.len() as u64;
        if let Some(mut upload) = self.uploads.get_mut(&session.upload_id) {
            upload.parts.insert(
                part_number,
                StoredPart {
                    data,
                    etag: etag.clone(),
                },
            );
        }

        Ok(CompletedPart {
            part_number,
            etag,
            size,
        })
    }

    async fn complete_multipart(
        &self,
        session: &MultipartSession,
        parts: &[CompletedPart],
    ) -> Result<()> {
        self.record(StoreCall::CompleteMultipart {
            part_numbers: parts.iter().map(|p| p.part_number).collect(),
        });
        let upload_id = Some(session.upload_id.as_str());

        let upload = self
            .uploads
            .get(&session.upload_id)
            .map(|u| u.clone())
            .ok_or_else(|| Error::multipart("NoSuchUpload", upload_id))?;

        if parts.is_empty() {
            return Err(Error::multipart("MalformedXML: no parts", upload_id));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(Error::multipart("InvalidPartOrder", upload_id));
        }

        let mut body = BytesMut::new();
        let mut digests = Vec::with_capacity(parts.len() * 16);
        for (idx, part) in parts.iter().enumerate() {
            let stored = upload
                .parts
                .get(&part.part_number)
                .filter(|p| p.etag == part.etag)
                .ok_or_else(|| {
                    Error::multipart(format!("InvalidPart: {}", part.part_number), upload_id)
                })?;
            if idx + 1 < parts.len() && (stored.data.len() as u64) < MIN_PART_SIZE {
                return Err(Error::multipart(
                    format!("EntityTooSmall: part {}", part.part_number),
                    upload_id,
                ));
            }
            body.extend_from_slice(&stored.data);
            digests.extend_from_slice(&Md5::digest(&stored.data));
        }

        let etag = format!("\"{}-{}\"", hex::encode(Md5::digest(&digests)), parts.len());
        self.objects.insert(
            ObjectRef::new(&upload.bucket, &upload.key),
            StoredObject {
                data: body.freeze(),
                etag,
                last_modified: SystemTime::now(),
            },
        );
        self.uploads.remove(&session.upload_id);
        Ok(())
    }

    async fn abort_multipart(&self, session: &MultipartSession) -> Result<()> {
        self.record(StoreCall::AbortMultipart {
            upload_id: session.upload_id.clone(),
        });
        self.uploads
            .remove(&session.upload_id)
            .map(|_| ())
            .ok_or_else(|| Error::multipart("NoSuchUpload", Some(session.upload_id.as_str())))
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
        quiet: bool,
    ) -> Result<Vec<DeleteFailure>> {
        self.record(StoreCall::DeleteObjects {
            keys: keys.to_vec(),
            quiet,
        });

        let mut failures = Vec::new();
        for key in keys {
            if let Err(e) = self.check_key(key) {
                failures.push(DeleteFailure {
                    key: key.clone(),
                    message: e.to_string(),
                });
                continue;
            }
            self.objects.remove(&ObjectRef::new(bucket, key.as_str()));
        }
        Ok(failures)
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<(Vec<PendingUpload>, Vec<String>)> {
        self.record(StoreCall::ListMultipartUploads {
            prefix: prefix.to_string(),
        });

        let mut uploads = Vec::new();
        let mut prefixes = BTreeSet::new();
        for entry in self.uploads.iter() {
            let upload = entry.value();
            if upload.bucket != bucket || !upload.key.starts_with(prefix) {
                continue;
            }
            let rest = &upload.key[prefix.len()..];
            if !delimiter.is_empty() {
                if let Some(pos) = rest.find(delimiter) {
                    prefixes.insert(format!("{}{}", prefix, &rest[..pos + delimiter.len()]));
                    continue;
                }
            }
            uploads.push(PendingUpload {
                session: MultipartSession {
                    bucket: upload.bucket.clone(),
                    key: upload.key.clone(),
                    upload_id: entry.key().clone(),
                },
                initiated: Some(upload.initiated),
            });
        }
        uploads.sort_by(|a, b| {
            (&a.session.key, &a.session.upload_id).cmp(&(&b.session.key, &b.session.upload_id))
        });
        Ok((uploads, prefixes.into_iter().collect()))
    }

    async fn list_parts(&self, session: &MultipartSession) -> Result<Vec<CompletedPart>> {
        self.record(StoreCall::ListParts {
            upload_id: session.upload_id.clone(),
        });

        let upload = self
            .uploads
            .get(&session.upload_id)
            .ok_or_else(|| Error::multipart("NoSuchUpload", Some(session.upload_id.as_str())))?;
        Ok(upload
            .parts
            .iter()
            .map(|(n, p)| CompletedPart {
                part_number: *n,
                etag: p.etag.clone(),
                size: p.data.len() as u64,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(store: &MemoryStore, bucket: &str, key: &str) -> Vec<u8> {
        let mut stream = store.get_object(&ObjectRef::new(bucket, key)).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_list_paginates_with_delimiter_marker() {
        let store = MemoryStore::new();
        store.insert("b", "p/a", "1");
        store.insert("b", "p/b", "2");
        store.insert("b", "p/sub/c", "3");
        store.insert("b", "q/x", "4");

        let page = store.list_objects("b", "p/", "/", None, 2).await.unwrap();
        assert!(page.truncated);
        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.next_marker.as_deref(), Some("p/b"));

        let page = store
            .list_objects("b", "p/", "/", page.next_marker.as_deref(), 2)
            .await
            .unwrap();
        assert!(!page.truncated);
        assert!(page.objects.is_empty());
        assert_eq!(page.common_prefixes, vec!["p/sub/".to_string()]);
    }

    #[tokio::test]
    async fn test_prefix_marker_skips_rolled_up_keys() {
        let store = MemoryStore::new();
        store.insert("b", "a/1", "1");
        store.insert("b", "a/2", "2");
        store.insert("b", "b", "3");

        let page = store.list_objects("b", "", "/", None, 1).await.unwrap();
        assert_eq!(page.common_prefixes, vec!["a/".to_string()]);
        assert_eq!(page.next_marker.as_deref(), Some("a/"));

        let page = store.list_objects("b", "", "/", Some("a/"), 1).await.unwrap();
        assert!(page.common_prefixes.is_empty());
        assert_eq!(page.objects[0].key, "b");
        assert!(!page.truncated);
    }

    #[tokio::test]
    async fn test_recursive_list_has_no_next_marker() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store.insert("b", &format!("k{}", i), "x");
        }
        let page = store.list_objects("b", "", "", None, 2).await.unwrap();
        assert!(page.truncated);
        assert!(page.next_marker.is_none());
    }

    #[tokio::test]
    async fn test_multipart_rejects_small_middle_part() {
        let store = MemoryStore::new();
        let dest = ObjectRef::new("b", "out");
        let session = store.initiate_multipart(&dest, "x", None).await.unwrap();

        let p1 = store.upload_part(&session, 1, Bytes::from(vec![1u8; 10])).await.unwrap();
        let p2 = store.upload_part(&session, 2, Bytes::from(vec![2u8; 10])).await.unwrap();

        let err = store.complete_multipart(&session, &[p1, p2]).await.unwrap_err();
        assert!(err.to_string().contains("EntityTooSmall"));
        assert_eq!(store.open_uploads(), 1);
    }

    #[tokio::test]
    async fn test_multipart_assembles_in_order() {
        let store = MemoryStore::new();
        store.insert("b", "big", vec![9u8; MIN_PART_SIZE as usize]);
        let dest = ObjectRef::new("b", "out");
        let session = store.initiate_multipart(&dest, "x", None).await.unwrap();

        let p1 = store
            .copy_part(&session, 1, &ObjectRef::new("b", "big"), MIN_PART_SIZE)
            .await
            .unwrap();
        let p2 = store.upload_part(&session, 2, Bytes::from("tail")).await.unwrap();
        store.complete_multipart(&session, &[p1, p2]).await.unwrap();

        let data = collect(&store, "b", "out").await;
        assert_eq!(data.len() as u64, MIN_PART_SIZE + 4);
        assert_eq!(&data[data.len() - 4..], b"tail");
        assert!(store.etag("b", "out").unwrap().ends_with("-2\""));
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_truncated_reads() {
        let store = MemoryStore::new();
        store.insert("b", "k", "0123456789");
        store.truncate_reads("k", 4);
        assert_eq!(collect(&store, "b", "k").await, b"0123");
    }
}
