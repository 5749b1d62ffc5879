//! Object-store primitives consumed by the sync and merge engines

pub mod local;
pub mod memory;
pub mod s3;

use crate::error::Result;
use crate::uri::ObjectRef;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::path::PathBuf;
use std::time::SystemTime;

pub use memory::MemoryStore;
pub use s3::S3Store;

/// Stream of object body chunks
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// One object returned by a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Full key (not prefix-stripped)
    pub key: String,
    pub size: u64,
    /// ETag as returned by the backend, quotes included
    pub etag: String,
    pub last_modified: Option<SystemTime>,
}

/// One page of a ListObjects call
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    /// Only set by backends when a delimiter was given
    pub next_marker: Option<String>,
    pub truncated: bool,
}

/// Body of a PutObject call
#[derive(Debug, Clone)]
pub enum Payload {
    /// Bytes already in memory
    Bytes(Bytes),
    /// A local file streamed from disk
    File { path: PathBuf, size: u64 },
}

impl Payload {
    pub fn len(&self) -> u64 {
        match self {
            Payload::Bytes(data) => data.len() as u64,
            Payload::File { size, .. } => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle to an in-progress multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartSession {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

impl MultipartSession {
    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(&self.bucket, &self.key)
    }
}

/// A multipart session as reported by ListMultipartUploads
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub session: MultipartSession,
    pub initiated: Option<SystemTime>,
}

/// Completed multipart upload part info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// Part number (1-indexed)
    pub part_number: i32,
    /// ETag of the uploaded part
    pub etag: String,
    /// Bytes in the part
    pub size: u64,
}

/// A key a quiet batch delete could not remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub message: String,
}

/// The list/get/put/copy/multipart primitives of an S3-like object store
///
/// Engines receive an `Arc<dyn ObjectStore>` so they can run against S3 or
/// against [`MemoryStore`] in tests.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// List one page of keys under `prefix`, starting after `marker`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        marker: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage>;

    /// Read an object as a stream of chunks
    async fn get_object(&self, object: &ObjectRef) -> Result<ByteStream>;

    /// Write an object in one request
    async fn put_object(
        &self,
        object: &ObjectRef,
        payload: Payload,
        content_type: &str,
        acl: Option<&str>,
    ) -> Result<()>;

    /// Server-side copy of `source` to `dest`
    async fn copy_object(&self, dest: &ObjectRef, source: &ObjectRef, acl: Option<&str>)
        -> Result<()>;

    /// Start a multipart upload
    async fn initiate_multipart(
        &self,
        object: &ObjectRef,
        content_type: &str,
        acl: Option<&str>,
    ) -> Result<MultipartSession>;

    /// Upload a part to an ongoing multipart upload
    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: i32,
        data: Bytes,
    ) -> Result<CompletedPart>;

    /// Append a whole existing object as one part
    async fn copy_part(
        &self,
        session: &MultipartSession,
        part_number: i32,
        source: &ObjectRef,
        source_size: u64,
    ) -> Result<CompletedPart>;

    /// Complete a multipart upload; `parts` must be in part-number order
    async fn complete_multipart(
        &self,
        session: &MultipartSession,
        parts: &[CompletedPart],
    ) -> Result<()>;

    /// Abort a multipart upload
    async fn abort_multipart(&self, session: &MultipartSession) -> Result<()>;

    /// Delete many keys in one request; returns the keys that failed
    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
        quiet: bool,
    ) -> Result<Vec<DeleteFailure>>;

    /// List in-progress multipart uploads and common prefixes under `prefix`
    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<(Vec<PendingUpload>, Vec<String>)>;

    /// List parts already uploaded to a session
    async fn list_parts(&self, session: &MultipartSession) -> Result<Vec<CompletedPart>>;
}
