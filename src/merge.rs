//! Merge engine: assemble one object from many
//!
//! Sources are visited in `bucket/key` order. Large sources go in as
//! server-side part copies; small ones are read into a buffer that is
//! uploaded as a part whenever it grows past the flush threshold. Every
//! part except the last is therefore at least the backend's minimum part
//! size.
//!
//! A multipart session, once opened, always ends in exactly one
//! [`SessionResolution`]: completed, aborted, or retained for an operator
//! to clean up with `bucketsync multipart`.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::{CompletedPart, MultipartSession, ObjectStore, Payload};
use crate::sync::scan::build_remote_catalog;
use crate::uri::{Locator, ObjectRef};
use bytes::BytesMut;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Options for one merge
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Sources larger than this may be part-copied
    pub part_threshold: u64,
    /// Buffered bytes beyond this are uploaded as a part
    pub flush_threshold: u64,
    /// Report the plan without touching the destination
    pub dry_run: bool,
    /// Abort instead of retaining the session after a part failure
    pub abort_on_error: bool,
    pub content_type: String,
    pub acl: Option<String>,
    pub page_size: i32,
}

impl MergeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            part_threshold: config.part_threshold,
            flush_threshold: config.flush_threshold,
            dry_run: false,
            abort_on_error: config.abort_on_error,
            content_type: config.content_type.clone(),
            acl: config.acl.clone(),
            page_size: config.page_size,
        }
    }
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// One object to be merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSource {
    pub object: ObjectRef,
    pub size: u64,
}

/// Counts by how each source would be handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub copy_count: u64,
    pub copy_bytes: u64,
    pub buffer_count: u64,
    pub buffer_bytes: u64,
}

impl MergeSummary {
    pub fn of(sources: &[MergeSource], part_threshold: u64) -> Self {
        let mut summary = Self::default();
        for source in sources {
            if source.size > part_threshold {
                summary.copy_count += 1;
                summary.copy_bytes += source.size;
            } else {
                summary.buffer_count += 1;
                summary.buffer_bytes += source.size;
            }
        }
        summary
    }
}

/// Which way the destination was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePath {
    DryRun,
    Empty,
    SingleCopy,
    BufferedPut,
    Multipart,
}

impl fmt::Display for MergePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergePath::DryRun => "dry-run",
            MergePath::Empty => "empty",
            MergePath::SingleCopy => "single-copy",
            MergePath::BufferedPut => "buffered-put",
            MergePath::Multipart => "multipart",
        };
        f.write_str(name)
    }
}

/// How a multipart session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionResolution {
    Completed,
    Aborted,
    /// Left open on purpose after a failure
    Retained,
}

/// Result of a merge
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub destination: ObjectRef,
    pub path: MergePath,
    pub summary: MergeSummary,
    pub sources: Vec<MergeSource>,
    /// Parts in completion order
    pub parts: Vec<CompletedPart>,
    /// `None` when no session was opened
    pub session: Option<SessionResolution>,
    pub bytes_copied: u64,
    pub bytes_uploaded: u64,
    pub duration_secs: f64,
}

/// Mutable state of an open multipart assembly
struct MergePlan {
    session: MultipartSession,
    buffer: BytesMut,
    parts: Vec<CompletedPart>,
    bytes_copied: u64,
    bytes_uploaded: u64,
}

impl MergePlan {
    fn new(session: MultipartSession) -> Self {
        Self {
            session,
            buffer: BytesMut::new(),
            parts: Vec::new(),
            bytes_copied: 0,
            bytes_uploaded: 0,
        }
    }

    fn next_part_number(&self) -> i32 {
        self.parts.len() as i32 + 1
    }
}

/// Wrap a store error as a multipart error bound to `session`
fn session_error(session: &MultipartSession, e: Error) -> Error {
    match e {
        Error::Multipart { .. } => e,
        other => Error::multipart(other.to_string(), Some(session.upload_id.as_str())),
    }
}

pub struct MergeEngine {
    store: Arc<dyn ObjectStore>,
    options: MergeOptions,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn ObjectStore>, options: MergeOptions) -> Self {
        Self { store, options }
    }

    /// Merge every object below the `sources` prefixes into `destination`
    pub async fn merge(&self, sources: &[Locator], destination: &Locator) -> Result<MergeReport> {
        let dest = match destination {
            Locator::Remote(obj) if !obj.key.is_empty() => obj.clone(),
            _ => {
                return Err(Error::invalid_locator(
                    destination.to_string(),
                    "merge destination must be an s3:// object key",
                ))
            }
        };

        let sources = self.collect_sources(sources).await?;
        self.merge_objects(&sources, &dest).await
    }

    /// List source prefixes recursively and order the objects found
    ///
    /// Zero-byte objects are skipped and duplicates collapse. A failed
    /// listing is fatal here, since merging a partial set would silently
    /// produce the wrong object.
    pub async fn collect_sources(&self, sources: &[Locator]) -> Result<Vec<MergeSource>> {
        let mut found: BTreeMap<String, MergeSource> = BTreeMap::new();

        for locator in sources {
            let Locator::Remote(root) = locator else {
                return Err(Error::invalid_locator(
                    locator.to_string(),
                    "merge sources must be s3:// locations",
                ));
            };

            let catalog =
                build_remote_catalog(self.store.as_ref(), root, "", self.options.page_size).await;
            if !catalog.complete {
                return Err(Error::Listing {
                    bucket: root.bucket.clone(),
                    prefix: root.key.clone(),
                    message: "listing stopped early".to_string(),
                });
            }
            tracing::info!(source = %locator, objects = catalog.len(), "Listed merge source");

            for (relative, entry) in catalog.iter() {
                if entry.size == 0 {
                    continue;
                }
                let object = ObjectRef::new(&root.bucket, format!("{}{}", root.key, relative));
                found.insert(
                    format!("{}/{}", object.bucket, object.key),
                    MergeSource {
                        object,
                        size: entry.size,
                    },
                );
            }
        }

        Ok(found.into_values().collect())
    }

    /// Run the merge over already ordered sources
    pub async fn merge_objects(
        &self,
        sources: &[MergeSource],
        dest: &ObjectRef,
    ) -> Result<MergeReport> {
        let start = Instant::now();
        let summary = MergeSummary::of(sources, self.options.part_threshold);
        tracing::info!(
            dest = %dest,
            copy = summary.copy_count,
            copy_bytes = summary.copy_bytes,
            buffered = summary.buffer_count,
            buffered_bytes = summary.buffer_bytes,
            "Merge plan"
        );

        let mut report = MergeReport {
            destination: dest.clone(),
            path: MergePath::DryRun,
            summary,
            sources: sources.to_vec(),
            parts: Vec::new(),
            session: None,
            bytes_copied: 0,
            bytes_uploaded: 0,
            duration_secs: 0.0,
        };

        if self.options.dry_run {
            return Ok(report);
        }

        match sources {
            [] => {
                tracing::warn!(dest = %dest, "No source objects, nothing to merge");
                report.path = MergePath::Empty;
            }
            [single] => {
                tracing::info!(source = %single.object, dest = %dest, "Single source, copying");
                self.store
                    .copy_object(dest, &single.object, self.options.acl.as_deref())
                    .await
                    .map_err(|e| Error::Transfer {
                        from: single.object.to_string(),
                        to: dest.to_string(),
                        message: e.to_string(),
                    })?;
                report.path = MergePath::SingleCopy;
                report.bytes_copied = single.size;
            }
            _ => self.assemble(sources, dest, &mut report).await?,
        }

        report.duration_secs = start.elapsed().as_secs_f64();
        Ok(report)
    }

    async fn assemble(
        &self,
        sources: &[MergeSource],
        dest: &ObjectRef,
        report: &mut MergeReport,
    ) -> Result<()> {
        let session = self
            .store
            .initiate_multipart(dest, &self.options.content_type, self.options.acl.as_deref())
            .await
            .map_err(|e| match e {
                e @ Error::Multipart { .. } => e,
                other => Error::multipart(other.to_string(), None),
            })?;
        tracing::info!(dest = %dest, upload_id = %session.upload_id, "Opened multipart session");

        let mut plan = MergePlan::new(session);

        if let Err(e) = self.add_sources(&mut plan, sources).await {
            let resolution = self.resolve_failed(&plan.session, &e).await;
            report.session = Some(resolution);
            return Err(e);
        }

        if plan.parts.is_empty() {
            // everything fit in one buffer: a plain put is cheaper
            self.abort(&plan.session).await;
            report.session = Some(SessionResolution::Aborted);

            let data = plan.buffer.split().freeze();
            let size = data.len() as u64;
            tracing::info!(dest = %dest, size, "Writing merged object in one put");
            self.store
                .put_object(
                    dest,
                    Payload::Bytes(data),
                    &self.options.content_type,
                    self.options.acl.as_deref(),
                )
                .await?;

            report.path = MergePath::BufferedPut;
            report.bytes_uploaded = size;
            return Ok(());
        }

        if let Err(e) = self.finish(&mut plan).await {
            let resolution = self.resolve_failed(&plan.session, &e).await;
            report.session = Some(resolution);
            report.parts = plan.parts;
            return Err(e);
        }

        tracing::info!(
            dest = %dest,
            upload_id = %plan.session.upload_id,
            parts = plan.parts.len(),
            "Multipart upload complete"
        );
        report.path = MergePath::Multipart;
        report.session = Some(SessionResolution::Completed);
        report.bytes_copied = plan.bytes_copied;
        report.bytes_uploaded = plan.bytes_uploaded;
        report.parts = plan.parts;
        Ok(())
    }

    async fn add_sources(&self, plan: &mut MergePlan, sources: &[MergeSource]) -> Result<()> {
        let threshold = self.options.part_threshold;

        for source in sources {
            let buffered = plan.buffer.len() as u64;
            if source.size > threshold && (buffered == 0 || buffered > threshold) {
                self.flush(plan).await?;
                self.copy_part(plan, source).await?;
            } else {
                self.read_into_buffer(plan, source).await?;
                if plan.buffer.len() as u64 > self.options.flush_threshold {
                    self.flush(plan).await?;
                }
            }
        }
        Ok(())
    }

    async fn copy_part(&self, plan: &mut MergePlan, source: &MergeSource) -> Result<()> {
        let part_number = plan.next_part_number();
        tracing::info!(source = %source.object, part = part_number, size = source.size, "Part-copying");

        let part = self
            .store
            .copy_part(&plan.session, part_number, &source.object, source.size)
            .await
            .map_err(|e| session_error(&plan.session, e))?;

        plan.bytes_copied += source.size;
        plan.parts.push(part);
        Ok(())
    }

    async fn read_into_buffer(&self, plan: &mut MergePlan, source: &MergeSource) -> Result<()> {
        tracing::debug!(
            source = %source.object,
            size = source.size,
            buffered = plan.buffer.len(),
            "Buffering"
        );

        let transfer_error = |e: Error| Error::Transfer {
            from: source.object.to_string(),
            to: plan.session.object().to_string(),
            message: e.to_string(),
        };

        let mut stream = self
            .store
            .get_object(&source.object)
            .await
            .map_err(&transfer_error)?;

        let mut read = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(&transfer_error)?;
            read += chunk.len() as u64;
            plan.buffer.extend_from_slice(&chunk);
        }

        if read != source.size {
            return Err(Error::ShortRead {
                locator: source.object.to_string(),
                expected: source.size,
                actual: read,
            });
        }
        Ok(())
    }

    /// Upload the buffer as the next part, if it holds anything
    async fn flush(&self, plan: &mut MergePlan) -> Result<()> {
        if plan.buffer.is_empty() {
            return Ok(());
        }

        let part_number = plan.next_part_number();
        let data = plan.buffer.split().freeze();
        let size = data.len() as u64;
        tracing::info!(part = part_number, size, "Uploading buffered part");

        let part = self
            .store
            .upload_part(&plan.session, part_number, data)
            .await
            .map_err(|e| session_error(&plan.session, e))?;

        plan.bytes_uploaded += size;
        plan.parts.push(part);
        Ok(())
    }

    /// Flush the remainder as the last part and complete the session
    async fn finish(&self, plan: &mut MergePlan) -> Result<()> {
        self.flush(plan).await?;
        self.store
            .complete_multipart(&plan.session, &plan.parts)
            .await
            .map_err(|e| session_error(&plan.session, e))
    }

    async fn abort(&self, session: &MultipartSession) {
        if let Err(e) = self.store.abort_multipart(session).await {
            tracing::warn!(
                key = %session.key,
                upload_id = %session.upload_id,
                error = %e,
                "Abort failed, session may still be open"
            );
        }
    }

    /// Decide what happens to the session after `error`
    async fn resolve_failed(&self, session: &MultipartSession, error: &Error) -> SessionResolution {
        let abort = matches!(error, Error::ShortRead { .. }) || self.options.abort_on_error;

        if abort {
            tracing::error!(
                key = %session.key,
                upload_id = %session.upload_id,
                error = %error,
                "Merge failed, aborting multipart session"
            );
            self.abort(session).await;
            SessionResolution::Aborted
        } else {
            tracing::error!(
                bucket = %session.bucket,
                key = %session.key,
                upload_id = %session.upload_id,
                error = %error,
                "Merge failed, multipart session retained for cleanup"
            );
            SessionResolution::Retained
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_PART_SIZE;
    use crate::storage::memory::StoreCall;
    use crate::storage::MemoryStore;

    const MIB: usize = 1024 * 1024;

    fn source(key: &str, size: u64) -> MergeSource {
        MergeSource {
            object: ObjectRef::new("b", key),
            size,
        }
    }

    #[test]
    fn test_summary_splits_on_threshold() {
        let sources = vec![
            source("a", MIN_PART_SIZE + 1),
            source("b", MIN_PART_SIZE),
            source("c", 10),
        ];
        let summary = MergeSummary::of(&sources, MIN_PART_SIZE);
        assert_eq!(summary.copy_count, 1);
        assert_eq!(summary.copy_bytes, MIN_PART_SIZE + 1);
        assert_eq!(summary.buffer_count, 2);
        assert_eq!(summary.buffer_bytes, MIN_PART_SIZE + 10);
    }

    #[tokio::test]
    async fn test_collect_sources_sorts_and_dedups() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", "logs/part-2", "22");
        store.insert("b", "logs/part-1", "1");
        store.insert("b", "logs/empty", "");
        store.insert("b", "other", "x");

        let engine = MergeEngine::new(store, MergeOptions::default());
        let found = engine
            .collect_sources(&[
                Locator::parse("s3://b/logs/part-").unwrap(),
                Locator::parse("s3://b/logs/").unwrap(),
            ])
            .await
            .unwrap();

        let keys: Vec<_> = found.iter().map(|s| s.object.key.as_str()).collect();
        assert_eq!(keys, vec!["logs/part-1", "logs/part-2"]);
        assert_eq!(found[1].size, 2);
    }

    #[tokio::test]
    async fn test_collect_sources_orders_by_raw_key() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", "in/z", "z");
        store.insert("b", "in/\u{e9}t\u{e9}", "e");
        store.insert("b", "in/a b", "a");

        let engine = MergeEngine::new(store, MergeOptions::default());
        let found = engine
            .collect_sources(&[Locator::parse("s3://b/in/").unwrap()])
            .await
            .unwrap();

        let keys: Vec<_> = found.iter().map(|s| s.object.key.as_str()).collect();
        assert_eq!(keys, vec!["in/a b", "in/z", "in/\u{e9}t\u{e9}"]);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let store = Arc::new(MemoryStore::new());
        let engine = MergeEngine::new(
            store.clone(),
            MergeOptions {
                dry_run: true,
                ..Default::default()
            },
        );

        let report = engine
            .merge_objects(&[source("a", 1), source("b", 2)], &ObjectRef::new("b", "out"))
            .await
            .unwrap();
        assert_eq!(report.path, MergePath::DryRun);
        assert_eq!(report.summary.buffer_count, 2);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_short_read_aborts_session() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", "a", vec![1u8; 6 * MIB]);
        store.insert("b", "b", vec![2u8; 100]);
        store.truncate_reads("b", 10);

        let engine = MergeEngine::new(store.clone(), MergeOptions::default());
        let sources = vec![source("a", 6 * MIB as u64), source("b", 100)];
        let err = engine
            .merge_objects(&sources, &ObjectRef::new("b", "out"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ShortRead { expected: 100, actual: 10, .. }));
        assert_eq!(store.open_uploads(), 0);
        assert!(store.data("b", "out").is_none());
    }

    #[tokio::test]
    async fn test_part_failure_retains_session() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", "a", vec![1u8; 6 * MIB]);
        store.insert("b", "b", vec![2u8; 6 * MIB]);
        store.fail_part(2);

        let engine = MergeEngine::new(store.clone(), MergeOptions::default());
        let sources = vec![source("a", 6 * MIB as u64), source("b", 6 * MIB as u64)];
        let err = engine
            .merge_objects(&sources, &ObjectRef::new("b", "out"))
            .await
            .unwrap_err();

        match err {
            Error::Multipart { upload_id, .. } => assert!(upload_id.is_some()),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.open_uploads(), 1);
        assert!(!store
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::AbortMultipart { .. })));
    }

    #[tokio::test]
    async fn test_part_failure_aborts_when_configured() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", "a", vec![1u8; 6 * MIB]);
        store.insert("b", "b", vec![2u8; 6 * MIB]);
        store.fail_part(1);

        let engine = MergeEngine::new(
            store.clone(),
            MergeOptions {
                abort_on_error: true,
                ..Default::default()
            },
        );
        let sources = vec![source("a", 6 * MIB as u64), source("b", 6 * MIB as u64)];
        assert!(engine
            .merge_objects(&sources, &ObjectRef::new("b", "out"))
            .await
            .is_err());
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_merge_rejects_local_destination() {
        let engine = MergeEngine::new(Arc::new(MemoryStore::new()), MergeOptions::default());
        let err = engine
            .merge(&[Locator::parse("s3://b/x").unwrap()], &Locator::parse("/tmp/out").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_fatal_before_work());
    }
}
