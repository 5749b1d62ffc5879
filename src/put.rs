//! Upload of local files, split into multipart parts when large
//!
//! Files up to `part_size` go up in one put. Larger files are read in
//! `part_size` chunks, each uploaded as the next part. Like a merge, the
//! session always ends completed, aborted, or retained for
//! `bucketsync multipart clean`.

use crate::config::{Config, MIN_PART_SIZE};
use crate::error::{Error, Result};
use crate::merge::SessionResolution;
use crate::storage::local::file_payload;
use crate::storage::{CompletedPart, MultipartSession, ObjectStore};
use crate::uri::ObjectRef;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

#[derive(Debug, Clone)]
pub struct PutOptions {
    /// Files larger than this are split into parts of this size
    pub part_size: u64,
    pub content_type: String,
    pub acl: Option<String>,
    pub abort_on_error: bool,
}

impl PutOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            part_size: config.flush_threshold,
            content_type: config.content_type.clone(),
            acl: config.acl.clone(),
            abort_on_error: config.abort_on_error,
        }
    }
}

impl Default for PutOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// How a file was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutPath {
    Single,
    Multipart,
}

#[derive(Debug, Clone)]
pub struct PutReport {
    pub source: PathBuf,
    pub destination: ObjectRef,
    pub path: PutPath,
    pub parts: Vec<CompletedPart>,
    pub bytes: u64,
    pub session: Option<SessionResolution>,
    pub duration_secs: f64,
}

/// Destination of each source: `dest` itself for one file, `dest/<name>`
/// for several
pub fn destinations(sources: &[PathBuf], dest: &ObjectRef) -> Result<Vec<(PathBuf, ObjectRef)>> {
    if let [single] = sources {
        return Ok(vec![(single.clone(), dest.clone())]);
    }

    sources
        .iter()
        .map(|source| {
            let name = source
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| Error::storage(format!("{} has no file name", source.display())))?;
            Ok((source.clone(), dest.join(name)))
        })
        .collect()
}

pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    options: PutOptions,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, options: PutOptions) -> Result<Self> {
        if options.part_size < MIN_PART_SIZE {
            return Err(Error::config(format!(
                "part size must be at least {} bytes",
                MIN_PART_SIZE
            )));
        }
        Ok(Self { store, options })
    }

    /// Upload one local file to `dest`
    pub async fn put_file(&self, source: &Path, dest: &ObjectRef) -> Result<PutReport> {
        let start = Instant::now();
        let payload = file_payload(source).await?;
        let size = payload.len();

        let mut report = PutReport {
            source: source.to_path_buf(),
            destination: dest.clone(),
            path: PutPath::Single,
            parts: Vec::new(),
            bytes: size,
            session: None,
            duration_secs: 0.0,
        };

        if size <= self.options.part_size {
            tracing::info!(source = %source.display(), dest = %dest, size, "Uploading in one put");
            self.store
                .put_object(dest, payload, &self.options.content_type, self.options.acl.as_deref())
                .await?;
        } else {
            let session = self
                .store
                .initiate_multipart(dest, &self.options.content_type, self.options.acl.as_deref())
                .await?;
            tracing::info!(
                source = %source.display(),
                dest = %dest,
                size,
                upload_id = %session.upload_id,
                "Uploading in parts"
            );

            let mut parts = Vec::new();
            let result = self.upload_parts(&session, source, size, &mut parts).await;
            report.path = PutPath::Multipart;
            report.parts = parts;

            if let Err(e) = result {
                report.session = Some(self.resolve_failed(&session, &e).await);
                return Err(e);
            }
            report.session = Some(SessionResolution::Completed);
        }

        report.duration_secs = start.elapsed().as_secs_f64();
        Ok(report)
    }

    async fn upload_parts(
        &self,
        session: &MultipartSession,
        source: &Path,
        size: u64,
        parts: &mut Vec<CompletedPart>,
    ) -> Result<()> {
        let mut file = File::open(source)
            .await
            .map_err(|e| Error::io(format!("opening {}", source.display()), e))?;

        let mut read = 0u64;
        loop {
            let mut chunk = Vec::with_capacity(self.options.part_size as usize);
            (&mut file)
                .take(self.options.part_size)
                .read_to_end(&mut chunk)
                .await
                .map_err(|e| Error::io(format!("reading {}", source.display()), e))?;
            if chunk.is_empty() {
                break;
            }
            read += chunk.len() as u64;

            let part_number = parts.len() as i32 + 1;
            tracing::debug!(part = part_number, size = chunk.len(), "Uploading part");
            let part = self
                .store
                .upload_part(session, part_number, chunk.into())
                .await?;
            parts.push(part);
        }

        if read != size {
            return Err(Error::ShortRead {
                locator: source.display().to_string(),
                expected: size,
                actual: read,
            });
        }

        self.store.complete_multipart(session, parts).await
    }

    async fn resolve_failed(&self, session: &MultipartSession, error: &Error) -> SessionResolution {
        if matches!(error, Error::ShortRead { .. }) || self.options.abort_on_error {
            tracing::error!(upload_id = %session.upload_id, error = %error, "Upload failed, aborting session");
            if let Err(e) = self.store.abort_multipart(session).await {
                tracing::warn!(upload_id = %session.upload_id, error = %e, "Abort failed");
            }
            SessionResolution::Aborted
        } else {
            tracing::error!(
                bucket = %session.bucket,
                key = %session.key,
                upload_id = %session.upload_id,
                error = %error,
                "Upload failed, multipart session retained for cleanup"
            );
            SessionResolution::Retained
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::StoreCall;
    use crate::storage::MemoryStore;
    use tempfile::TempDir;

    const MIB: usize = 1024 * 1024;

    fn uploader(store: &Arc<MemoryStore>, options: PutOptions) -> Uploader {
        let store: Arc<dyn ObjectStore> = store.clone();
        Uploader::new(store, options).unwrap()
    }

    fn small_parts() -> PutOptions {
        PutOptions {
            part_size: MIN_PART_SIZE,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_small_file_is_one_put() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("small.bin");
        std::fs::write(&path, vec![1u8; 1000]).unwrap();

        let store = Arc::new(MemoryStore::new());
        let report = uploader(&store, PutOptions::default())
            .put_file(&path, &ObjectRef::new("b", "small.bin"))
            .await
            .unwrap();

        assert_eq!(report.path, PutPath::Single);
        assert_eq!(report.session, None);
        assert_eq!(store.data("b", "small.bin").unwrap().len(), 1000);
        assert!(!store
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::InitiateMultipart { .. })));
    }

    #[tokio::test]
    async fn test_large_file_split_into_parts() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.bin");
        let mut data = vec![1u8; 5 * MIB];
        data.extend(vec![2u8; 5 * MIB]);
        data.extend(vec![3u8; 100]);
        std::fs::write(&path, &data).unwrap();

        let store = Arc::new(MemoryStore::new());
        let report = uploader(&store, small_parts())
            .put_file(&path, &ObjectRef::new("b", "big.bin"))
            .await
            .unwrap();

        assert_eq!(report.path, PutPath::Multipart);
        assert_eq!(report.session, Some(SessionResolution::Completed));
        let sizes: Vec<u64> = report.parts.iter().map(|p| p.size).collect();
        assert_eq!(sizes, vec![5 * MIB as u64, 5 * MIB as u64, 100]);
        assert_eq!(&store.data("b", "big.bin").unwrap()[..], &data[..]);
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_part_failure_retains_session() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.bin");
        std::fs::write(&path, vec![0u8; 6 * MIB]).unwrap();

        let store = Arc::new(MemoryStore::new());
        store.fail_part(2);

        let err = uploader(&store, small_parts())
            .put_file(&path, &ObjectRef::new("b", "big.bin"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
        assert_eq!(store.open_uploads(), 1);
        assert!(store.data("b", "big.bin").is_none());
    }

    #[tokio::test]
    async fn test_part_failure_aborts_when_configured() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.bin");
        std::fs::write(&path, vec![0u8; 6 * MIB]).unwrap();

        let store = Arc::new(MemoryStore::new());
        store.fail_part(1);

        let options = PutOptions {
            abort_on_error: true,
            ..small_parts()
        };
        assert!(uploader(&store, options)
            .put_file(&path, &ObjectRef::new("b", "big.bin"))
            .await
            .is_err());
        assert_eq!(store.open_uploads(), 0);
    }

    #[test]
    fn test_destinations() {
        let dest = ObjectRef::new("b", "backup/");
        let one = destinations(&[PathBuf::from("/data/a.tar")], &dest).unwrap();
        assert_eq!(one[0].1, dest);

        let many =
            destinations(&[PathBuf::from("/data/a.tar"), PathBuf::from("b.tar")], &dest).unwrap();
        assert_eq!(many[0].1, ObjectRef::new("b", "backup/a.tar"));
        assert_eq!(many[1].1, ObjectRef::new("b", "backup/b.tar"));
    }

    #[test]
    fn test_rejects_tiny_part_size() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let options = PutOptions {
            part_size: 1024,
            ..Default::default()
        };
        assert!(Uploader::new(store, options).is_err());
    }
}
