//! Local filesystem side of a sync

use crate::error::{Error, Result};
use crate::storage::{ByteStream, Payload};
use crate::types::Entry;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// A directory tree on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalTree {
    /// Root path of the tree
    root: PathBuf,
}

impl LocalTree {
    /// Create a tree rooted at the given path
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a forward-slash key to a path below the root
    pub fn resolve(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for component in key.split('/').filter(|c| !c.is_empty()) {
            path.push(component);
        }
        path
    }

    /// List every regular file below the root as `(key, entry)`
    ///
    /// A missing root is an empty tree.
    pub async fn list(&self) -> Result<Vec<(String, Entry)>> {
        let root = self.root.clone();

        if !fs::try_exists(&root).await.unwrap_or(false) {
            tracing::debug!(root = %root.display(), "Local root does not exist");
            return Ok(Vec::new());
        }

        // jwalk in a blocking task for parallel directory walking
        let entries = tokio::task::spawn_blocking(move || {
            let mut results = Vec::new();

            for entry in jwalk::WalkDir::new(&root)
                .skip_hidden(false)
                .follow_links(false)
                .parallelism(jwalk::Parallelism::RayonNewPool(num_cpus::get()))
            {
                match entry {
                    Ok(e) => {
                        if !e.file_type().is_file() {
                            continue;
                        }

                        let path = e.path();
                        let Ok(relative) = path.strip_prefix(&root) else {
                            tracing::warn!(path = %path.display(), "Path outside walk root");
                            continue;
                        };
                        let key = relative_key(relative);
                        if key.is_empty() {
                            continue;
                        }

                        let metadata = match e.metadata() {
                            Ok(m) => m,
                            Err(err) => {
                                tracing::warn!(path = %path.display(), error = %err, "Cannot stat file");
                                continue;
                            }
                        };

                        results.push((
                            key,
                            Entry {
                                size: metadata.len(),
                                digest: String::new(),
                                modified: metadata.modified().ok(),
                            },
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Error walking directory");
                    }
                }
            }

            results
        })
        .await
        .map_err(|e| Error::io("spawn_blocking", std::io::Error::other(e.to_string())))?;

        Ok(entries)
    }

    /// Remove one file below the root
    pub async fn remove(&self, key: &str) -> Result<()> {
        let path = self.resolve(key);
        fs::remove_file(&path)
            .await
            .map_err(|e| Error::io(format!("removing {}", path.display()), e))
    }
}

/// Join path components with forward slashes
fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Build an upload payload for a local file
pub async fn file_payload(path: &Path) -> Result<Payload> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|e| Error::io(format!("reading metadata of {}", path.display()), e))?;

    if !metadata.is_file() {
        return Err(Error::storage(format!("{} is not a regular file", path.display())));
    }

    Ok(Payload::File {
        path: path.to_path_buf(),
        size: metadata.len(),
    })
}

/// Write a stream to a local file, creating parent directories
///
/// Returns the number of bytes written.
pub async fn write_stream(path: &Path, mut stream: ByteStream) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io("creating directories", e))?;
    }

    let mut file = fs::File::create(path)
        .await
        .map_err(|e| Error::io(format!("creating {}", path.display()), e))?;

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::io("writing file", e))?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(|e| Error::io("flushing file", e))?;
    Ok(written)
}
