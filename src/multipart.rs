//! Maintenance of in-progress multipart uploads
//!
//! Merges that fail after a part was written leave their session open.
//! These helpers list such sessions with their parts and clean them up,
//! either by aborting them or by completing them with whatever parts were
//! already uploaded.

use crate::error::Result;
use crate::storage::{CompletedPart, MultipartSession, ObjectStore};
use crate::uri::ObjectRef;
use std::time::SystemTime;

/// An open multipart session and the parts it holds
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session: MultipartSession,
    pub initiated: Option<SystemTime>,
    pub parts: Vec<CompletedPart>,
}

impl SessionInfo {
    /// Bytes uploaded so far
    pub fn total_size(&self) -> u64 {
        self.parts.iter().map(|p| p.size).sum()
    }
}

/// Sessions under a prefix, plus sub-prefixes when not recursive
#[derive(Debug, Clone, Default)]
pub struct SessionListing {
    pub sessions: Vec<SessionInfo>,
    pub prefixes: Vec<String>,
}

/// What to do with each matching session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanAction {
    Abort,
    /// Complete with the parts already uploaded
    Complete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub aborted: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
}

fn delimiter(recursive: bool) -> &'static str {
    if recursive {
        ""
    } else {
        "/"
    }
}

/// List open sessions under `root` and fetch their parts
///
/// A failure to list one session's parts is logged; that session is
/// reported with no parts.
pub async fn list_sessions(
    store: &dyn ObjectStore,
    root: &ObjectRef,
    recursive: bool,
) -> Result<SessionListing> {
    let (uploads, prefixes) = store
        .list_multipart_uploads(&root.bucket, &root.key, delimiter(recursive))
        .await?;
    tracing::debug!(
        bucket = %root.bucket,
        prefix = %root.key,
        sessions = uploads.len(),
        prefixes = prefixes.len(),
        "Listed multipart uploads"
    );

    let mut sessions = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let parts = match store.list_parts(&upload.session).await {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(
                    key = %upload.session.key,
                    upload_id = %upload.session.upload_id,
                    error = %e,
                    "Cannot list parts"
                );
                Vec::new()
            }
        };
        sessions.push(SessionInfo {
            session: upload.session,
            initiated: upload.initiated,
            parts,
        });
    }

    Ok(SessionListing { sessions, prefixes })
}

/// Abort or complete every open session under `root`
///
/// With `upload_id` set, only that session is touched. Per-session
/// failures are logged and counted; the rest continue.
pub async fn clean_sessions(
    store: &dyn ObjectStore,
    root: &ObjectRef,
    recursive: bool,
    upload_id: Option<&str>,
    action: CleanAction,
) -> Result<CleanReport> {
    let (uploads, _) = store
        .list_multipart_uploads(&root.bucket, &root.key, delimiter(recursive))
        .await?;

    let mut report = CleanReport::default();
    for upload in uploads {
        let session = upload.session;
        if upload_id.is_some_and(|id| id != session.upload_id) {
            report.skipped += 1;
            continue;
        }

        match action {
            CleanAction::Abort => {
                tracing::info!(key = %session.key, upload_id = %session.upload_id, "Aborting upload");
                match store.abort_multipart(&session).await {
                    Ok(()) => report.aborted += 1,
                    Err(e) => {
                        tracing::error!(upload_id = %session.upload_id, error = %e, "Abort failed");
                        report.failed += 1;
                    }
                }
            }
            CleanAction::Complete => {
                let parts = match store.list_parts(&session).await {
                    Ok(parts) => parts,
                    Err(e) => {
                        tracing::error!(upload_id = %session.upload_id, error = %e, "Cannot list parts");
                        report.failed += 1;
                        continue;
                    }
                };
                tracing::info!(
                    key = %session.key,
                    upload_id = %session.upload_id,
                    parts = parts.len(),
                    "Completing upload"
                );
                match store.complete_multipart(&session, &parts).await {
                    Ok(()) => report.completed += 1,
                    Err(e) => {
                        tracing::error!(upload_id = %session.upload_id, error = %e, "Complete failed");
                        report.failed += 1;
                    }
                }
            }
        }
    }

    Ok(report)
}
