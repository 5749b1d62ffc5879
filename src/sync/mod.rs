//! Sync engine and orchestration
//!
//! A run walks through `Listing -> Diffing -> Transferring -> Deleting ->
//! Done`. Every transfer has finished before the first delete is issued.

pub mod diff;
pub mod execute;
pub mod scan;

use crate::config::{Config, MAX_DELETE_BATCH};
use crate::digest::DigestCache;
use crate::error::Result;
use crate::progress::ProgressTracker;
use crate::storage::local::LocalTree;
use crate::storage::ObjectStore;
use crate::types::{Catalog, ItemAction, ItemOutcome, SyncStats, TransferKind, TransferRequest};
use crate::uri::{Locator, ObjectRef};
use diff::Changelist;
use execute::{run_transfers, TransferContext};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Options for one sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Number of transfer workers (at least 1)
    pub parallelism: usize,
    /// Compare digests of same-sized files
    pub verify_content: bool,
    /// Delete destination keys missing from the source
    pub delete: bool,
    /// Stop after diffing
    pub dry_run: bool,
    pub content_type: String,
    pub acl: Option<String>,
    pub page_size: i32,
    pub progress: bool,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            parallelism: config.effective_parallel(),
            verify_content: false,
            delete: false,
            dry_run: false,
            content_type: config.content_type.clone(),
            acl: config.acl.clone(),
            page_size: config.page_size,
            progress: config.progress,
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Stage of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Listing,
    Diffing,
    Transferring,
    Deleting,
    Done,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Listing => "listing",
            SyncPhase::Diffing => "diffing",
            SyncPhase::Transferring => "transferring",
            SyncPhase::Deleting => "deleting",
            SyncPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Everything a sync run did (or would do, for a dry run)
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub stats: SyncStats,
    pub changes: Changelist,
    /// Per-item results, transfers first, then deletes
    pub outcomes: Vec<ItemOutcome>,
    /// Phases entered, in order
    pub phases: Vec<SyncPhase>,
    /// False when either listing stopped early
    pub complete_listing: bool,
    /// Bytes the transfer set covers according to the source catalog
    pub planned_bytes: u64,
    pub dry_run: bool,
}

impl SyncReport {
    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// The main sync engine
pub struct SyncEngine {
    store: Arc<dyn ObjectStore>,
    options: SyncOptions,
    digests: DigestCache,
    progress: Arc<ProgressTracker>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ObjectStore>, options: SyncOptions) -> Self {
        let progress = Arc::new(ProgressTracker::new(options.progress));
        Self {
            store,
            options,
            digests: DigestCache::new(),
            progress,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn enter(&self, report: &mut SyncReport, phase: SyncPhase) {
        tracing::info!(phase = %phase, "Sync phase");
        report.phases.push(phase);
    }

    /// Mirror `source` onto `dest`
    pub async fn run(&self, source: &Locator, dest: &Locator) -> Result<SyncReport> {
        // local -> local is rejected before any listing
        let kind = TransferKind::classify(source, dest)?;

        let start = Instant::now();
        let mut report = SyncReport {
            dry_run: self.options.dry_run,
            ..Default::default()
        };

        self.enter(&mut report, SyncPhase::Listing);
        let (source_catalog, dest_catalog) = tokio::try_join!(
            scan::build_catalog(self.store.as_ref(), source, self.options.page_size),
            scan::build_catalog(self.store.as_ref(), dest, self.options.page_size),
        )?;
        report.complete_listing = source_catalog.complete && dest_catalog.complete;
        report.stats.source_files = source_catalog.len() as u64;
        report.stats.dest_files = dest_catalog.len() as u64;
        tracing::info!(
            source = %source,
            dest = %dest,
            source_files = source_catalog.len(),
            dest_files = dest_catalog.len(),
            "Listing complete"
        );

        self.enter(&mut report, SyncPhase::Diffing);
        let changes = diff::diff(
            &source_catalog,
            &dest_catalog,
            self.options.verify_content,
            &self.digests,
        )
        .await;
        report.planned_bytes = changes.transfer_bytes(&source_catalog);
        report.stats.files_skipped = changes.unchanged;
        tracing::info!(
            transfers = changes.to_transfer.len(),
            deletes = changes.to_delete.len(),
            unchanged = changes.unchanged,
            "Diff complete"
        );

        if self.options.dry_run {
            report.changes = changes;
            self.enter(&mut report, SyncPhase::Done);
            report.stats.duration_secs = start.elapsed().as_secs_f64();
            return Ok(report);
        }

        self.enter(&mut report, SyncPhase::Transferring);
        let requests: Vec<TransferRequest> = changes
            .to_transfer
            .iter()
            .map(|key| TransferRequest {
                key: key.clone(),
                from: source_catalog.root.join(key),
                to: dest_catalog.root.join(key),
                size: source_catalog.get(key).map_or(0, |e| e.size),
                kind,
            })
            .collect();

        self.progress
            .set_totals(requests.len() as u64, report.planned_bytes);
        let ctx = Arc::new(TransferContext {
            store: Arc::clone(&self.store),
            content_type: self.options.content_type.clone(),
            acl: self.options.acl.clone(),
            progress: Arc::clone(&self.progress),
        });
        let transfers = run_transfers(ctx, requests, self.options.parallelism).await;
        self.progress.finish();
        report.outcomes.extend(transfers);

        self.enter(&mut report, SyncPhase::Deleting);
        if !self.options.delete {
            tracing::debug!("Deletion disabled");
        } else if !source_catalog.complete {
            tracing::warn!(
                candidates = changes.to_delete.len(),
                "Source listing incomplete, not deleting"
            );
        } else if !changes.to_delete.is_empty() {
            let deletes = self.delete_keys(&dest_catalog, &changes.to_delete).await;
            report.outcomes.extend(deletes);
        }

        self.enter(&mut report, SyncPhase::Done);
        for outcome in &report.outcomes {
            report.stats.record(outcome);
        }
        report.changes = changes;
        report.stats.duration_secs = start.elapsed().as_secs_f64();

        tracing::info!(
            transferred = report.stats.files_transferred(),
            deleted = report.stats.files_deleted,
            errors = report.stats.errors,
            bytes = report.stats.bytes_transferred,
            "Sync finished"
        );
        Ok(report)
    }

    async fn delete_keys(&self, dest: &Catalog, keys: &[String]) -> Vec<ItemOutcome> {
        match &dest.root {
            Locator::Remote(root) => self.delete_remote(root, keys).await,
            Locator::Local(path) => {
                let tree = LocalTree::new(path.clone());
                let mut outcomes = Vec::with_capacity(keys.len());
                for key in keys {
                    tracing::info!(key = %key, "Deleting");
                    match tree.remove(key).await {
                        Ok(()) => outcomes.push(ItemOutcome::ok(key, ItemAction::Delete, 0)),
                        Err(e) => {
                            tracing::error!(key = %key, error = %e, "Delete failed");
                            outcomes.push(ItemOutcome::failed(key, ItemAction::Delete, e));
                        }
                    }
                }
                outcomes
            }
        }
    }

    /// Quiet batch deletes of at most `MAX_DELETE_BATCH` keys each
    async fn delete_remote(&self, root: &ObjectRef, keys: &[String]) -> Vec<ItemOutcome> {
        let mut outcomes = Vec::with_capacity(keys.len());

        for chunk in keys.chunks(MAX_DELETE_BATCH) {
            let full_keys: Vec<String> = chunk.iter().map(|k| root.join(k).key).collect();
            tracing::info!(bucket = %root.bucket, count = full_keys.len(), "Deleting batch");

            match self
                .store
                .delete_objects(&root.bucket, &full_keys, true)
                .await
            {
                Ok(failures) => {
                    for (key, full) in chunk.iter().zip(&full_keys) {
                        match failures.iter().find(|f| &f.key == full) {
                            Some(failure) => {
                                tracing::error!(key = %key, error = %failure.message, "Delete failed");
                                outcomes.push(ItemOutcome::failed(
                                    key,
                                    ItemAction::Delete,
                                    &failure.message,
                                ));
                            }
                            None => outcomes.push(ItemOutcome::ok(key, ItemAction::Delete, 0)),
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(bucket = %root.bucket, count = chunk.len(), error = %e, "Batch delete failed");
                    outcomes.extend(
                        chunk
                            .iter()
                            .map(|key| ItemOutcome::failed(key, ItemAction::Delete, &e)),
                    );
                }
            }
        }

        outcomes
    }
}
