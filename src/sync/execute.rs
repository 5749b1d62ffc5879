//! Transfer scheduler
//!
//! A fixed pool of workers drains one bounded queue. The coordinator
//! starts every worker before pushing the first request and closes the
//! queue by dropping the sender, so each worker sees end-of-work exactly
//! once. Results are collected by joining the workers.

use crate::error::{Error, Result};
use crate::progress::ProgressTracker;
use crate::storage::local::{file_payload, write_stream};
use crate::storage::ObjectStore;
use crate::types::{ItemAction, ItemOutcome, TransferKind, TransferRequest};
use crate::uri::Locator;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

/// Shared state every worker needs
pub struct TransferContext {
    pub store: Arc<dyn ObjectStore>,
    pub content_type: String,
    pub acl: Option<String>,
    pub progress: Arc<ProgressTracker>,
}

/// Run every request through `parallelism` workers and return one outcome
/// per request, sorted by key
pub async fn run_transfers(
    ctx: Arc<TransferContext>,
    requests: Vec<TransferRequest>,
    parallelism: usize,
) -> Vec<ItemOutcome> {
    let parallelism = parallelism.max(1);
    let (tx, rx) = mpsc::channel::<TransferRequest>(parallelism * 2);
    let rx = Arc::new(Mutex::new(rx));

    let mut workers = JoinSet::new();
    for worker in 0..parallelism {
        let rx = Arc::clone(&rx);
        let ctx = Arc::clone(&ctx);
        workers.spawn(async move {
            let mut outcomes = Vec::new();
            loop {
                let next = rx.lock().await.recv().await;
                let Some(request) = next else {
                    break;
                };
                outcomes.push(execute_request(&ctx, request).await);
            }
            tracing::debug!(worker, items = outcomes.len(), "Worker drained queue");
            outcomes
        });
    }

    let total = requests.len();
    for request in requests {
        if tx.send(request).await.is_err() {
            tracing::error!("All transfer workers exited early");
            break;
        }
    }
    // closes the queue
    drop(tx);

    let mut outcomes = Vec::with_capacity(total);
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(mut done) => outcomes.append(&mut done),
            Err(e) => tracing::error!(error = %e, "Transfer worker panicked"),
        }
    }

    outcomes.sort_by(|a, b| a.key.cmp(&b.key));
    outcomes
}

/// Execute one request, turning any error into a failed outcome
async fn execute_request(ctx: &TransferContext, request: TransferRequest) -> ItemOutcome {
    let action = ItemAction::Transfer(request.kind);

    match transfer(ctx, &request).await {
        Ok(bytes) => {
            ctx.progress.item_done(bytes);
            ItemOutcome::ok(request.key, action, bytes)
        }
        Err(e) => {
            let e = match e {
                e @ Error::ShortRead { .. } => e,
                other => Error::Transfer {
                    from: request.from.to_string(),
                    to: request.to.to_string(),
                    message: other.to_string(),
                },
            };
            tracing::error!(key = %request.key, error = %e, "Transfer failed");
            ctx.progress.item_done(0);
            ItemOutcome::failed(request.key, action, e)
        }
    }
}

async fn transfer(ctx: &TransferContext, request: &TransferRequest) -> Result<u64> {
    match (request.kind, &request.from, &request.to) {
        (TransferKind::Upload, Locator::Local(path), Locator::Remote(object)) => {
            tracing::info!(key = %request.key, size = request.size, to = %object, "Uploading");
            let payload = file_payload(path).await?;
            let size = payload.len();
            ctx.store
                .put_object(object, payload, &ctx.content_type, ctx.acl.as_deref())
                .await?;
            Ok(size)
        }
        (TransferKind::Download, Locator::Remote(object), Locator::Local(path)) => {
            tracing::info!(key = %request.key, size = request.size, from = %object, "Downloading");
            let stream = ctx.store.get_object(object).await?;
            let written = write_stream(path, stream).await?;
            if written != request.size {
                return Err(Error::ShortRead {
                    locator: object.to_string(),
                    expected: request.size,
                    actual: written,
                });
            }
            Ok(written)
        }
        (TransferKind::RemoteCopy, Locator::Remote(source), Locator::Remote(dest)) => {
            tracing::info!(key = %request.key, size = request.size, from = %source, to = %dest, "Copying");
            ctx.store
                .copy_object(dest, source, ctx.acl.as_deref())
                .await?;
            Ok(request.size)
        }
        _ => Err(Error::invalid_locator(
            format!("{} -> {}", request.from, request.to),
            "transfer kind does not match endpoints",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use tempfile::TempDir;

    fn context(store: Arc<MemoryStore>) -> Arc<TransferContext> {
        Arc::new(TransferContext {
            store,
            content_type: "application/octet-stream".to_string(),
            acl: None,
            progress: Arc::new(ProgressTracker::new(false)),
        })
    }

    #[tokio::test]
    async fn test_every_request_consumed_once() {
        let store = Arc::new(MemoryStore::new());
        let mut requests = Vec::new();
        for i in 0..25 {
            let key = format!("k{:02}", i);
            store.insert("src", &key, vec![0u8; i]);
            requests.push(
                TransferRequest::new(
                    key.clone(),
                    Locator::parse(&format!("s3://src/{}", key)).unwrap(),
                    Locator::parse(&format!("s3://dst/{}", key)).unwrap(),
                    i as u64,
                )
                .unwrap(),
            );
        }

        let outcomes = run_transfers(context(store.clone()), requests, 4).await;
        assert_eq!(outcomes.len(), 25);
        assert!(outcomes.iter().all(|o| o.is_ok()));
        assert_eq!(store.keys("dst").len(), 25);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_siblings() {
        let store = Arc::new(MemoryStore::new());
        store.insert("src", "good", "1");
        store.insert("src", "bad", "2");
        store.fail_key("bad");

        let requests = ["bad", "good"]
            .iter()
            .map(|k| {
                TransferRequest::new(
                    *k,
                    Locator::parse(&format!("s3://src/{}", k)).unwrap(),
                    Locator::parse(&format!("s3://dst/{}", k)).unwrap(),
                    1,
                )
                .unwrap()
            })
            .collect();

        let outcomes = run_transfers(context(store.clone()), requests, 1).await;
        assert!(!outcomes[0].is_ok());
        assert!(outcomes[0].error.as_deref().unwrap().contains("s3://src/bad"));
        assert!(outcomes[1].is_ok());
        assert_eq!(store.keys("dst"), vec!["good"]);
    }

    #[tokio::test]
    async fn test_download_detects_short_read() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert("src", "k", "0123456789");
        store.truncate_reads("k", 3);

        let request = TransferRequest::new(
            "k",
            Locator::parse("s3://src/k").unwrap(),
            Locator::Local(tmp.path().join("k")),
            10,
        )
        .unwrap();

        let outcomes = run_transfers(context(store), vec![request], 2).await;
        assert!(outcomes[0].error.as_deref().unwrap().contains("Short read"));
    }

    #[test]
    fn test_request_classifies_endpoints() {
        let request = TransferRequest::new(
            "a",
            Locator::Local("/data/a".into()),
            Locator::parse("s3://b/a").unwrap(),
            1,
        )
        .unwrap();
        assert_eq!(request.kind, TransferKind::Upload);

        let err = TransferRequest::new(
            "a",
            Locator::Local("/data/a".into()),
            Locator::Local("/backup/a".into()),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidLocator { .. }));
    }

    #[tokio::test]
    async fn test_failed_download_reports_download() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());

        let request = TransferRequest::new(
            "missing",
            Locator::parse("s3://src/missing").unwrap(),
            Locator::Local(tmp.path().join("missing")),
            4,
        )
        .unwrap();

        let outcomes = run_transfers(context(store), vec![request], 1).await;
        assert!(!outcomes[0].is_ok());
        assert_eq!(
            outcomes[0].action,
            ItemAction::Transfer(TransferKind::Download)
        );
    }
}
