//! Object listing under a prefix, one level deep or recursive

use crate::storage::{ObjectStore, ObjectSummary};
use crate::uri::ObjectRef;
use std::collections::BTreeSet;

/// Objects and sub-prefixes found under one root
#[derive(Debug, Clone)]
pub struct Listing {
    pub root: ObjectRef,
    /// Objects in key order, keys not prefix-stripped
    pub objects: Vec<ObjectSummary>,
    /// Common prefixes one level below the root; empty when recursive
    pub prefixes: Vec<String>,
    /// False when a page failed and the listing stopped early
    pub complete: bool,
}

impl Listing {
    pub fn total_bytes(&self) -> u64 {
        self.objects.iter().map(|o| o.size).sum()
    }
}

/// List everything under `root`
///
/// The prefix is used as given, so `s3://b/log` also matches `log-2024/`.
/// Without `recursive` keys are rolled up at the next `/`.
pub async fn list(
    store: &dyn ObjectStore,
    root: &ObjectRef,
    recursive: bool,
    page_size: i32,
) -> Listing {
    let delimiter = if recursive { "" } else { "/" };
    let mut objects = Vec::new();
    let mut prefixes = BTreeSet::new();
    let mut complete = true;
    let mut marker: Option<String> = None;

    loop {
        let page = match store
            .list_objects(&root.bucket, &root.key, delimiter, marker.as_deref(), page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(
                    bucket = %root.bucket,
                    prefix = %root.key,
                    listed = objects.len(),
                    error = %e,
                    "Listing failed"
                );
                complete = false;
                break;
            }
        };

        // without a next_marker, continue after whatever sorted last
        let last = page
            .objects
            .last()
            .map(|o| o.key.clone())
            .into_iter()
            .chain(page.common_prefixes.last().cloned())
            .max();

        objects.extend(page.objects);
        prefixes.extend(page.common_prefixes);

        if !page.truncated {
            break;
        }
        marker = page.next_marker.or(last);
        if marker.is_none() {
            tracing::warn!(bucket = %root.bucket, prefix = %root.key, "Truncated page without a marker");
            complete = false;
            break;
        }
    }

    tracing::debug!(
        root = %root,
        objects = objects.len(),
        prefixes = prefixes.len(),
        complete,
        "Listed"
    );
    Listing {
        root: root.clone(),
        objects,
        prefixes: prefixes.into_iter().collect(),
        complete,
    }
}
