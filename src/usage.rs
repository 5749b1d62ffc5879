//! Object count and byte usage under remote prefixes
//!
//! Every listed key counts, directory placeholders included.

use crate::error::{Error, Result};
use crate::listing;
use crate::storage::ObjectStore;
use crate::uri::{Locator, ObjectRef};

/// Usage of one prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixUsage {
    pub root: ObjectRef,
    pub objects: u64,
    pub bytes: u64,
    /// False when the listing stopped early
    pub complete: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UsageReport {
    pub prefixes: Vec<PrefixUsage>,
}

impl UsageReport {
    pub fn total_objects(&self) -> u64 {
        self.prefixes.iter().map(|p| p.objects).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.prefixes.iter().map(|p| p.bytes).sum()
    }
}

/// Sum objects and bytes under each remote locator
pub async fn disk_usage(
    store: &dyn ObjectStore,
    locators: &[Locator],
    page_size: i32,
) -> Result<UsageReport> {
    let roots = locators
        .iter()
        .map(|l| {
            l.as_remote().cloned().ok_or_else(|| {
                Error::invalid_locator(l.to_string(), "usage needs an s3:// location")
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut report = UsageReport::default();
    for root in roots {
        let found = listing::list(store, &root, true, page_size).await;
        tracing::debug!(root = %root, objects = found.objects.len(), "Usage counted");
        report.prefixes.push(PrefixUsage {
            objects: found.objects.len() as u64,
            bytes: found.total_bytes(),
            complete: found.complete,
            root,
        });
    }

    Ok(report)
}
