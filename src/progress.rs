//! Progress tracking and summaries for bucketsync

use crate::format::{format_duration_secs, format_objects, format_rate, format_size};
use crate::merge::{MergePath, MergeReport};
use crate::sync::SyncReport;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bars for a transfer phase
///
/// Updated from many workers at once; indicatif bars are internally
/// synchronized.
pub struct ProgressTracker {
    multi: MultiProgress,
    /// Items finished (ok or failed)
    items: ProgressBar,
    /// Bytes moved
    bytes: ProgressBar,
    enabled: bool,
}

impl ProgressTracker {
    pub fn new(enabled: bool) -> Self {
        let multi = MultiProgress::new();

        let items = if enabled {
            let pb = multi.add(ProgressBar::new(0));
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} items ({percent}%)",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            ProgressBar::hidden()
        };

        let bytes = if enabled {
            let pb = multi.add(ProgressBar::new(0));
            if let Ok(style) = ProgressStyle::default_bar()
                .template("  [{bar:40.yellow/red}] {bytes}/{total_bytes} ({bytes_per_sec})")
            {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        Self {
            multi,
            items,
            bytes,
            enabled,
        }
    }

    /// Set the totals for the upcoming phase
    pub fn set_totals(&self, items: u64, bytes: u64) {
        self.items.set_length(items);
        self.bytes.set_length(bytes);
    }

    /// One item finished, having moved `bytes`
    pub fn item_done(&self, bytes: u64) {
        self.items.inc(1);
        self.bytes.inc(bytes);
    }

    pub fn finish(&self) {
        self.items.finish();
        self.bytes.finish_and_clear();
    }

    /// Print a line without tearing the bars
    pub fn println(&self, msg: &str) {
        if self.enabled {
            self.multi.println(msg).ok();
        } else {
            println!("{}", msg);
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Print what a dry-run sync would do
pub fn print_dry_run_summary(report: &SyncReport) {
    println!("\n=== Dry Run Summary ===");
    println!("Source objects:    {}", report.stats.source_files);
    println!("Dest objects:      {}", report.stats.dest_files);
    println!("Would transfer:    {}", format_objects(report.changes.to_transfer.len() as u64));
    println!("Would delete:      {}", format_objects(report.changes.to_delete.len() as u64));
    println!("Unchanged:         {}", report.changes.unchanged);
    println!("Estimated bytes:   {}", format_size(report.planned_bytes));

    for key in &report.changes.to_transfer {
        println!("  + {}", key);
    }
    for key in &report.changes.to_delete {
        println!("  - {}", key);
    }
}

/// Print a final summary after sync
pub fn print_sync_summary(report: &SyncReport) {
    let stats = &report.stats;
    println!("\n=== Sync Complete ===");
    println!("Duration:          {}", format_duration_secs(stats.duration_secs));
    println!("Files uploaded:    {}", stats.files_uploaded);
    println!("Files downloaded:  {}", stats.files_downloaded);
    println!("Objects copied:    {}", stats.files_copied);
    println!("Files deleted:     {}", stats.files_deleted);
    println!("Files skipped:     {}", stats.files_skipped);
    println!("Errors:            {}", stats.errors);
    println!();
    println!("Bytes transferred: {}", format_size(stats.bytes_transferred));
    println!("Transfer rate:     {}", format_rate(stats.transfer_rate()));

    if !report.complete_listing {
        println!("\nWARNING: a listing failed; results may be incomplete");
    }
    for failed in report.failures() {
        println!(
            "  ! {}: {}",
            failed.key,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }
}

/// Print the outcome of a merge
pub fn print_merge_report(report: &MergeReport) {
    let summary = &report.summary;
    println!("\n=== Merge {} ===", if report.path == MergePath::DryRun { "Plan" } else { "Complete" });
    println!("Destination:       {}", report.destination);
    println!("Path:              {}", report.path);
    println!(
        "Part-copy sources: {} ({})",
        summary.copy_count,
        format_size(summary.copy_bytes)
    );
    println!(
        "Buffered sources:  {} ({})",
        summary.buffer_count,
        format_size(summary.buffer_bytes)
    );
    if report.path != MergePath::DryRun {
        println!("Parts:             {}", report.parts.len());
        println!("Bytes copied:      {}", format_size(report.bytes_copied));
        println!("Bytes uploaded:    {}", format_size(report.bytes_uploaded));
        println!("Duration:          {}", format_duration_secs(report.duration_secs));
    }
}
