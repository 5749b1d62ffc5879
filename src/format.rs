//! Output formatting utilities

use std::time::{Duration, SystemTime};

/// Format a byte count in human-readable form
pub fn format_size(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Format a duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    format_duration_secs(duration.as_secs_f64())
}

/// Format a duration given in seconds
pub fn format_duration_secs(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        format!("{}m {:.0}s", mins as u64, secs - mins * 60.0)
    } else {
        let hours = (secs / 3600.0).floor();
        let mins = ((secs - hours * 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u64, mins as u64)
    }
}

/// Format a transfer rate
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", human_bytes::human_bytes(bytes_per_sec))
}

/// Format a count with a unit
pub fn format_count(count: u64, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

pub fn format_objects(count: u64) -> String {
    format_count(count, "object", "objects")
}

/// Age of a timestamp relative to now, e.g. for pending uploads
pub fn format_age(time: Option<SystemTime>) -> String {
    match time.and_then(|t| SystemTime::now().duration_since(t).ok()) {
        Some(age) => format!("{} ago", format_duration(age)),
        None => "-".to_string(),
    }
}
