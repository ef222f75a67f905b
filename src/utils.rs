//! Shared formatting helpers.
//!
//! - [`format_bytes`] - byte sizes (KB, MB, GB)
//! - [`format_mbps`] - throughput figures
//! - [`format_duration_ago`] - relative timestamps ("3h ago")
//! - [`truncate`] - shorten strings with an ellipsis

use chrono::{DateTime, Utc};

/// Format bytes in human-readable form (KB, MB, GB).
///
/// # Examples
/// ```
/// use warp_nextdns::utils::format_bytes;
/// assert_eq!(format_bytes(1024), "1.0 KB");
/// assert_eq!(format_bytes(1_500_000), "1.4 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a throughput value in Mbps with two decimals.
pub fn format_mbps(mbps: f64) -> String {
    format!("{:.2} Mbps", mbps)
}

/// Describe how long ago `dt` was, at coarse granularity.
pub fn format_duration_ago(dt: DateTime<Utc>) -> String {
    let seconds = Utc::now().signed_duration_since(dt).num_seconds();
    if seconds < 60 {
        "just now".to_string()
    } else if seconds < 3600 {
        format!("{}m ago", seconds / 60)
    } else if seconds < 86400 {
        format!("{}h ago", seconds / 3600)
    } else {
        format!("{}d ago", seconds / 86400)
    }
}

/// Truncate a string to a maximum length, adding "..." if truncated.
///
/// Operates on characters, so multi-byte input never splits a code point.
///
/// # Examples
/// ```
/// use warp_nextdns::utils::truncate;
/// assert_eq!(truncate("short", 10), "short");
/// assert_eq!(truncate("this is long", 10), "this is...");
/// ```
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1500), "1.5 KB");
        assert_eq!(format_bytes(1_500_000_000), "1.4 GB");
    }

    #[test]
    fn test_format_mbps() {
        assert_eq!(format_mbps(12.3456), "12.35 Mbps");
        assert_eq!(format_mbps(0.0), "0.00 Mbps");
    }

    #[test]
    fn test_format_duration_ago() {
        assert_eq!(format_duration_ago(Utc::now()), "just now");
        assert_eq!(format_duration_ago(Utc::now() - Duration::minutes(5)), "5m ago");
        assert_eq!(format_duration_ago(Utc::now() - Duration::hours(3)), "3h ago");
        assert_eq!(format_duration_ago(Utc::now() - Duration::days(2)), "2d ago");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("exactly10!", 10), "exactly10!");
        assert_eq!(truncate("test", 3), "...");
        assert_eq!(truncate("ééééééé", 5), "éé...");
    }
}
