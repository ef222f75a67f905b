//! Turning failures into something a user can act on.
//!
//! An [`ErrorReport`] pairs the raw error with a friendly message and a
//! list of suggestions, both looked up by error kind and by the context the
//! failure happened in (`wgcf`, `wireguard`, `nextdns`, `warp`, ...). A few
//! failures have an automatic recovery, which is attempted before the
//! report is shown.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::WarpError;

const CONNECTIVITY_PROBE_URL: &str = "https://www.cloudflare.com/cdn-cgi/trace";

/// How many recent error lines an [`ErrorSummary`] keeps.
const SUMMARY_TAIL: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    FileNotFound,
    Permission,
    Connection,
    Timeout,
    CommandFailed,
    Interrupted,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Walk the error chain and classify the first cause we recognise.
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<WarpError>() {
            let kind = match e {
                WarpError::NotFound(_) => ErrorKind::FileNotFound,
                WarpError::Permission(_) => ErrorKind::Permission,
                WarpError::Connection(_) => ErrorKind::Connection,
                WarpError::Timeout(_) => ErrorKind::Timeout,
                WarpError::CommandFailed { .. } => ErrorKind::CommandFailed,
                _ => continue,
            };
            return kind;
        }
        if let Some(e) = cause.downcast_ref::<io::Error>() {
            match e.kind() {
                io::ErrorKind::NotFound => return ErrorKind::FileNotFound,
                io::ErrorKind::PermissionDenied => return ErrorKind::Permission,
                io::ErrorKind::TimedOut => return ErrorKind::Timeout,
                io::ErrorKind::Interrupted => return ErrorKind::Interrupted,
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted => return ErrorKind::Connection,
                _ => {}
            }
        }
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            if e.is_timeout() {
                return ErrorKind::Timeout;
            }
            if e.is_connect() || e.is_request() {
                return ErrorKind::Connection;
            }
        }
    }
    ErrorKind::Other
}

pub fn severity(kind: ErrorKind) -> Severity {
    match kind {
        ErrorKind::Interrupted => Severity::Critical,
        ErrorKind::Permission | ErrorKind::Connection | ErrorKind::Timeout => Severity::High,
        ErrorKind::FileNotFound | ErrorKind::CommandFailed => Severity::Medium,
        ErrorKind::Other => Severity::Low,
    }
}

/// Component a piece of error text points at, if any.
fn component_keyword(text: &str) -> Option<&'static str> {
    let lower = text
        .to_lowercase()
        .replace("warp-nextdns", "")
        .replace("warp_nextdns", "")
        .replace(".warp", "");
    if lower.contains("wireguard") || lower.contains("wg-quick") {
        Some("wireguard")
    } else if lower.contains("wgcf") {
        Some("wgcf")
    } else if lower.contains("nextdns") {
        Some("nextdns")
    } else if lower.contains("warp") {
        Some("warp")
    } else {
        None
    }
}

/// The component a failure belongs to, used as the lookup context for
/// messages, suggestions and recoveries.
///
/// A failed external command decides first, then whatever the error chain
/// mentions. Falls back to `command`, the CLI command that was running.
pub fn failure_context(err: &anyhow::Error, command: &str) -> String {
    for cause in err.chain() {
        if let Some(WarpError::CommandFailed { command: cmd, .. }) = cause.downcast_ref::<WarpError>() {
            if let Some(component) = component_keyword(cmd) {
                return component.to_string();
            }
        }
    }
    component_keyword(&format!("{:#}", err))
        .map(str::to_string)
        .unwrap_or_else(|| command.to_string())
}

/// Short, non-technical description of the failure.
pub fn friendly_message(kind: ErrorKind, context: &str, raw: &str) -> String {
    let msg = match (kind, context) {
        (ErrorKind::FileNotFound, "wgcf") => "wgcf tool not found. Please install it first.",
        (ErrorKind::FileNotFound, "wireguard") => "WireGuard configuration not found",
        (ErrorKind::FileNotFound, "nextdns") => "NextDNS configuration not found",
        (ErrorKind::FileNotFound, _) => "Required file or directory not found",

        (ErrorKind::Permission, "wireguard") => {
            "Permission denied accessing WireGuard. Run with sudo."
        }
        (ErrorKind::Permission, "nextdns") => {
            "Permission denied accessing NextDNS configuration."
        }
        (ErrorKind::Permission, _) => {
            "Permission denied. Try running with administrator privileges."
        }

        (ErrorKind::Connection, "warp") => "Failed to connect to Cloudflare WARP servers.",
        (ErrorKind::Connection, "nextdns") => "Failed to connect to NextDNS servers.",
        (ErrorKind::Connection, _) => {
            "Network connection failed. Check your internet connection."
        }

        (ErrorKind::Timeout, "warp") => "WARP connection timed out.",
        (ErrorKind::Timeout, "nextdns") => "NextDNS connection timed out.",
        (ErrorKind::Timeout, "wgcf") => "wgcf command timed out.",
        (ErrorKind::Timeout, _) => "Operation timed out. Please try again.",

        (ErrorKind::CommandFailed, "wgcf") => "wgcf command failed.",
        (ErrorKind::CommandFailed, "wireguard") => "WireGuard command failed.",
        (ErrorKind::CommandFailed, "nextdns") => "NextDNS command failed.",
        (ErrorKind::CommandFailed, _) => "Command execution failed.",

        (ErrorKind::Interrupted, _) => "Operation interrupted.",

        (ErrorKind::Other, _) => return format!("An unexpected error occurred: {}", raw),
    };
    msg.to_string()
}

/// Things the user can try, most specific first. Always ends with the
/// three general suggestions.
pub fn suggestions(kind: ErrorKind, context: &str) -> Vec<String> {
    let specific: &[&str] = match kind {
        ErrorKind::FileNotFound if context.contains("wgcf") => &[
            "Run 'warp-nextdns setup' to install wgcf",
            "Download wgcf manually from https://github.com/ViRb3/wgcf/releases",
            "Ensure wgcf is in your system PATH",
        ],
        ErrorKind::FileNotFound if context.contains("wireguard") => &[
            "Run 'warp-nextdns setup' to generate the WireGuard profile",
            "Check if WireGuard is properly installed",
            "Verify configuration file permissions",
        ],
        ErrorKind::FileNotFound if context.contains("nextdns") => &[
            "Install the NextDNS CLI with 'warp-nextdns setup'",
            "Configure NextDNS with your profile ID",
            "Check the NextDNS configuration file",
        ],
        ErrorKind::Permission => &[
            "Run the command with administrator privileges",
            "Check file and directory permissions",
            "Use sudo for Linux operations",
        ],
        ErrorKind::Connection => &[
            "Check your internet connection",
            "Verify firewall settings",
            "Try using a different network",
            "Check if Cloudflare/NextDNS services are accessible",
        ],
        ErrorKind::Timeout => &[
            "Check your internet connection speed",
            "Try again in a few moments",
            "Check if the service is experiencing issues",
        ],
        _ => &[],
    };

    specific
        .iter()
        .chain(
            [
                "Check the logs for more detailed information",
                "Restart the application",
                "Contact support if the issue persists",
            ]
            .iter(),
        )
        .map(|s| s.to_string())
        .collect()
}

/// Everything known about one handled failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub timestamp: DateTime<Utc>,
    pub error_kind: ErrorKind,
    pub message: String,
    pub context: String,
    pub user_message: String,
    pub suggestions: Vec<String>,
    pub severity: Severity,
    pub handled: bool,
    pub recovery_message: Option<String>,
}

impl ErrorReport {
    pub fn new(err: &anyhow::Error, context: &str) -> Self {
        let kind = classify(err);
        let message = format!("{:#}", err);
        Self {
            timestamp: Utc::now(),
            error_kind: kind,
            user_message: friendly_message(kind, context, &message),
            suggestions: suggestions(kind, context),
            severity: severity(kind),
            message,
            context: context.to_string(),
            handled: false,
            recovery_message: None,
        }
    }

    fn recovered(&mut self, message: String) {
        info!("Error recovered automatically: {}", message);
        self.handled = true;
        self.recovery_message = Some(message);
    }
}

/// Builds reports and runs the automatic recoveries.
pub struct ErrorHandler {
    wgcf_candidates: Vec<PathBuf>,
    probe_url: String,
}

impl ErrorHandler {
    pub fn new(wgcf_binary: &Path, work_dir: &Path) -> Self {
        Self {
            wgcf_candidates: vec![
                wgcf_binary.to_path_buf(),
                PathBuf::from("wgcf"),
                PathBuf::from("/usr/local/bin/wgcf"),
                PathBuf::from("/usr/bin/wgcf"),
                work_dir.join("wgcf"),
            ],
            probe_url: CONNECTIVITY_PROBE_URL.to_string(),
        }
    }

    /// Log the error of CLI command `command`, attempt recovery, and return
    /// the report. The report context is derived with [`failure_context`].
    pub async fn handle(&self, err: &anyhow::Error, command: &str) -> ErrorReport {
        let context = failure_context(err, command);
        let context = context.as_str();
        let mut report = ErrorReport::new(err, context);
        error!("Error in {}: {:#}", if command.is_empty() { "command" } else { command }, err);
        debug!("Error chain: {:?}", err);

        match report.error_kind {
            ErrorKind::FileNotFound if context.contains("wgcf") => {
                if let Some(path) = find_first_existing(&self.wgcf_candidates) {
                    report.recovered(format!("Found wgcf at {}", path.display()));
                }
            }
            ErrorKind::Connection => {
                if self.connectivity_restored().await {
                    report.recovered("Internet connectivity restored".to_string());
                }
            }
            _ => {}
        }

        report
    }

    async fn connectivity_restored(&self) -> bool {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
        {
            Ok(c) => c,
            Err(_) => return false,
        };
        matches!(
            client.get(&self.probe_url).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }
}

/// First path in `candidates` that exists as a file.
pub fn find_first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

/// ERROR lines from the log file within a time window.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub time_period_hours: i64,
    /// Most recent lines, oldest first
    pub errors: Vec<String>,
}

/// Count ERROR lines whose leading RFC 3339 timestamp falls within the
/// last `hours`. Lines without a parseable timestamp are skipped.
pub fn error_summary(log_file: &Path, hours: i64) -> Result<ErrorSummary> {
    let content = match std::fs::read_to_string(log_file) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    Ok(summarize_errors(&content, Utc::now() - ChronoDuration::hours(hours), hours))
}

pub fn summarize_errors(content: &str, cutoff: DateTime<Utc>, hours: i64) -> ErrorSummary {
    let recent: Vec<String> = content
        .lines()
        .filter(|line| line.contains("ERROR"))
        .filter(|line| {
            line.split_whitespace()
                .next()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc) > cutoff)
                .unwrap_or(false)
        })
        .map(|line| line.trim().to_string())
        .collect();

    let start = recent.len().saturating_sub(SUMMARY_TAIL);
    ErrorSummary {
        total_errors: recent.len(),
        time_period_hours: hours,
        errors: recent[start..].to_vec(),
    }
}

/// Truncate the log file.
pub fn clear_log(log_file: &Path) -> Result<()> {
    if log_file.exists() {
        std::fs::write(log_file, "")?;
    }
    Ok(())
}
