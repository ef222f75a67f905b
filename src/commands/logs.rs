//! Logs command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use crate::remedy;
use crate::ui;

const ERROR_WINDOW_HOURS: i64 = 24;

/// Run the logs command
pub async fn run(
    config_path: &Path,
    lines: usize,
    nextdns: bool,
    errors: bool,
    clear: bool,
) -> Result<()> {
    let manager = super::build_manager(config_path)?;
    let log_file = manager.config().log_file();

    if clear {
        remedy::clear_log(&log_file)?;
        ui::success("Log file cleared");
        return Ok(());
    }

    if errors {
        let summary = remedy::error_summary(&log_file, ERROR_WINDOW_HOURS)?;
        print!("{}", ui::section("RECENT ERRORS"));
        println!(
            " {} error(s) in the last {} hours",
            summary.total_errors, summary.time_period_hours
        );
        for line in &summary.errors {
            println!("  {}", line);
        }
        return Ok(());
    }

    if nextdns {
        print!("{}", manager.nextdns().logs(lines)?);
        return Ok(());
    }

    if !log_file.exists() {
        println!("No log file at {}", log_file.display());
        return Ok(());
    }
    let content = std::fs::read_to_string(&log_file)
        .with_context(|| format!("Failed to read {:?}", log_file))?;
    for line in tail(&content, lines) {
        println!("{}", line);
    }
    Ok(())
}

/// Last `n` lines of `content`.
pub fn tail(content: &str, n: usize) -> Vec<&str> {
    let all: Vec<&str> = content.lines().collect();
    all[all.len().saturating_sub(n)..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\nb\nc\n", 2), vec!["b", "c"]);
        assert_eq!(tail("a\nb", 10), vec!["a", "b"]);
        assert!(tail("", 5).is_empty());
        assert!(tail("a\nb", 0).is_empty());
    }
}
