//! Terminal rendering and prompts.
//!
//! Renderers return strings so commands can print them and tests can
//! inspect them.

use anyhow::Result;
use colored::{ColoredString, Colorize};
use std::io::{BufRead, Write};

use crate::backup::{BackupInfo, BackupStats};
use crate::manager::{ComponentState, StatusReport, TestResult};
use crate::monitor::{HealthReport, NetworkMetrics};
use crate::network::{Quality, SpeedTestResult};
use crate::security::SecurityReport;
use crate::utils::{format_bytes, format_duration_ago, format_mbps, truncate};

const RULE: &str = "══════════════════════════════════════════════════════════════════";
const THIN: &str = "────────────────────────────────────────────────────────────────";

pub fn banner(title: &str) -> String {
    format!("{}\n {}\n{}\n", RULE, title.bold(), RULE)
}

pub fn section(title: &str) -> String {
    format!(" {}\n {}\n", title.bold(), THIN)
}

pub fn success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

pub fn warning(msg: &str) {
    println!("{} {}", "[WARN]".yellow().bold(), msg);
}

pub fn failure(msg: &str) {
    eprintln!("{} {}", "[FAIL]".red().bold(), msg);
}

/// Pad first, then colour, so ANSI codes do not break alignment.
fn paint_state(state: ComponentState, width: usize) -> ColoredString {
    let text = format!("{:<width$}", state.to_string(), width = width);
    if state.is_healthy() {
        text.green()
    } else if state.is_failure() {
        text.red()
    } else {
        text.yellow()
    }
}

fn paint_quality(q: Quality) -> ColoredString {
    let text = q.to_string();
    match q {
        Quality::Excellent | Quality::Good => text.green(),
        Quality::Fair => text.yellow(),
        Quality::Poor => text.red(),
    }
}

pub fn render_status(report: &StatusReport) -> String {
    let mut out = banner("WARP + NEXTDNS STATUS");
    out.push('\n');
    out.push_str(&format!(" {:<20} {:<14} {}\n", "COMPONENT", "STATUS", "DETAILS"));
    out.push_str(&format!(" {:─<20} {:─<14} {:─<28}\n", "", "", ""));
    for c in &report.components {
        out.push_str(&format!(
            " {:<20} {} {}\n",
            c.component,
            paint_state(c.state, 14),
            truncate(&c.details, 60)
        ));
    }
    out.push('\n');
    out.push_str(RULE);
    out.push('\n');
    out
}

pub fn render_tests(results: &[TestResult]) -> String {
    let mut out = banner("CONNECTION TESTS");
    out.push('\n');
    for r in results {
        let icon = if r.passed {
            "[PASS]".green().bold()
        } else {
            "[FAIL]".red().bold()
        };
        out.push_str(&format!(" {} {:<16} {}\n", icon, r.name, r.message));
    }
    let passed = results.iter().filter(|r| r.passed).count();
    out.push_str(&format!("\n {}/{} tests passed\n", passed, results.len()));
    out
}

pub fn render_metrics(m: &NetworkMetrics) -> String {
    let mut out = section("NETWORK METRICS");
    out.push_str(&format!(" Sampled:        {}\n", format_duration_ago(m.timestamp)));
    out.push_str(&format!(" Latency:        {:.1} ms\n", m.latency_ms));
    out.push_str(&format!(" Packet loss:    {:.1} %\n", m.packet_loss));
    out.push_str(&format!(" Jitter:         {:.1} ms\n", m.jitter_ms));
    out.push_str(&format!(" Download:       {}\n", format_mbps(m.download_mbps)));
    out.push_str(&format!(" Upload:         {}\n", format_mbps(m.upload_mbps)));
    out.push_str(&format!(" Bandwidth use:  {:.1} %\n", m.bandwidth_usage));
    out.push_str(&format!(" Quality:        {}\n", paint_quality(m.quality)));
    out.push_str(&format!(
        " External IP:    {}\n",
        m.external_ip.as_deref().unwrap_or("unknown")
    ));
    out.push_str(&format!(
        " DNS servers:    {}\n",
        if m.dns_servers.is_empty() {
            "unknown".to_string()
        } else {
            m.dns_servers.join(", ")
        }
    ));
    out
}

pub fn render_health(report: &HealthReport) -> String {
    let mut out = render_metrics(&report.current);
    out.push('\n');
    out.push_str(&section("HEALTH"));
    let health = if report.overall_health == "good" {
        report.overall_health.green()
    } else {
        report.overall_health.yellow()
    };
    out.push_str(&format!(" Overall:        {}\n", health));
    out.push_str(&format!(
        " Avg latency:    {:.1} ms   Avg loss: {:.1} %\n",
        report.averages.latency_ms, report.averages.packet_loss
    ));
    for rec in &report.recommendations {
        out.push_str(&format!("  - {}\n", rec));
    }
    out
}

pub fn render_speed(result: &SpeedTestResult) -> String {
    let mut out = banner("SPEED TEST");
    out.push_str(&format!(" Download: {}\n", format_mbps(result.download_mbps)));
    out.push_str(&format!(" Upload:   {}\n", format_mbps(result.upload_mbps)));
    out.push_str(&format!(" Latency:  {:.1} ms\n", result.latency_ms));
    out
}

pub fn render_backups(backups: &[BackupInfo]) -> String {
    if backups.is_empty() {
        return " No backups found.\n".to_string();
    }
    let mut out = format!(" {:<48} {:>10}  {:<19}  {}\n", "NAME", "SIZE", "MODIFIED", "DESCRIPTION");
    out.push_str(&format!(" {:─<48} {:─>10}  {:─<19}  {:─<12}\n", "", "", "", ""));
    for b in backups {
        let description = b
            .metadata
            .as_ref()
            .map(|m| m.description.as_str())
            .unwrap_or("(no metadata)");
        out.push_str(&format!(
            " {:<48} {:>10}  {}  {}\n",
            truncate(&b.filename, 48),
            format_bytes(b.size),
            b.modified.format("%Y-%m-%d %H:%M:%S"),
            description
        ));
    }
    out
}

pub fn render_backup_stats(stats: &BackupStats) -> String {
    let fmt_time = |t: &Option<chrono::DateTime<chrono::Local>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    let mut out = section("BACKUPS");
    out.push_str(&format!(" Directory:      {}\n", stats.backup_dir.display()));
    out.push_str(&format!(
        " Count:          {} (max {})\n",
        stats.total_backups, stats.max_backups
    ));
    out.push_str(&format!(" Total size:     {}\n", format_bytes(stats.total_size)));
    out.push_str(&format!(" Average size:   {}\n", format_bytes(stats.average_size)));
    out.push_str(&format!(" Oldest:         {}\n", fmt_time(&stats.oldest)));
    out.push_str(&format!(" Newest:         {}\n", fmt_time(&stats.newest)));
    out
}

pub fn render_security_report(report: &SecurityReport) -> String {
    let yes_no = |b: bool| if b { "yes".green() } else { "no".red() };
    let mut out = banner("SECURITY REPORT");
    out.push_str(&format!(
        " Encryption key:  {} ({} bytes)\n",
        yes_no(report.key_present),
        report.key_length
    ));
    out.push_str(&format!(" Certificate:     {}\n", yes_no(report.certificate_exists)));
    out.push_str(&format!(" Valid:           {}\n", yes_no(report.certificate.valid)));
    if let Some(days) = report.certificate.days_remaining {
        out.push_str(&format!(" Expires in:      {} days\n", days));
    }
    if !report.file_permissions.is_empty() {
        out.push('\n');
        out.push_str(&section("FILE PERMISSIONS"));
        for (name, perm) in &report.file_permissions {
            out.push_str(&format!(" {:<22} {:>4}  {}\n", name, perm.permissions, yes_no(perm.secure)));
        }
    }
    out.push('\n');
    out.push_str(&section("RECOMMENDATIONS"));
    for rec in &report.recommendations {
        out.push_str(&format!("  - {}\n", rec));
    }
    out
}

/// Line-based prompts. With `auto` set every confirmation is accepted and
/// free-text questions get no answer.
pub struct Prompter<R, W> {
    input: R,
    output: W,
    auto: bool,
}

impl Prompter<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio(auto: bool) -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout(), auto)
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W, auto: bool) -> Self {
        Self {
            input,
            output,
            auto,
        }
    }

    pub fn is_auto(&self) -> bool {
        self.auto
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// Yes/no question. Empty input or EOF picks `default`.
    pub fn confirm(&mut self, question: &str, default: bool) -> Result<bool> {
        if self.auto {
            return Ok(true);
        }
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        write!(self.output, "{} {} ", question, hint)?;
        self.output.flush()?;
        Ok(match self.read_line()?.as_deref().map(str::to_ascii_lowercase) {
            Some(a) if a == "y" || a == "yes" => true,
            Some(a) if a == "n" || a == "no" => false,
            _ => default,
        })
    }

    /// Free-text question. `None` on empty input, EOF or in auto mode.
    pub fn ask(&mut self, question: &str) -> Result<Option<String>> {
        if self.auto {
            return Ok(None);
        }
        write!(self.output, "{}: ", question)?;
        self.output.flush()?;
        Ok(self.read_line()?.filter(|s| !s.is_empty()))
    }

    /// Numbered menu. Returns the 0-based choice, `None` on EOF. Invalid
    /// input re-prompts.
    pub fn choose(&mut self, title: &str, options: &[&str]) -> Result<Option<usize>> {
        loop {
            writeln!(self.output)?;
            writeln!(self.output, "{}", banner(title))?;
            for (i, opt) in options.iter().enumerate() {
                writeln!(self.output, "  {}. {}", i + 1, opt)?;
            }
            write!(self.output, "\nSelect an option [1-{}]: ", options.len())?;
            self.output.flush()?;

            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            match line.parse::<usize>() {
                Ok(n) if (1..=options.len()).contains(&n) => return Ok(Some(n - 1)),
                _ => writeln!(self.output, "Invalid choice: {}", line)?,
            }
        }
    }

    pub fn print(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{}", text)?;
        Ok(())
    }

    /// Wait for Enter (skipped in auto mode).
    pub fn pause(&mut self) -> Result<()> {
        if self.auto {
            return Ok(());
        }
        write!(self.output, "Press Enter to continue...")?;
        self.output.flush()?;
        self.read_line()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{StatusProbes, COMPONENTS};
    use chrono::Utc;
    use std::io::Cursor;

    fn prompter(input: &str, auto: bool) -> Prompter<Cursor<Vec<u8>>, Vec<u8>> {
        Prompter::new(Cursor::new(input.as_bytes().to_vec()), Vec::new(), auto)
    }

    #[test]
    fn test_confirm() {
        assert!(prompter("y\n", false).confirm("Continue?", false).unwrap());
        assert!(!prompter("no\n", false).confirm("Continue?", true).unwrap());
        assert!(prompter("\n", false).confirm("Continue?", true).unwrap());
        assert!(!prompter("", false).confirm("Continue?", false).unwrap());
        assert!(prompter("", true).confirm("Continue?", false).unwrap());
    }

    #[test]
    fn test_ask() {
        assert_eq!(
            prompter("abc123\n", false).ask("Profile").unwrap().as_deref(),
            Some("abc123")
        );
        assert_eq!(prompter("\n", false).ask("Profile").unwrap(), None);
        assert_eq!(prompter("abc123\n", true).ask("Profile").unwrap(), None);
    }

    #[test]
    fn test_choose_reprompts_on_invalid() {
        let mut p = prompter("9\nx\n2\n", false);
        assert_eq!(p.choose("MENU", &["a", "b", "c"]).unwrap(), Some(1));
        let out = String::from_utf8(p.output).unwrap();
        assert!(out.contains("Invalid choice: 9"));
        assert!(out.contains("Invalid choice: x"));
        assert!(out.contains("3. c"));
    }

    #[test]
    fn test_choose_eof() {
        assert_eq!(prompter("", false).choose("MENU", &["a"]).unwrap(), None);
    }

    #[test]
    fn test_render_status_lists_components() {
        let report = StatusReport::from_probes(StatusProbes {
            system: "linux (x86_64)".to_string(),
            warp_running: Ok(true),
            nextdns_running: Ok(false),
            wgcf_installed: true,
            nextdns_installed: true,
            internet: true,
            external_ip: Ok("104.28.0.1".to_string()),
            trace: Err(anyhow::anyhow!("offline")),
            dns_servers: Ok(vec!["127.0.0.1".to_string()]),
            checked_at: Utc::now(),
        });
        let out = render_status(&report);
        for name in COMPONENTS {
            assert!(out.contains(name), "missing {}", name);
        }
        assert!(out.contains("104.28.0.1 (WARP off)"));
    }

    #[test]
    fn test_render_tests_summary() {
        let results = vec![
            TestResult {
                name: "Internet".to_string(),
                passed: true,
                message: "reachable".to_string(),
            },
            TestResult {
                name: "WARP".to_string(),
                passed: false,
                message: "warp=off".to_string(),
            },
        ];
        assert!(render_tests(&results).contains("1/2 tests passed"));
    }

    #[test]
    fn test_render_backups_empty() {
        assert!(render_backups(&[]).contains("No backups found"));
    }
}
