//! NextDNS CLI wrapper.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cmd_abstraction::{args_to_strings, CommandExecutor};
use crate::error::WarpError;
use crate::fetcher::Fetcher;
use crate::platform;

const INSTALL_SCRIPT_URL: &str = "https://nextdns.io/install";
const TEST_URL: &str = "https://test.nextdns.io";
const DEFAULT_CONFIG_FILE: &str = "/etc/nextdns.conf";

/// Whether `nextdns status` output reports a running daemon.
pub fn parse_running(output: &str) -> bool {
    let s = output.trim().to_ascii_lowercase();
    s.contains("running") && !s.contains("not running")
}

/// Response of `https://test.nextdns.io`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NextDnsTest {
    pub status: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
}

impl NextDnsTest {
    /// Queries are going through NextDNS.
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NextDnsStatus {
    pub installed: bool,
    pub running: bool,
    pub configured: bool,
}

pub struct NextDnsManager {
    executor: Arc<dyn CommandExecutor>,
    config_file: PathBuf,
}

impl NextDnsManager {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    pub fn with_config_file(mut self, path: PathBuf) -> Self {
        self.config_file = path;
        self
    }

    pub fn config_file(&self) -> &PathBuf {
        &self.config_file
    }

    pub fn is_installed(&self) -> bool {
        platform::command_exists(self.executor.as_ref(), "nextdns")
    }

    pub fn is_configured(&self) -> bool {
        self.config_file.exists()
    }

    /// Run the official install script through `sh`.
    pub async fn install(&self, fetcher: &Fetcher) -> Result<()> {
        if self.is_installed() {
            info!("NextDNS CLI already installed");
            return Ok(());
        }
        info!("Installing NextDNS CLI...");
        let script = fetcher
            .get_text(INSTALL_SCRIPT_URL)
            .await
            .context("Failed to download the NextDNS install script")?;
        self.executor
            .execute_with_stdin("sh", &args_to_strings(&["-s", "--", "install"]), &script)?
            .into_result("nextdns install script")?;

        if !self.is_installed() {
            return Err(WarpError::NotFound("nextdns binary after install script".to_string()).into());
        }
        Ok(())
    }

    /// Install the NextDNS service bound to `profile_id`.
    pub fn configure(&self, profile_id: &str, extra_args: &[String]) -> Result<()> {
        self.require_installed()?;
        info!("Configuring NextDNS profile...");
        let mut args = args_to_strings(&["install", "-config", profile_id]);
        args.extend(extra_args.iter().cloned());
        self.executor
            .execute("nextdns", &args)?
            .into_result("nextdns install")?;
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        self.run_action("start")
    }

    pub fn stop(&self) -> Result<()> {
        self.run_action("stop")
    }

    pub fn is_running(&self) -> Result<bool> {
        let out = self.executor.execute("nextdns", &args_to_strings(&["status"]))?;
        Ok(parse_running(&out.stdout))
    }

    pub fn status(&self) -> NextDnsStatus {
        let installed = self.is_installed();
        NextDnsStatus {
            installed,
            running: installed && self.is_running().unwrap_or(false),
            configured: self.is_configured(),
        }
    }

    /// Last `lines` lines of the NextDNS daemon log.
    pub fn logs(&self, lines: usize) -> Result<String> {
        self.require_installed()?;
        let out = self
            .executor
            .execute("nextdns", &args_to_strings(&["log", "-n", &lines.to_string()]))?
            .into_result("nextdns log")?;
        Ok(out.stdout)
    }

    /// Ask test.nextdns.io whether this host resolves through NextDNS.
    pub async fn test_connection(&self, fetcher: &Fetcher) -> Result<NextDnsTest> {
        fetcher.get_json::<NextDnsTest>(TEST_URL).await
    }

    /// Remove the NextDNS service.
    pub fn uninstall(&self) -> Result<()> {
        if !self.is_installed() {
            return Ok(());
        }
        self.executor
            .execute("nextdns", &args_to_strings(&["uninstall"]))?
            .into_result("nextdns uninstall")?;
        Ok(())
    }

    fn run_action(&self, action: &str) -> Result<()> {
        self.require_installed()?;
        info!("NextDNS {}...", action);
        self.executor
            .execute("nextdns", &args_to_strings(&[action]))?
            .into_result(&format!("nextdns {}", action))?;
        Ok(())
    }

    fn require_installed(&self) -> Result<()> {
        if !self.is_installed() {
            return Err(WarpError::NotFound("nextdns CLI is not installed".to_string()).into());
        }
        Ok(())
    }
}
