//! System-level installation: WireGuard tools and the auto-start unit.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cmd_abstraction::{args_to_strings, CommandExecutor};
use crate::error::WarpError;
use crate::fetcher::Fetcher;
use crate::platform::{self, PackageManager, Platform};

pub const SERVICE_NAME: &str = "warp-nextdns";
pub const WINDOWS_TASK_NAME: &str = "WARP NextDNS Manager";
const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";
const WIREGUARD_WINDOWS_INSTALLER: &str =
    "https://download.wireguard.com/windows-client/wireguard-installer.exe";

/// Oneshot unit that brings the tunnel and NextDNS up at boot.
pub fn generate_service_unit(exe: &Path) -> String {
    let exe = exe.display();
    format!(
        r#"[Unit]
Description=WARP NextDNS Manager
After=network-online.target
Wants=network-online.target

[Service]
Type=oneshot
ExecStart={exe} start --auto --quiet
ExecStop={exe} stop --auto --quiet
RemainAfterExit=yes

[Install]
WantedBy=multi-user.target
"#
    )
}

/// Arguments for `schtasks` registering a boot task running `exe start`.
pub fn schtasks_create_args(exe: &Path) -> Vec<String> {
    vec![
        "/Create".to_string(),
        "/TN".to_string(),
        WINDOWS_TASK_NAME.to_string(),
        "/TR".to_string(),
        format!("\"{}\" start --auto", exe.display()),
        "/SC".to_string(),
        "ONSTART".to_string(),
        "/RL".to_string(),
        "HIGHEST".to_string(),
        "/RU".to_string(),
        "SYSTEM".to_string(),
        "/F".to_string(),
    ]
}

pub struct Installer {
    executor: Arc<dyn CommandExecutor>,
    unit_dir: PathBuf,
}

impl Installer {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            unit_dir: PathBuf::from(SYSTEMD_UNIT_DIR),
        }
    }

    pub fn with_unit_dir(mut self, dir: PathBuf) -> Self {
        self.unit_dir = dir;
        self
    }

    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(format!("{}.service", SERVICE_NAME))
    }

    pub fn wireguard_installed(&self) -> bool {
        let tool = if Platform::current() == Platform::Windows {
            "wireguard"
        } else {
            "wg-quick"
        };
        platform::command_exists(self.executor.as_ref(), tool)
    }

    /// Install WireGuard tools with the distribution package manager, or
    /// the official installer on Windows.
    pub async fn install_wireguard_tools(&self, fetcher: &Fetcher) -> Result<()> {
        if self.wireguard_installed() {
            info!("WireGuard tools already installed");
            return Ok(());
        }

        match Platform::current() {
            Platform::Linux => {
                let pm = PackageManager::detect(self.executor.as_ref()).ok_or_else(|| {
                    WarpError::NotFound(
                        "supported package manager (apt, dnf, yum, pacman, zypper); install wireguard-tools manually"
                            .to_string(),
                    )
                })?;
                info!("Installing WireGuard tools with {}...", pm);
                for (program, args) in pm.install_commands(pm.wireguard_packages()) {
                    let label = format!("{} {}", program, args.join(" "));
                    self.executor.execute(&program, &args)?.into_result(&label)?;
                }
                Ok(())
            }
            Platform::Windows => {
                let dir = tempfile::TempDir::new().context("Failed to create temp dir")?;
                let installer = dir.path().join("wireguard-installer.exe");
                let bytes = fetcher.download(WIREGUARD_WINDOWS_INSTALLER).await?;
                fs::write(&installer, bytes)
                    .with_context(|| format!("Failed to write {:?}", installer))?;
                info!("Running WireGuard installer...");
                self.executor
                    .execute(&installer.to_string_lossy(), &args_to_strings(&["/S"]))?
                    .into_result("wireguard-installer")?;
                Ok(())
            }
            other => Err(WarpError::UnsupportedPlatform(other.to_string()).into()),
        }
    }

    /// Register auto-start: a systemd unit on Linux, a scheduled task on
    /// Windows.
    pub fn install_service(&self, exe: &Path) -> Result<()> {
        match Platform::current() {
            Platform::Windows => {
                info!("Creating scheduled task '{}'...", WINDOWS_TASK_NAME);
                self.executor
                    .execute("schtasks", &schtasks_create_args(exe))?
                    .into_result("schtasks /Create")?;
            }
            _ => {
                let path = self.unit_path();
                info!("Creating {}...", path.display());
                fs::create_dir_all(&self.unit_dir)
                    .with_context(|| format!("Failed to create {:?}", self.unit_dir))?;
                fs::write(&path, generate_service_unit(exe))
                    .with_context(|| format!("Failed to write {:?}", path))?;
                self.systemctl(&["daemon-reload"])?;
                self.systemctl(&["enable", &format!("{}.service", SERVICE_NAME)])?;
            }
        }
        Ok(())
    }

    /// Remove the auto-start unit or task. Missing pieces are not errors.
    pub fn remove_service(&self) -> Result<()> {
        match Platform::current() {
            Platform::Windows => {
                let args = args_to_strings(&["/Delete", "/TN", WINDOWS_TASK_NAME, "/F"]);
                if let Err(e) = self
                    .executor
                    .execute("schtasks", &args)
                    .and_then(|o| o.into_result("schtasks /Delete"))
                {
                    warn!("Failed to delete scheduled task: {:#}", e);
                }
            }
            _ => {
                let unit = format!("{}.service", SERVICE_NAME);
                if let Err(e) = self.systemctl(&["disable", &unit]) {
                    warn!("Failed to disable {}: {:#}", unit, e);
                }
                let path = self.unit_path();
                if path.exists() {
                    info!("Removing {}...", path.display());
                    fs::remove_file(&path)?;
                }
                if let Err(e) = self.systemctl(&["daemon-reload"]) {
                    warn!("systemctl daemon-reload failed: {:#}", e);
                }
            }
        }
        Ok(())
    }

    pub fn is_service_installed(&self) -> bool {
        if Platform::current() == Platform::Windows {
            return self
                .executor
                .execute("schtasks", &args_to_strings(&["/Query", "/TN", WINDOWS_TASK_NAME]))
                .map(|o| o.success)
                .unwrap_or(false);
        }
        self.unit_path().exists()
    }

    fn systemctl(&self, args: &[&str]) -> Result<()> {
        let label = format!("systemctl {}", args.join(" "));
        self.executor
            .execute("systemctl", &args_to_strings(args))?
            .into_result(&label)?;
        Ok(())
    }
}
