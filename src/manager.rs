//! Orchestration of wgcf, NextDNS and the WireGuard service.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::backup::{BackupManager, BackupSources, CreateOptions};
use crate::cmd_abstraction::CommandExecutor;
use crate::config::Config;
use crate::error::WarpError;
use crate::fetcher::Fetcher;
use crate::installer::Installer;
use crate::network::{Connectivity, NetworkProbe, TraceInfo};
use crate::nextdns::NextDnsManager;
use crate::platform::{self, SystemInfo};
use crate::signal;
use crate::wgcf::{WgcfManager, LOCAL_DNS};

const RESTART_PAUSE: Duration = Duration::from_secs(2);

/// Components reported by `status`, in display order.
pub const COMPONENTS: [&str; 9] = [
    "System",
    "WARP Service",
    "NextDNS Service",
    "WGCF Tool",
    "NextDNS Tool",
    "Internet Connection",
    "WARP IP",
    "DNS Servers",
    "Last Updated",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Running,
    Stopped,
    Installed,
    NotInstalled,
    Connected,
    Disconnected,
    Configured,
    Info,
    Unknown,
    Error,
}

impl ComponentState {
    /// Healthy states render green, failures red, the rest yellow.
    pub fn is_healthy(&self) -> bool {
        matches!(
            self,
            ComponentState::Running
                | ComponentState::Installed
                | ComponentState::Connected
                | ComponentState::Configured
                | ComponentState::Info
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ComponentState::Stopped
                | ComponentState::NotInstalled
                | ComponentState::Disconnected
                | ComponentState::Error
        )
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentState::Running => "Running",
            ComponentState::Stopped => "Stopped",
            ComponentState::Installed => "Installed",
            ComponentState::NotInstalled => "Not Installed",
            ComponentState::Connected => "Connected",
            ComponentState::Disconnected => "Disconnected",
            ComponentState::Configured => "Configured",
            ComponentState::Info => "Info",
            ComponentState::Unknown => "Unknown",
            ComponentState::Error => "Error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub component: String,
    pub state: ComponentState,
    pub details: String,
}

impl ComponentStatus {
    fn new(component: &str, state: ComponentState, details: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            state,
            details: details.into(),
        }
    }
}

/// Raw probe results. Each fallible probe keeps its error so the report
/// can show it instead of dropping the row.
pub struct StatusProbes {
    pub system: String,
    pub warp_running: Result<bool>,
    pub nextdns_running: Result<bool>,
    pub wgcf_installed: bool,
    pub nextdns_installed: bool,
    pub internet: bool,
    pub external_ip: Result<String>,
    pub trace: Result<TraceInfo>,
    pub dns_servers: Result<Vec<String>>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub components: Vec<ComponentStatus>,
}

impl StatusReport {
    /// One entry per name in [`COMPONENTS`], in order, whatever the probes
    /// returned.
    pub fn from_probes(p: StatusProbes) -> Self {
        let service = |name: &str, r: &Result<bool>, unit: &str| match r {
            Ok(true) => ComponentStatus::new(name, ComponentState::Running, unit),
            Ok(false) => ComponentStatus::new(name, ComponentState::Stopped, unit),
            Err(e) => ComponentStatus::new(name, ComponentState::Unknown, format!("{:#}", e)),
        };
        let tool = |name: &str, installed: bool, binary: &str| {
            if installed {
                ComponentStatus::new(name, ComponentState::Installed, binary)
            } else {
                ComponentStatus::new(name, ComponentState::NotInstalled, binary)
            }
        };

        let internet = if p.internet {
            ComponentStatus::new(COMPONENTS[5], ComponentState::Connected, "reachable")
        } else {
            ComponentStatus::new(COMPONENTS[5], ComponentState::Disconnected, "unreachable")
        };

        let warp_on = p.trace.as_ref().map(TraceInfo::warp_enabled).unwrap_or(false);
        let warp_ip = match &p.external_ip {
            Ok(ip) if warp_on => ComponentStatus::new(COMPONENTS[6], ComponentState::Connected, ip.as_str()),
            Ok(ip) => ComponentStatus::new(
                COMPONENTS[6],
                ComponentState::Info,
                format!("{} (WARP off)", ip),
            ),
            Err(e) => ComponentStatus::new(COMPONENTS[6], ComponentState::Unknown, format!("{:#}", e)),
        };

        let dns = match &p.dns_servers {
            Ok(servers) if servers.iter().any(|s| s == LOCAL_DNS) => ComponentStatus::new(
                COMPONENTS[7],
                ComponentState::Configured,
                servers.join(", "),
            ),
            Ok(servers) if servers.is_empty() => {
                ComponentStatus::new(COMPONENTS[7], ComponentState::Unknown, "no nameservers found")
            }
            Ok(servers) => ComponentStatus::new(COMPONENTS[7], ComponentState::Info, servers.join(", ")),
            Err(e) => ComponentStatus::new(COMPONENTS[7], ComponentState::Error, format!("{:#}", e)),
        };

        Self {
            components: vec![
                ComponentStatus::new(COMPONENTS[0], ComponentState::Info, p.system),
                service(COMPONENTS[1], &p.warp_running, "wg-quick"),
                service(COMPONENTS[2], &p.nextdns_running, "nextdns"),
                tool(COMPONENTS[3], p.wgcf_installed, "wgcf"),
                tool(COMPONENTS[4], p.nextdns_installed, "nextdns"),
                internet,
                warp_ip,
                dns,
                ComponentStatus::new(
                    COMPONENTS[8],
                    ComponentState::Info,
                    p.checked_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                ),
            ],
        }
    }

    pub fn get(&self, component: &str) -> Option<&ComponentStatus> {
        self.components.iter().find(|c| c.component == component)
    }
}

/// One line of the `test` command.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

impl TestResult {
    fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.into(),
        }
    }

    fn fail(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.into(),
        }
    }
}

/// NextDNS profile to configure: the configured id, else the default
/// profile in auto mode.
pub fn resolve_profile(config: &Config, auto: bool) -> Option<String> {
    let configured = config.nextdns.get_profile_id();
    if !configured.is_empty() {
        return Some(configured.as_str().to_string());
    }
    if auto {
        return config
            .nextdns
            .default_profile
            .clone()
            .filter(|p| !p.is_empty());
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    Elevation,
    Dependencies,
    Registration,
    PatchProfile,
    InstallProfile,
    ConfigureNextDns,
    Services,
    Start,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SetupStep::Elevation => "privilege check",
            SetupStep::Dependencies => "dependency installation",
            SetupStep::Registration => "WARP registration",
            SetupStep::PatchProfile => "profile DNS patch",
            SetupStep::InstallProfile => "profile installation",
            SetupStep::ConfigureNextDns => "NextDNS configuration",
            SetupStep::Services => "service creation",
            SetupStep::Start => "service start",
        };
        f.write_str(s)
    }
}

pub struct WarpNextDnsManager {
    config: Config,
    config_path: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    wgcf: WgcfManager,
    nextdns: NextDnsManager,
    installer: Installer,
    connectivity: Arc<dyn Connectivity>,
    probe: NetworkProbe,
}

impl WarpNextDnsManager {
    pub fn new(
        config: Config,
        config_path: PathBuf,
        executor: Arc<dyn CommandExecutor>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            wgcf: WgcfManager::new(executor.clone(), config.wgcf.clone()),
            nextdns: NextDnsManager::new(executor.clone()),
            installer: Installer::new(executor.clone()),
            probe: NetworkProbe::new(executor.clone()),
            config,
            config_path,
            executor,
            connectivity,
        }
    }

    pub fn with_nextdns(mut self, nextdns: NextDnsManager) -> Self {
        self.nextdns = nextdns;
        self
    }

    pub fn with_installer(mut self, installer: Installer) -> Self {
        self.installer = installer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn wgcf(&self) -> &WgcfManager {
        &self.wgcf
    }

    pub fn nextdns(&self) -> &NextDnsManager {
        &self.nextdns
    }

    pub fn probe(&self) -> &NetworkProbe {
        &self.probe
    }

    pub fn connectivity(&self) -> Arc<dyn Connectivity> {
        self.connectivity.clone()
    }

    pub fn backup_manager(&self) -> BackupManager {
        BackupManager::new(
            self.config.backup.clone(),
            BackupSources::from_config(&self.config, &self.config_path),
        )
    }

    /// Full install-configure-start pipeline. Aborts on the first failing
    /// step; nothing already done is rolled back.
    pub async fn setup(&self, fetcher: &Fetcher, profile: Option<&str>) -> Result<()> {
        self.step(SetupStep::Elevation, || self.ensure_elevated())?;

        if self.config.backup.auto_backup {
            if let Err(e) = self.backup_manager().create(&CreateOptions {
                description: "before setup".to_string(),
                ..Default::default()
            }) {
                warn!("Pre-setup backup failed: {:#}", e);
            }
        }

        self.check_interrupted()?;
        self.install_dependencies(fetcher)
            .await
            .with_context(|| format!("Setup failed at {}", SetupStep::Dependencies))?;

        self.check_interrupted()?;
        self.step(SetupStep::Registration, || {
            self.wgcf.register()?;
            self.wgcf.generate()
        })?;

        self.step(SetupStep::PatchProfile, || self.wgcf.patch_profile().map(|_| ()))?;
        self.step(SetupStep::InstallProfile, || self.wgcf.install_profile())?;

        self.check_interrupted()?;
        self.step(SetupStep::ConfigureNextDns, || self.configure_nextdns(profile))?;

        self.step(SetupStep::Services, || self.create_services())?;

        self.check_interrupted()?;
        self.step(SetupStep::Start, || self.start())?;

        info!("Setup complete");
        Ok(())
    }

    fn step<F>(&self, step: SetupStep, f: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        info!("Setup: {}...", step);
        f().with_context(|| format!("Setup failed at {}", step))
    }

    /// Stop anything setup already started, then fail.
    fn check_interrupted(&self) -> Result<()> {
        if signal::is_shutdown_requested() {
            warn!("Interrupted, stopping services...");
            self.cleanup();
            return Err(WarpError::Config("setup interrupted".to_string()).into());
        }
        Ok(())
    }

    fn ensure_elevated(&self) -> Result<()> {
        platform::ensure_elevated(self.executor.as_ref(), &[])
    }

    pub async fn install_dependencies(&self, fetcher: &Fetcher) -> Result<()> {
        self.installer.install_wireguard_tools(fetcher).await?;
        self.wgcf.install(fetcher).await?;
        self.nextdns.install(fetcher).await
    }

    /// Bind NextDNS to `profile`. Skipped with a warning when no profile
    /// is available.
    pub fn configure_nextdns(&self, profile: Option<&str>) -> Result<()> {
        match profile {
            Some(id) => self.nextdns.configure(id, &self.config.nextdns.extra_args),
            None => {
                warn!("No NextDNS profile configured, skipping NextDNS configuration");
                Ok(())
            }
        }
    }

    fn create_services(&self) -> Result<()> {
        self.wgcf.enable_service()?;
        let exe = std::env::current_exe().context("Failed to locate own executable")?;
        self.installer.install_service(&exe)
    }

    pub fn start(&self) -> Result<()> {
        self.wgcf.start()?;
        self.nextdns.start()?;
        info!("Services started");
        Ok(())
    }

    /// Stop both services. Failures are logged, never returned.
    pub fn stop(&self) {
        if let Err(e) = self.wgcf.stop() {
            warn!("Failed to stop WARP: {:#}", e);
        }
        if let Err(e) = self.nextdns.stop() {
            warn!("Failed to stop NextDNS: {:#}", e);
        }
        info!("Services stopped");
    }

    pub async fn restart(&self) -> Result<()> {
        self.stop();
        tokio::time::sleep(RESTART_PAUSE).await;
        self.start()
    }

    pub fn cleanup(&self) {
        self.stop();
    }

    /// Both services up and the internet reachable.
    pub async fn verify_connection(&self) -> bool {
        let warp = self.wgcf.is_running().unwrap_or(false);
        let nextdns = self.nextdns.is_running().unwrap_or(false);
        warp && nextdns && self.connectivity.internet_available().await
    }

    pub async fn collect_probes(&self) -> StatusProbes {
        let info = SystemInfo::collect(self.executor.as_ref());
        let system = format!(
            "{} ({}){}",
            info.platform,
            info.arch,
            if info.elevated { ", elevated" } else { "" }
        );
        let wgcf_installed = self.wgcf.is_installed();
        let nextdns_installed = self.nextdns.is_installed();
        let nextdns_running = if nextdns_installed {
            self.nextdns.is_running()
        } else {
            Ok(false)
        };

        let internet = self.connectivity.internet_available().await;
        let external_ip = self.connectivity.external_ip().await;
        let trace = self.connectivity.trace().await;

        StatusProbes {
            system,
            warp_running: self.wgcf.is_running(),
            nextdns_running,
            wgcf_installed,
            nextdns_installed,
            internet,
            external_ip,
            trace,
            dns_servers: self.probe.dns_servers(),
            checked_at: Utc::now(),
        }
    }

    pub async fn get_status(&self) -> StatusReport {
        StatusReport::from_probes(self.collect_probes().await)
    }

    /// Connectivity checks for the `test` command.
    pub async fn run_tests(&self, fetcher: &Fetcher) -> Vec<TestResult> {
        let mut results = Vec::new();

        results.push(if self.connectivity.internet_available().await {
            TestResult::pass("Internet", "reachable")
        } else {
            TestResult::fail("Internet", "no response from www.google.com")
        });

        results.push(match self.connectivity.trace().await {
            Ok(trace) if trace.warp_enabled() => TestResult::pass(
                "WARP",
                format!(
                    "warp={} ip={}",
                    trace.warp.as_deref().unwrap_or("?"),
                    trace.ip.as_deref().unwrap_or("?")
                ),
            ),
            Ok(trace) => TestResult::fail(
                "WARP",
                format!("traffic not routed through WARP (warp={})", trace.warp.as_deref().unwrap_or("?")),
            ),
            Err(e) => TestResult::fail("WARP", format!("{:#}", e)),
        });

        results.push(match self.probe.dns_servers() {
            Ok(servers) if servers.iter().any(|s| s == LOCAL_DNS) => {
                TestResult::pass("DNS", servers.join(", "))
            }
            Ok(servers) => TestResult::fail(
                "DNS",
                format!("{} not in resolvers ({})", LOCAL_DNS, servers.join(", ")),
            ),
            Err(e) => TestResult::fail("DNS", format!("{:#}", e)),
        });

        results.push(match self.nextdns.test_connection(fetcher).await {
            Ok(t) if t.is_ok() => TestResult::pass(
                "NextDNS",
                format!(
                    "protocol {} profile {}",
                    t.protocol.as_deref().unwrap_or("?"),
                    t.profile.as_deref().unwrap_or("?")
                ),
            ),
            Ok(t) => TestResult::fail("NextDNS", format!("status: {}", t.status)),
            Err(e) => TestResult::fail("NextDNS", format!("{:#}", e)),
        });

        for (name, running) in [
            ("WARP service", self.wgcf.is_running()),
            ("NextDNS service", self.nextdns.is_running()),
        ] {
            results.push(match running {
                Ok(true) => TestResult::pass(name, "running"),
                Ok(false) => TestResult::fail(name, "not running"),
                Err(e) => TestResult::fail(name, format!("{:#}", e)),
            });
        }

        results
    }

    /// Remove services, profile and NextDNS. Configuration and backups
    /// are kept.
    pub fn uninstall(&self) -> Result<()> {
        if self.config.backup.auto_backup {
            if let Err(e) = self.backup_manager().create(&CreateOptions {
                description: "before uninstall".to_string(),
                ..Default::default()
            }) {
                warn!("Pre-uninstall backup failed: {:#}", e);
            }
        }
        self.installer.remove_service()?;
        self.wgcf.remove()?;
        self.nextdns.uninstall()?;
        info!("Uninstall complete");
        Ok(())
    }
}
