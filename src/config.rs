//! Configuration management for warp-nextdns.
//!
//! The configuration lives at `~/.warp-nextdns/config.yaml` and is created
//! with defaults on first use. Every section is `#[serde(default)]`, so a
//! partial file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::platform::{is_elevated, Platform};

/// Environment variable that overrides the NextDNS profile id.
pub const PROFILE_ENV: &str = "WARP_NEXTDNS_PROFILE";

/// Environment variable that overrides the log directory.
pub const LOG_DIR_ENV: &str = "WARP_NEXTDNS_LOG_DIR";

const SYSTEM_LOG_DIR: &str = "/var/log/warp-nextdns";

/// Secure string type that zeroizes memory on drop.
/// Used for the NextDNS profile id.
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The user's home directory, or the current directory when unknown.
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// `~/.warp-nextdns`, the tool's own state directory.
pub fn app_dir() -> PathBuf {
    home_dir().join(".warp-nextdns")
}

/// `~/.warp`, parent of backups, security material and user logs.
pub fn data_dir() -> PathBuf {
    home_dir().join(".warp")
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub nextdns: NextDnsConfig,
    pub wgcf: WgcfConfig,
    pub backup: BackupConfig,
    pub security: SecurityConfig,
    pub monitor: MonitorConfig,
    /// Log directory override (see [`Config::log_dir`])
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nextdns: NextDnsConfig::default(),
            wgcf: WgcfConfig::default(),
            backup: BackupConfig::default(),
            security: SecurityConfig::default(),
            monitor: MonitorConfig::default(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Default configuration path
    pub fn default_path() -> PathBuf {
        app_dir().join("config.yaml")
    }

    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise write and return the defaults.
    pub fn load_or_init<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        config.save(path)?;
        tracing::debug!("Wrote default configuration to {:?}", path);
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !is_valid_interface_name(&self.wgcf.interface) {
            anyhow::bail!(
                "Invalid WireGuard interface name '{}'. Use 1-15 characters from [A-Za-z0-9_=+.-]",
                self.wgcf.interface
            );
        }

        let profile = self.nextdns.profile_id.as_str();
        if !profile.is_empty() && !is_valid_profile_id(profile) {
            anyhow::bail!("Invalid NextDNS profile id: must be alphanumeric");
        }
        if let Some(ref default) = self.nextdns.default_profile {
            if !is_valid_profile_id(default) {
                anyhow::bail!("Invalid NextDNS default_profile '{}'", default);
            }
        }

        for arg in &self.nextdns.extra_args {
            if !arg.starts_with('-') {
                anyhow::bail!("NextDNS extra argument '{}' must be a flag", arg);
            }
        }

        if !self.wgcf.release_api.starts_with("https://") {
            anyhow::bail!("wgcf release_api must use HTTPS: {}", self.wgcf.release_api);
        }

        if self.backup.max_backups == 0 {
            anyhow::bail!("backup.max_backups must be at least 1");
        }

        if self.monitor.interval_secs == 0 || self.monitor.refresh_secs == 0 {
            anyhow::bail!("monitor intervals must be greater than zero");
        }
        if self.monitor.history_size == 0 {
            anyhow::bail!("monitor.history_size must be greater than zero");
        }

        if self.security.cert_validity_days == 0 {
            anyhow::bail!("security.cert_validity_days must be greater than zero");
        }

        Ok(())
    }

    /// Save configuration to YAML file atomically
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let path = path.as_ref();
        let content = serde_yaml::to_string(self).with_context(|| "Failed to serialize config")?;

        let parent_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp_file = NamedTempFile::new_in(&parent_dir)
            .context("Failed to create temporary file for config")?;

        temp_file.write_all(b"# warp-nextdns configuration\n")?;
        temp_file.write_all(content.as_bytes())?;
        temp_file.as_file().sync_all()?;

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {:?}", path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// Resolve the log directory: env override, then config, then the
    /// system location for root on Unix, else `~/.warp/logs`.
    pub fn log_dir(&self) -> PathBuf {
        if let Some(dir) = env::var_os(LOG_DIR_ENV) {
            return PathBuf::from(dir);
        }
        if let Some(ref dir) = self.log_dir {
            return dir.clone();
        }
        if Platform::current() != Platform::Windows && is_elevated() {
            PathBuf::from(SYSTEM_LOG_DIR)
        } else {
            data_dir().join("logs")
        }
    }

    /// Main log file path
    pub fn log_file(&self) -> PathBuf {
        self.log_dir().join("warp-nextdns.log")
    }
}

/// NextDNS settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NextDnsConfig {
    /// Profile id, e.g. `abc123`. Also read from WARP_NEXTDNS_PROFILE.
    pub profile_id: SecureString,
    /// Profile used by `--auto` runs when no id is configured
    pub default_profile: Option<String>,
    /// Extra flags passed to `nextdns install`
    pub extra_args: Vec<String>,
}

impl NextDnsConfig {
    /// Get the effective profile id, checking the env var first
    pub fn get_profile_id(&self) -> SecureString {
        if let Ok(val) = env::var(PROFILE_ENV) {
            if !val.trim().is_empty() {
                return SecureString::new(val.trim().to_string());
            }
        }
        self.profile_id.clone()
    }
}

/// wgcf and WireGuard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WgcfConfig {
    /// Directory where wgcf writes its account and profile
    pub work_dir: PathBuf,
    /// Where the wgcf binary is installed
    pub binary_path: PathBuf,
    /// WireGuard interface name; the profile lands at `<wireguard_dir>/<interface>.conf`
    pub interface: String,
    pub wireguard_dir: PathBuf,
    /// GitHub API endpoint for the latest wgcf release
    pub release_api: String,
}

impl Default for WgcfConfig {
    fn default() -> Self {
        let binary_path = if Platform::current() == Platform::Windows {
            app_dir().join("wgcf.exe")
        } else {
            PathBuf::from("/usr/local/bin/wgcf")
        };
        let wireguard_dir = if Platform::current() == Platform::Windows {
            app_dir().join("wireguard")
        } else {
            PathBuf::from("/etc/wireguard")
        };
        Self {
            work_dir: app_dir(),
            binary_path,
            interface: "wgcf".to_string(),
            wireguard_dir,
            release_api: "https://api.github.com/repos/ViRb3/wgcf/releases/latest".to_string(),
        }
    }
}

impl WgcfConfig {
    pub fn account_file(&self) -> PathBuf {
        self.work_dir.join("wgcf-account.toml")
    }

    pub fn profile_file(&self) -> PathBuf {
        self.work_dir.join("wgcf-profile.conf")
    }

    pub fn installed_profile(&self) -> PathBuf {
        self.wireguard_dir.join(format!("{}.conf", self.interface))
    }
}

/// Backup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub dir: PathBuf,
    /// Archives kept after pruning
    pub max_backups: usize,
    /// Take a backup before setup and uninstall
    pub auto_backup: bool,
    pub include_logs: bool,
    pub include_security: bool,
    /// true: `.tar.gz`, false: `.zip`
    pub compression: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: data_dir().join("backups"),
            max_backups: 10,
            auto_backup: true,
            include_logs: true,
            include_security: true,
            compression: true,
        }
    }
}

/// Security material settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub dir: PathBuf,
    pub cert_validity_days: u32,
    /// Warn when the certificate expires within this many days
    pub cert_warning_days: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            dir: data_dir().join("security"),
            cert_validity_days: 365,
            cert_warning_days: 30,
        }
    }
}

/// Network monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Background sampling interval
    pub interval_secs: u64,
    /// Samples kept in memory
    pub history_size: usize,
    /// Refresh rate of the live `monitor` dashboard
    pub refresh_secs: u64,
    pub ping_targets: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            history_size: 100,
            refresh_secs: 5,
            ping_targets: vec![
                "1.1.1.1".to_string(),
                "8.8.8.8".to_string(),
                "208.67.222.222".to_string(),
            ],
        }
    }
}

/// WireGuard interface names: 1-15 chars of `[A-Za-z0-9_=+.-]`.
pub fn is_valid_interface_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 15
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_=+.-".contains(c))
}

/// NextDNS profile ids are short alphanumeric strings.
pub fn is_valid_profile_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 32 && id.chars().all(|c| c.is_ascii_alphanumeric())
}
