//! wgcf wrapper: fetch the binary, register a WARP account, generate the
//! WireGuard profile, point its DNS at the local NextDNS proxy and manage
//! the resulting tunnel service.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cmd_abstraction::{args_to_strings, CommandExecutor};
use crate::config::WgcfConfig;
use crate::error::WarpError;
use crate::fetcher::Fetcher;
use crate::platform::{self, Platform};

/// Where NextDNS listens once installed.
pub const LOCAL_DNS: &str = "127.0.0.1";

/// Rewrite the `[Interface]` DNS settings of a WireGuard profile so the
/// tunnel resolves through the local NextDNS proxy.
///
/// Active `DNS =` lines with any other value are commented out, and exactly
/// one active `DNS = 127.0.0.1` line remains. Applying the patch to its own
/// output is a no-op.
pub fn patch_profile_dns(content: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_interface = false;
    let mut interface_seen = false;
    let mut has_local = false;
    let mut insert_at: Option<usize> = None;
    let mut interface_end: Option<usize> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            if in_interface && interface_end.is_none() {
                interface_end = Some(trailing_content_end(&out));
            }
            in_interface = trimmed.eq_ignore_ascii_case("[Interface]");
            interface_seen |= in_interface;
            out.push(line.to_string());
            continue;
        }

        if in_interface {
            if let Some(value) = dns_value(trimmed) {
                if value == LOCAL_DNS {
                    if has_local {
                        continue;
                    }
                    has_local = true;
                    out.push(line.to_string());
                } else {
                    out.push(format!("# {}", trimmed));
                    if insert_at.is_none() {
                        insert_at = Some(out.len());
                    }
                }
                continue;
            }
        }
        out.push(line.to_string());
    }

    if in_interface && interface_end.is_none() {
        interface_end = Some(trailing_content_end(&out));
    }

    if interface_seen && !has_local {
        let at = insert_at.or(interface_end).unwrap_or(out.len());
        out.insert(at, format!("DNS = {}", LOCAL_DNS));
    }

    let mut result = out.join("\n");
    if content.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Value of an active `DNS = ...` line, or None.
fn dns_value(trimmed: &str) -> Option<&str> {
    if trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    if key.trim().eq_ignore_ascii_case("DNS") {
        Some(value.trim())
    } else {
        None
    }
}

/// Index just past the last non-blank line, so an inserted line lands
/// before any blank separator.
fn trailing_content_end(lines: &[String]) -> usize {
    lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(lines.len())
}

#[derive(Debug, Deserialize)]
pub struct GithubRelease {
    pub tag_name: String,
    pub assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
pub struct GithubAsset {
    pub name: String,
    pub browser_download_url: String,
}

/// Pick the wgcf asset for `os` (`linux`, `windows`, `darwin`) and release
/// architecture.
pub fn select_release_asset<'a>(
    release: &'a GithubRelease,
    os: &str,
    arch: &str,
) -> Option<&'a GithubAsset> {
    let suffix = format!("_{}_{}", os, arch);
    let suffix_exe = format!("{}.exe", suffix);
    release
        .assets
        .iter()
        .find(|a| a.name.ends_with(&suffix) || a.name.ends_with(&suffix_exe))
}

/// State of the wgcf artifacts on disk.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WgcfStatus {
    pub binary_installed: bool,
    pub account_registered: bool,
    pub profile_generated: bool,
    pub profile_installed: bool,
}

pub struct WgcfManager {
    executor: Arc<dyn CommandExecutor>,
    config: WgcfConfig,
}

impl WgcfManager {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: WgcfConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &WgcfConfig {
        &self.config
    }

    /// Name of the systemd unit that brings the tunnel up.
    pub fn service_name(&self) -> String {
        format!("wg-quick@{}", self.config.interface)
    }

    fn binary(&self) -> String {
        if self.config.binary_path.exists() {
            self.config.binary_path.to_string_lossy().to_string()
        } else {
            "wgcf".to_string()
        }
    }

    pub fn is_installed(&self) -> bool {
        self.config.binary_path.exists() || platform::command_exists(self.executor.as_ref(), "wgcf")
    }

    /// Download the latest wgcf release for this host into `binary_path`.
    pub async fn install(&self, fetcher: &Fetcher) -> Result<()> {
        if self.is_installed() {
            info!("wgcf already installed");
            return Ok(());
        }

        let machine = platform::machine_arch(self.executor.as_ref());
        let arch = platform::release_arch(&machine).ok_or_else(|| {
            WarpError::UnsupportedPlatform(format!("no wgcf build for architecture {}", machine))
        })?;
        let os = match Platform::current() {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::MacOs => "darwin",
            Platform::Other => {
                return Err(WarpError::UnsupportedPlatform(std::env::consts::OS.to_string()).into())
            }
        };

        let release: GithubRelease = fetcher
            .get_json(&self.config.release_api)
            .await
            .context("Failed to query wgcf releases")?;
        let asset = select_release_asset(&release, os, arch).ok_or_else(|| {
            WarpError::NotFound(format!(
                "wgcf {} has no asset for {}/{}",
                release.tag_name, os, arch
            ))
        })?;
        info!("Installing wgcf {} ({})", release.tag_name, asset.name);

        let bytes = fetcher.download(&asset.browser_download_url).await?;
        write_executable(&self.config.binary_path, &bytes)?;
        info!("wgcf installed at {:?}", self.config.binary_path);
        Ok(())
    }

    /// Register a WARP account unless one already exists.
    pub fn register(&self) -> Result<()> {
        let account = self.config.account_file();
        if account.exists() {
            info!("WARP account already registered ({:?})", account);
            return Ok(());
        }
        fs::create_dir_all(&self.config.work_dir)
            .with_context(|| format!("Failed to create {:?}", self.config.work_dir))?;

        info!("Registering WARP account...");
        let args = vec![
            "register".to_string(),
            "--accept-tos".to_string(),
            "--config".to_string(),
            account.to_string_lossy().to_string(),
        ];
        self.executor
            .execute(&self.binary(), &args)?
            .into_result("wgcf register")?;

        if !account.exists() {
            return Err(WarpError::NotFound(format!("{:?} after wgcf register", account)).into());
        }
        Ok(())
    }

    /// Generate the WireGuard profile from the registered account.
    pub fn generate(&self) -> Result<()> {
        let account = self.config.account_file();
        if !account.exists() {
            return Err(WarpError::NotFound(format!("WARP account {:?}", account)).into());
        }
        let profile = self.config.profile_file();

        info!("Generating WireGuard profile...");
        let args = vec![
            "generate".to_string(),
            "--config".to_string(),
            account.to_string_lossy().to_string(),
            "--profile".to_string(),
            profile.to_string_lossy().to_string(),
        ];
        self.executor
            .execute(&self.binary(), &args)?
            .into_result("wgcf generate")?;

        if !profile.exists() {
            return Err(WarpError::NotFound(format!("{:?} after wgcf generate", profile)).into());
        }
        Ok(())
    }

    /// Apply [`patch_profile_dns`] to the generated profile. Returns whether
    /// the file changed.
    pub fn patch_profile(&self) -> Result<bool> {
        let path = self.config.profile_file();
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read profile {:?}", path))?;
        let patched = patch_profile_dns(&content);
        if patched == content {
            debug!("Profile DNS already points at {}", LOCAL_DNS);
            return Ok(false);
        }
        fs::write(&path, patched).with_context(|| format!("Failed to write profile {:?}", path))?;
        info!("Profile DNS set to {}", LOCAL_DNS);
        Ok(true)
    }

    /// Copy the profile to the WireGuard directory with owner-only access.
    pub fn install_profile(&self) -> Result<()> {
        let src = self.config.profile_file();
        let dest = self.config.installed_profile();
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        fs::copy(&src, &dest).with_context(|| format!("Failed to copy profile to {:?}", dest))?;
        set_mode(&dest, 0o600)?;
        info!("Installed WireGuard profile at {:?}", dest);
        Ok(())
    }

    pub fn enable_service(&self) -> Result<()> {
        if Platform::current() == Platform::Windows {
            return Ok(());
        }
        self.systemctl(&["enable", &self.service_name()])
    }

    pub fn start(&self) -> Result<()> {
        info!("Starting WARP tunnel...");
        if Platform::current() == Platform::Windows {
            let profile = self.config.installed_profile();
            let args = vec![
                "/installtunnelservice".to_string(),
                profile.to_string_lossy().to_string(),
            ];
            self.executor
                .execute("wireguard", &args)?
                .into_result("wireguard /installtunnelservice")?;
            return Ok(());
        }
        self.systemctl(&["start", &self.service_name()])
    }

    pub fn stop(&self) -> Result<()> {
        info!("Stopping WARP tunnel...");
        if Platform::current() == Platform::Windows {
            let args = args_to_strings(&["/uninstalltunnelservice", &self.config.interface]);
            self.executor
                .execute("wireguard", &args)?
                .into_result("wireguard /uninstalltunnelservice")?;
            return Ok(());
        }
        self.systemctl(&["stop", &self.service_name()])
    }

    pub fn is_running(&self) -> Result<bool> {
        if Platform::current() == Platform::Windows {
            let service = format!("WireGuardTunnel${}", self.config.interface);
            let out = self.executor.execute("sc", &args_to_strings(&["query", &service]))?;
            return Ok(out.success && out.stdout.contains("RUNNING"));
        }
        let out = self
            .executor
            .execute("systemctl", &args_to_strings(&["is-active", &self.service_name()]))?;
        Ok(out.stdout.trim() == "active")
    }

    pub fn status(&self) -> WgcfStatus {
        WgcfStatus {
            binary_installed: self.is_installed(),
            account_registered: self.config.account_file().exists(),
            profile_generated: self.config.profile_file().exists(),
            profile_installed: self.config.installed_profile().exists(),
        }
    }

    /// Stop and disable the tunnel and remove the installed profile.
    pub fn remove(&self) -> Result<()> {
        if let Err(e) = self.stop() {
            warn!("Failed to stop WARP tunnel: {:#}", e);
        }
        if Platform::current() != Platform::Windows {
            if let Err(e) = self.systemctl(&["disable", &self.service_name()]) {
                warn!("Failed to disable {}: {:#}", self.service_name(), e);
            }
        }
        let installed = self.config.installed_profile();
        if installed.exists() {
            info!("Removing {:?}...", installed);
            fs::remove_file(&installed)?;
        }
        Ok(())
    }

    fn systemctl(&self, args: &[&str]) -> Result<()> {
        let label = format!("systemctl {}", args.join(" "));
        self.executor
            .execute("systemctl", &args_to_strings(args))?
            .into_result(&label)?;
        Ok(())
    }
}

/// Write bytes to `path` and mark it executable.
pub fn write_executable(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    fs::write(path, bytes).with_context(|| format!("Failed to write {:?}", path))?;
    set_mode(path, 0o755)
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {:?}", path))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_abstraction::{failed_output, ok_output, MockCommandExecutor};
    use std::path::PathBuf;
    use tempfile::TempDir;

    const PROFILE: &str = "[Interface]\n\
PrivateKey = abc=\n\
Address = 172.16.0.2/32\n\
DNS = 1.1.1.1\n\
MTU = 1280\n\
\n\
[Peer]\n\
PublicKey = def=\n\
Endpoint = engage.cloudflareclient.com:2408\n";

    fn test_config(dir: &Path) -> WgcfConfig {
        WgcfConfig {
            work_dir: dir.join("work"),
            binary_path: dir.join("bin").join("wgcf"),
            interface: "wgcf".to_string(),
            wireguard_dir: dir.join("wireguard"),
            ..Default::default()
        }
    }

    #[test]
    fn test_patch_comments_out_cloudflare_dns() {
        let patched = patch_profile_dns(PROFILE);
        assert!(patched.contains("# DNS = 1.1.1.1\nDNS = 127.0.0.1\n"));
        assert!(patched.contains("[Peer]"));
        assert!(patched.ends_with('\n'));
    }

    #[test]
    fn test_patch_is_idempotent() {
        let once = patch_profile_dns(PROFILE);
        let twice = patch_profile_dns(&once);
        assert_eq!(once, twice);
        assert_eq!(once.matches("DNS = 127.0.0.1").count(), 1);
    }

    #[test]
    fn test_patch_multiple_dns_lines() {
        let input = "[Interface]\nDNS = 1.1.1.1\nDNS = 1.0.0.1, 2606:4700:4700::1111\n[Peer]\n";
        let patched = patch_profile_dns(input);
        assert!(patched.contains("# DNS = 1.1.1.1\n"));
        assert!(patched.contains("# DNS = 1.0.0.1, 2606:4700:4700::1111\n"));
        assert_eq!(patched.matches("\nDNS = 127.0.0.1").count(), 1);
    }

    #[test]
    fn test_patch_adds_dns_when_missing() {
        let input = "[Interface]\nPrivateKey = x\n\n[Peer]\nPublicKey = y\n";
        let patched = patch_profile_dns(input);
        assert_eq!(
            patched,
            "[Interface]\nPrivateKey = x\nDNS = 127.0.0.1\n\n[Peer]\nPublicKey = y\n"
        );
    }

    #[test]
    fn test_patch_dedupes_local_dns() {
        let input = "[Interface]\nDNS = 127.0.0.1\nDNS = 127.0.0.1\n";
        assert_eq!(patch_profile_dns(input), "[Interface]\nDNS = 127.0.0.1\n");
    }

    #[test]
    fn test_patch_ignores_peer_section() {
        let input = "[Interface]\nDNS = 127.0.0.1\n[Peer]\nDNS = 9.9.9.9\n";
        assert_eq!(patch_profile_dns(input), input);
    }

    #[test]
    fn test_patch_without_interface_is_untouched() {
        let input = "[Peer]\nPublicKey = y\n";
        assert_eq!(patch_profile_dns(input), input);
    }

    fn release() -> GithubRelease {
        let names = [
            "wgcf_2.2.22_linux_amd64",
            "wgcf_2.2.22_linux_arm64",
            "wgcf_2.2.22_linux_armv7",
            "wgcf_2.2.22_windows_amd64.exe",
            "wgcf_2.2.22_darwin_arm64",
        ];
        GithubRelease {
            tag_name: "v2.2.22".to_string(),
            assets: names
                .iter()
                .map(|n| GithubAsset {
                    name: n.to_string(),
                    browser_download_url: format!("https://example.com/{}", n),
                })
                .collect(),
        }
    }

    #[test]
    fn test_select_release_asset() {
        let rel = release();
        assert_eq!(
            select_release_asset(&rel, "linux", "amd64").unwrap().name,
            "wgcf_2.2.22_linux_amd64"
        );
        assert_eq!(
            select_release_asset(&rel, "windows", "amd64").unwrap().name,
            "wgcf_2.2.22_windows_amd64.exe"
        );
        assert!(select_release_asset(&rel, "linux", "386").is_none());
    }

    #[test]
    fn test_release_json_parsing() {
        let json = r#"{"tag_name":"v2.2.22","assets":[{"name":"wgcf_2.2.22_linux_amd64","browser_download_url":"https://x/y","size":1}]}"#;
        let rel: GithubRelease = serde_json::from_str(json).unwrap();
        assert_eq!(rel.assets.len(), 1);
    }

    #[test]
    fn test_register_skips_existing_account() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        fs::create_dir_all(&config.work_dir).unwrap();
        fs::write(config.account_file(), "account").unwrap();

        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().times(0);
        let manager = WgcfManager::new(Arc::new(mock), config);
        assert!(manager.register().is_ok());
    }

    #[test]
    fn test_register_failure_is_command_error() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());

        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|_, args| args[0] == "register" && args[1] == "--accept-tos")
            .returning(|_, _| Ok(failed_output("429 Too Many Requests", 1)));
        let manager = WgcfManager::new(Arc::new(mock), config);
        let err = manager.register().unwrap_err();
        assert!(err.to_string().contains("wgcf register"));
    }

    #[test]
    fn test_generate_requires_account() {
        let dir = TempDir::new().unwrap();
        let mock = MockCommandExecutor::new();
        let manager = WgcfManager::new(Arc::new(mock), test_config(dir.path()));
        assert!(manager.generate().is_err());
    }

    #[test]
    fn test_generate_patch_and_install_profile() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        fs::create_dir_all(&config.work_dir).unwrap();
        fs::write(config.account_file(), "account").unwrap();
        let profile_path = config.profile_file();

        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|_, args| args[0] == "generate")
            .times(1)
            .returning(move |_, _| {
                fs::write(&profile_path, PROFILE).unwrap();
                Ok(ok_output("Successfully generated WireGuard profile"))
            });
        mock.expect_execute()
            .withf(|cmd, _| cmd == "which" || cmd == "where")
            .returning(|_, _| Ok(failed_output("", 1)));
        let manager = WgcfManager::new(Arc::new(mock), config.clone());

        manager.generate().unwrap();
        assert!(manager.patch_profile().unwrap());
        assert!(!manager.patch_profile().unwrap());
        manager.install_profile().unwrap();

        let installed = fs::read_to_string(config.installed_profile()).unwrap();
        assert!(installed.contains("DNS = 127.0.0.1"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(config.installed_profile()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let status = manager.status();
        assert!(!status.binary_installed);
        assert!(status.account_registered);
        assert!(status.profile_generated);
        assert!(status.profile_installed);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_is_running_parses_systemctl() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|cmd, args| cmd == "systemctl" && args == ["is-active", "wg-quick@wgcf"])
            .returning(|_, _| Ok(ok_output("active\n")));
        let manager = WgcfManager::new(Arc::new(mock), WgcfConfig::default());
        assert!(manager.is_running().unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_start_failure_propagates() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .returning(|_, _| Ok(failed_output("Job for wg-quick@wgcf.service failed", 1)));
        let manager = WgcfManager::new(Arc::new(mock), WgcfConfig::default());
        let err = manager.start().unwrap_err();
        assert!(err.to_string().contains("systemctl start wg-quick@wgcf"));
    }

    #[test]
    fn test_service_name_follows_interface() {
        let config = WgcfConfig {
            interface: "warp0".to_string(),
            ..Default::default()
        };
        let manager = WgcfManager::new(Arc::new(MockCommandExecutor::new()), config);
        assert_eq!(manager.service_name(), "wg-quick@warp0");
    }

    #[test]
    fn test_write_executable() {
        let dir = TempDir::new().unwrap();
        let path: PathBuf = dir.path().join("bin").join("tool");
        write_executable(&path, b"#!/bin/sh\n").unwrap();
        assert!(path.exists());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn dns_line() -> impl Strategy<Value = String> {
            prop_oneof![
                Just("DNS = 1.1.1.1".to_string()),
                Just("DNS = 127.0.0.1".to_string()),
                Just("DNS=1.0.0.1, 2606:4700::1111".to_string()),
                Just("# DNS = 8.8.8.8".to_string()),
                Just("MTU = 1280".to_string()),
                Just("".to_string()),
                "[a-zA-Z]{1,8} = [a-z0-9.]{1,12}",
            ]
        }

        proptest! {
            #[test]
            fn patch_is_idempotent(
                iface in prop::collection::vec(dns_line(), 0..8),
                peer in prop::collection::vec(dns_line(), 0..4),
                trailing_newline in any::<bool>(),
            ) {
                let mut input = String::from("[Interface]\n");
                input.push_str(&iface.join("\n"));
                input.push_str("\n[Peer]\n");
                input.push_str(&peer.join("\n"));
                if trailing_newline {
                    input.push('\n');
                }

                let once = patch_profile_dns(&input);
                let twice = patch_profile_dns(&once);
                prop_assert_eq!(&once, &twice);

                let interface_part = once.split("[Peer]").next().unwrap();
                let active_local = interface_part
                    .lines()
                    .filter(|l| dns_value(l.trim()) == Some(LOCAL_DNS))
                    .count();
                prop_assert_eq!(active_local, 1);
                let other_active = interface_part
                    .lines()
                    .filter(|l| matches!(dns_value(l.trim()), Some(v) if v != LOCAL_DNS))
                    .count();
                prop_assert_eq!(other_active, 0);
            }
        }
    }
}
