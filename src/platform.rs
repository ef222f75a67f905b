//! Host platform detection: OS, CPU architecture, privileges and package manager.

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::cmd_abstraction::{args_to_strings, CommandExecutor};
use crate::error::WarpError;

/// Operating systems this tool knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
    MacOs,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => Platform::Linux,
            "windows" => Platform::Windows,
            "macos" => Platform::MacOs,
            _ => Platform::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::MacOs => "macos",
            Platform::Other => "unknown",
        }
    }

    /// Linux and Windows are supported. macOS has no WireGuard service
    /// integration here.
    pub fn is_supported(&self) -> bool {
        matches!(self, Platform::Linux | Platform::Windows)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Linux => "Linux",
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Other => "Unknown",
        };
        f.write_str(name)
    }
}

/// Returns true when the process runs with root / Administrator rights.
///
/// Never fails: any probe error is reported as "not elevated".
#[cfg(unix)]
pub fn is_elevated() -> bool {
    // SAFETY: geteuid() is always safe to call; it has no preconditions
    // and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(windows)]
pub fn is_elevated() -> bool {
    // `net session` only succeeds from an elevated shell.
    std::process::Command::new("net")
        .arg("session")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(any(unix, windows)))]
pub fn is_elevated() -> bool {
    false
}

/// Fail with a permission error unless elevated.
pub fn check_elevated() -> Result<()> {
    if !is_elevated() {
        let hint = match Platform::current() {
            Platform::Windows => "run from an Administrator shell",
            _ => "run with sudo",
        };
        return Err(WarpError::Permission(format!("this command needs elevated privileges ({})", hint)).into());
    }
    Ok(())
}

/// Program and arguments used to re-run the current invocation elevated.
///
/// `sudo -A` when an askpass helper is configured, `pkexec` when available,
/// plain `sudo` otherwise.
pub fn elevation_command(
    askpass_set: bool,
    pkexec_available: bool,
    exe: &str,
    args: &[String],
) -> (String, Vec<String>) {
    let mut full = Vec::with_capacity(args.len() + 2);
    let program = if askpass_set {
        full.push("-A".to_string());
        "sudo"
    } else if pkexec_available {
        "pkexec"
    } else {
        "sudo"
    };
    full.push(exe.to_string());
    full.extend(args.iter().cloned());
    (program.to_string(), full)
}

/// Fail on unsupported platforms; otherwise return when already elevated
/// or re-run this invocation elevated (with `extra_args` appended).
pub fn ensure_elevated(executor: &dyn CommandExecutor, extra_args: &[String]) -> Result<()> {
    let current = Platform::current();
    if !current.is_supported() {
        return Err(WarpError::UnsupportedPlatform(current.to_string()).into());
    }
    if is_elevated() {
        return Ok(());
    }
    reexec_elevated(executor, extra_args)
}

/// `--config <path>` to pin the resolved config file across a re-exec,
/// unless `args` already name one. sudo and pkexec may reset `HOME`.
pub fn config_forward_args(args: &[String], config_path: &Path) -> Vec<String> {
    let given = args.iter().any(|a| {
        a == "--config" || a.starts_with("--config=") || (a.starts_with("-c") && !a.starts_with("--"))
    });
    if given {
        Vec::new()
    } else {
        vec!["--config".to_string(), config_path.to_string_lossy().to_string()]
    }
}

/// Re-execute this process with elevated privileges and exit with the
/// child's status. Returns only on failure to launch.
pub fn reexec_elevated(executor: &dyn CommandExecutor, extra_args: &[String]) -> Result<()> {
    if Platform::current() == Platform::Windows {
        return Err(WarpError::Permission(
            "administrator rights required; restart the terminal with 'Run as administrator'"
                .to_string(),
        )
        .into());
    }

    let exe = std::env::current_exe()?;
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    args.extend(extra_args.iter().cloned());
    let askpass = std::env::var_os("SUDO_ASKPASS").is_some();
    let pkexec = command_exists(executor, "pkexec");
    let (program, full_args) = elevation_command(askpass, pkexec, &exe.to_string_lossy(), &args);

    info!("Requesting elevated privileges via {}...", program);
    let status = std::process::Command::new(&program)
        .args(&full_args)
        .status()
        .map_err(|e| WarpError::Permission(format!("failed to launch {}: {}", program, e)))?;

    std::process::exit(status.code().unwrap_or(1));
}

/// Check whether `name` resolves on PATH.
pub fn command_exists(executor: &dyn CommandExecutor, name: &str) -> bool {
    let finder = if Platform::current() == Platform::Windows {
        "where"
    } else {
        "which"
    };
    match executor.execute(finder, &args_to_strings(&[name])) {
        Ok(out) => out.success && !out.stdout.trim().is_empty(),
        Err(e) => {
            debug!("{} {} failed: {}", finder, name, e);
            false
        }
    }
}

/// Linux package managers with a known WireGuard install recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Pacman,
    Zypper,
}

impl PackageManager {
    const ALL: [PackageManager; 5] = [
        PackageManager::Apt,
        PackageManager::Dnf,
        PackageManager::Yum,
        PackageManager::Pacman,
        PackageManager::Zypper,
    ];

    pub fn binary(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Pacman => "pacman",
            PackageManager::Zypper => "zypper",
        }
    }

    /// First package manager found on PATH.
    pub fn detect(executor: &dyn CommandExecutor) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|pm| command_exists(executor, pm.binary()))
    }

    /// Packages providing wg-quick, curl and dig on this distribution family.
    pub fn wireguard_packages(&self) -> &'static [&'static str] {
        match self {
            PackageManager::Apt => &["wireguard", "wireguard-tools", "curl", "dnsutils"],
            PackageManager::Dnf | PackageManager::Yum | PackageManager::Zypper => {
                &["wireguard-tools", "curl", "bind-utils"]
            }
            PackageManager::Pacman => &["wireguard-tools", "curl", "bind"],
        }
    }

    /// Commands (program, args) that install `packages` non-interactively.
    pub fn install_commands(&self, packages: &[&str]) -> Vec<(String, Vec<String>)> {
        let mut install: Vec<String> = match self {
            PackageManager::Apt => args_to_strings(&["install", "-y"]),
            PackageManager::Dnf | PackageManager::Yum => args_to_strings(&["install", "-y"]),
            PackageManager::Pacman => args_to_strings(&["-Sy", "--noconfirm"]),
            PackageManager::Zypper => args_to_strings(&["--non-interactive", "install"]),
        };
        install.extend(packages.iter().map(|p| p.to_string()));

        let mut cmds = Vec::new();
        if *self == PackageManager::Apt {
            cmds.push((self.binary().to_string(), args_to_strings(&["update"])));
        }
        cmds.push((self.binary().to_string(), install));
        cmds
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// Map a `uname -m` style machine name to the release asset architecture
/// used by wgcf and nextdns builds.
pub fn release_arch(machine: &str) -> Option<&'static str> {
    match machine.trim().to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" | "x64" => Some("amd64"),
        "aarch64" | "arm64" => Some("arm64"),
        "armv7l" | "armv7" | "arm" => Some("armv7"),
        "armv6l" | "armv6" => Some("armv6"),
        "i386" | "i686" | "x86" => Some("386"),
        _ => None,
    }
}

/// Machine architecture as reported by the OS, falling back to the
/// architecture this binary was compiled for.
pub fn machine_arch(executor: &dyn CommandExecutor) -> String {
    if Platform::current() != Platform::Windows {
        if let Ok(out) = executor.execute("uname", &args_to_strings(&["-m"])) {
            if out.success && !out.stdout.trim().is_empty() {
                return out.stdout.trim().to_string();
            }
        }
    }
    std::env::consts::ARCH.to_string()
}

/// Snapshot of the host for the `version` and `status` screens.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub platform: Platform,
    pub os_family: String,
    pub arch: String,
    pub hostname: String,
    pub elevated: bool,
    pub package_manager: Option<PackageManager>,
}

impl SystemInfo {
    pub fn collect(executor: &dyn CommandExecutor) -> Self {
        let platform = Platform::current();
        if platform == Platform::MacOs {
            warn!("macOS is not supported; WireGuard service management is unavailable");
        }
        let hostname = executor
            .execute("hostname", &[])
            .ok()
            .filter(|o| o.success)
            .map(|o| o.stdout.trim().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let package_manager = if platform == Platform::Linux {
            PackageManager::detect(executor)
        } else {
            None
        };

        Self {
            platform,
            os_family: std::env::consts::FAMILY.to_string(),
            arch: machine_arch(executor),
            hostname,
            elevated: is_elevated(),
            package_manager,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_abstraction::{failed_output, ok_output, MockCommandExecutor};

    #[test]
    fn test_config_forward_args() {
        let path = Path::new("/home/u/.warp-nextdns/config.yaml");
        assert_eq!(
            config_forward_args(&args_to_strings(&["setup", "--auto"]), path),
            args_to_strings(&["--config", "/home/u/.warp-nextdns/config.yaml"])
        );
        for given in [
            &["-c", "x.yaml", "setup"][..],
            &["setup", "--config", "x.yaml"][..],
            &["setup", "--config=x.yaml"][..],
            &["-cx.yaml", "setup"][..],
        ] {
            assert!(config_forward_args(&args_to_strings(given), path).is_empty());
        }
    }

    #[test]
    fn test_is_elevated_returns_bool() {
        let first = is_elevated();
        let second = is_elevated();
        assert_eq!(first, second);
    }

    #[test]
    fn test_platform_current_is_known_on_ci_targets() {
        let p = Platform::current();
        if cfg!(target_os = "linux") {
            assert_eq!(p, Platform::Linux);
            assert!(p.is_supported());
        }
        assert!(!p.as_str().is_empty());
    }

    #[test]
    fn test_macos_unsupported() {
        assert!(!Platform::MacOs.is_supported());
        assert_eq!(Platform::MacOs.to_string(), "macOS");
    }

    #[test]
    fn test_release_arch_mapping() {
        assert_eq!(release_arch("x86_64"), Some("amd64"));
        assert_eq!(release_arch("AMD64"), Some("amd64"));
        assert_eq!(release_arch("aarch64"), Some("arm64"));
        assert_eq!(release_arch("armv7l"), Some("armv7"));
        assert_eq!(release_arch("armv6l"), Some("armv6"));
        assert_eq!(release_arch("i686"), Some("386"));
        assert_eq!(release_arch("riscv64"), None);
    }

    #[test]
    fn test_elevation_command_askpass() {
        let args = vec!["setup".to_string()];
        let (prog, full) = elevation_command(true, true, "/usr/bin/warp-nextdns", &args);
        assert_eq!(prog, "sudo");
        assert_eq!(full, vec!["-A", "/usr/bin/warp-nextdns", "setup"]);
    }

    #[test]
    fn test_elevation_command_pkexec() {
        let (prog, full) = elevation_command(false, true, "/bin/x", &[]);
        assert_eq!(prog, "pkexec");
        assert_eq!(full, vec!["/bin/x"]);
    }

    #[test]
    fn test_elevation_command_plain_sudo() {
        let (prog, full) = elevation_command(false, false, "/bin/x", &["start".to_string()]);
        assert_eq!(prog, "sudo");
        assert_eq!(full, vec!["/bin/x", "start"]);
    }

    #[test]
    fn test_command_exists_uses_finder() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|_, args| args == ["wgcf".to_string()])
            .returning(|_, _| Ok(ok_output("/usr/local/bin/wgcf\n")));
        mock.expect_execute()
            .withf(|_, args| args == ["nextdns".to_string()])
            .returning(|_, _| Ok(failed_output("", 1)));

        assert!(command_exists(&mock, "wgcf"));
        assert!(!command_exists(&mock, "nextdns"));
    }

    #[test]
    fn test_package_manager_detect_prefers_apt() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().returning(|_, args| {
            if args[0] == "apt-get" || args[0] == "dnf" {
                Ok(ok_output("/usr/bin/x"))
            } else {
                Ok(failed_output("", 1))
            }
        });
        assert_eq!(PackageManager::detect(&mock), Some(PackageManager::Apt));
    }

    #[test]
    fn test_package_manager_detect_none() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().returning(|_, _| Ok(failed_output("", 1)));
        assert_eq!(PackageManager::detect(&mock), None);
    }

    #[test]
    fn test_apt_install_runs_update_first() {
        let cmds = PackageManager::Apt.install_commands(PackageManager::Apt.wireguard_packages());
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].1, vec!["update"]);
        assert!(cmds[1].1.contains(&"wireguard-tools".to_string()));
        assert!(cmds[1].1.contains(&"-y".to_string()));
    }

    #[test]
    fn test_pacman_install_args() {
        let cmds = PackageManager::Pacman.install_commands(&["wireguard-tools"]);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].0, "pacman");
        assert_eq!(cmds[0].1, vec!["-Sy", "--noconfirm", "wireguard-tools"]);
    }

    #[test]
    fn test_system_info_collect() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().returning(|cmd, _| match cmd {
            "hostname" => Ok(ok_output("box\n")),
            "uname" => Ok(ok_output("x86_64\n")),
            _ => Ok(failed_output("", 1)),
        });
        let info = SystemInfo::collect(&mock);
        assert_eq!(info.hostname, "box");
        if cfg!(target_os = "linux") {
            assert_eq!(info.arch, "x86_64");
            assert!(info.package_manager.is_none());
        }
    }
}
