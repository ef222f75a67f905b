//! Interactive command implementation: a numbered menu over the other
//! operations.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::path::Path;

use crate::backup::CreateOptions;
use crate::config::{Config, SecureString};
use crate::fetcher::Fetcher;
use crate::lock::LockGuard;
use crate::manager::WarpNextDnsManager;
use crate::monitor::{run_speed_test, NetworkMonitor};
use crate::platform;
use crate::security::SecurityManager;
use crate::signal;
use crate::ui::{self, Prompter};

const LOG_LINES: usize = 50;
const MASKED_PROFILE: &str = "********";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    Status,
    Setup,
    Start,
    Stop,
    Restart,
    Test,
    Health,
    SpeedTest,
    Monitor,
    Logs,
    CreateBackup,
    ListBackups,
    RestoreBackup,
    SecurityReport,
    ViewConfig,
    EditConfig,
    ResetConfig,
    Uninstall,
    Exit,
}

impl MenuItem {
    pub const ALL: [MenuItem; 19] = [
        MenuItem::Status,
        MenuItem::Setup,
        MenuItem::Start,
        MenuItem::Stop,
        MenuItem::Restart,
        MenuItem::Test,
        MenuItem::Health,
        MenuItem::SpeedTest,
        MenuItem::Monitor,
        MenuItem::Logs,
        MenuItem::CreateBackup,
        MenuItem::ListBackups,
        MenuItem::RestoreBackup,
        MenuItem::SecurityReport,
        MenuItem::ViewConfig,
        MenuItem::EditConfig,
        MenuItem::ResetConfig,
        MenuItem::Uninstall,
        MenuItem::Exit,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MenuItem::Status => "Show status",
            MenuItem::Setup => "Run installation",
            MenuItem::Start => "Start services",
            MenuItem::Stop => "Stop services",
            MenuItem::Restart => "Restart services",
            MenuItem::Test => "Run connection tests",
            MenuItem::Health => "Network health report",
            MenuItem::SpeedTest => "Speed test",
            MenuItem::Monitor => "Live monitor (Ctrl-C to leave)",
            MenuItem::Logs => "View logs",
            MenuItem::CreateBackup => "Create backup",
            MenuItem::ListBackups => "List backups",
            MenuItem::RestoreBackup => "Restore backup",
            MenuItem::SecurityReport => "Security report",
            MenuItem::ViewConfig => "View configuration",
            MenuItem::EditConfig => "Edit NextDNS profile",
            MenuItem::ResetConfig => "Reset configuration",
            MenuItem::Uninstall => "Uninstall",
            MenuItem::Exit => "Exit",
        }
    }

    /// Items after which the manager is rebuilt from the config file.
    fn reloads_config(&self) -> bool {
        matches!(
            self,
            MenuItem::Setup | MenuItem::EditConfig | MenuItem::ResetConfig | MenuItem::RestoreBackup
        )
    }
}

/// Run the interactive menu
pub async fn run(config_path: &Path) -> Result<()> {
    let mut manager = super::build_manager(config_path)?;
    let mut prompter = Prompter::stdio(false);
    let labels: Vec<&str> = MenuItem::ALL.iter().map(MenuItem::label).collect();

    while !signal::is_shutdown_requested() {
        let Some(index) = prompter.choose("WARP + NEXTDNS MANAGER", &labels)? else {
            break;
        };
        let item = MenuItem::ALL[index];
        if item == MenuItem::Exit {
            break;
        }
        if let Err(e) = perform(&manager, config_path, &mut prompter, item).await {
            ui::failure(&format!("{:#}", e));
        }
        if item.reloads_config() {
            manager = super::build_manager(config_path)?;
        }
        prompter.pause()?;
    }
    Ok(())
}

async fn perform<R: BufRead, W: Write>(
    manager: &WarpNextDnsManager,
    config_path: &Path,
    prompter: &mut Prompter<R, W>,
    item: MenuItem,
) -> Result<()> {
    match item {
        MenuItem::Status => print!("{}", ui::render_status(&manager.get_status().await)),
        MenuItem::Setup => {
            platform::check_elevated()?;
            if prompter.confirm("Install and start WARP with NextDNS?", true)? {
                super::setup::install(config_path, prompter).await?;
            }
        }
        MenuItem::Start => {
            let _lock = LockGuard::acquire()?;
            manager.start()?;
            ui::success("Services started");
        }
        MenuItem::Stop => {
            let _lock = LockGuard::acquire()?;
            manager.stop();
            ui::success("Services stopped");
        }
        MenuItem::Restart => {
            let _lock = LockGuard::acquire()?;
            manager.restart().await?;
            ui::success("Services restarted");
        }
        MenuItem::Test => {
            let fetcher = Fetcher::new()?;
            print!("{}", ui::render_tests(&manager.run_tests(&fetcher).await));
        }
        MenuItem::Health => {
            let monitor = NetworkMonitor::new(
                manager.probe().clone(),
                manager.connectivity(),
                manager.config().monitor.clone(),
            );
            print!("{}", ui::render_health(&monitor.health_report().await));
        }
        MenuItem::SpeedTest => {
            let result =
                run_speed_test(manager.probe(), &manager.config().monitor.ping_targets).await?;
            print!("{}", ui::render_speed(&result));
        }
        MenuItem::Monitor => super::monitor::run(config_path, None, true).await?,
        MenuItem::Logs => super::logs::run(config_path, LOG_LINES, false, false, false).await?,
        MenuItem::CreateBackup => {
            let (path, _) = manager.backup_manager().create(&CreateOptions {
                description: "interactive".to_string(),
                ..Default::default()
            })?;
            ui::success(&format!("Backup created: {}", path.display()));
        }
        MenuItem::ListBackups => print!("{}", ui::render_backups(&manager.backup_manager().list()?)),
        MenuItem::RestoreBackup => restore_backup(manager, prompter)?,
        MenuItem::SecurityReport => {
            let security = SecurityManager::load(&manager.config().security)?;
            print!("{}", ui::render_security_report(&security.report()));
        }
        MenuItem::ViewConfig => prompter.print(&render_config(manager.config())?)?,
        MenuItem::EditConfig => {
            if edit_profile(config_path, prompter)? {
                ui::success("NextDNS profile saved. Restart services to apply it.");
            }
        }
        MenuItem::ResetConfig => {
            if reset_config(config_path, prompter)? {
                ui::success(&format!("Configuration reset: {}", config_path.display()));
            }
        }
        MenuItem::Uninstall => {
            platform::check_elevated()?;
            super::uninstall::remove(config_path, prompter).await?;
        }
        MenuItem::Exit => {}
    }
    Ok(())
}

/// Pick an archive from the backup directory and restore it in place.
fn restore_backup<R: BufRead, W: Write>(
    manager: &WarpNextDnsManager,
    prompter: &mut Prompter<R, W>,
) -> Result<()> {
    let backups = manager.backup_manager();
    let list = backups.list()?;
    if list.is_empty() {
        return prompter.print("No backups found.");
    }

    let mut options: Vec<&str> = list.iter().map(|b| b.filename.as_str()).collect();
    options.push("Cancel");
    let Some(index) = prompter.choose("RESTORE BACKUP", &options)? else {
        return Ok(());
    };
    let Some(info) = list.get(index) else {
        return Ok(());
    };
    if !prompter.confirm(&format!("Restore {}?", info.filename), false)? {
        return prompter.print("Aborted.");
    }

    let _lock = LockGuard::acquire()?;
    let result = backups.restore(&info.path, None)?;
    ui::success(&format!(
        "Restored {} files to {}",
        result.restored_files.len(),
        result.target.display()
    ));
    Ok(())
}

/// YAML view of the configuration with the profile id masked.
fn render_config(config: &Config) -> Result<String> {
    let mut shown = config.clone();
    if !shown.nextdns.profile_id.is_empty() {
        shown.nextdns.profile_id = SecureString::from(MASKED_PROFILE);
    }
    serde_yaml::to_string(&shown).context("Failed to serialize config")
}

/// Ask for a new NextDNS profile id and save it. `false` when skipped.
fn edit_profile<R: BufRead, W: Write>(config_path: &Path, prompter: &mut Prompter<R, W>) -> Result<bool> {
    let Some(id) = super::setup::prompt_profile(prompter)? else {
        return Ok(false);
    };
    let mut config = Config::load_or_init(config_path)?;
    config.nextdns.profile_id = SecureString::from(id);
    config.save(config_path)?;
    Ok(true)
}

/// Overwrite the config file with defaults after confirmation.
fn reset_config<R: BufRead, W: Write>(config_path: &Path, prompter: &mut Prompter<R, W>) -> Result<bool> {
    if !prompter.confirm("Reset the configuration to defaults?", false)? {
        return Ok(false);
    }
    Config::default().save(config_path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_menu_ends_with_exit() {
        assert_eq!(MenuItem::ALL.last(), Some(&MenuItem::Exit));
    }

    #[test]
    fn test_menu_labels_unique() {
        let mut labels: Vec<&str> = MenuItem::ALL.iter().map(MenuItem::label).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), MenuItem::ALL.len());
    }

    #[test]
    fn test_config_changing_items_reload() {
        assert!(MenuItem::EditConfig.reloads_config());
        assert!(MenuItem::ResetConfig.reloads_config());
        assert!(MenuItem::Setup.reloads_config());
        assert!(!MenuItem::Status.reloads_config());
        assert!(!MenuItem::ViewConfig.reloads_config());
    }

    #[test]
    fn test_render_config_masks_profile() {
        let mut config = Config::default();
        config.nextdns.profile_id = SecureString::from("abc123");

        let yaml = render_config(&config).unwrap();
        assert!(!yaml.contains("abc123"));
        assert!(yaml.contains(MASKED_PROFILE));
        assert!(yaml.contains("interface: wgcf"));
        // the caller's config is untouched
        assert_eq!(config.nextdns.profile_id.as_str(), "abc123");
    }

    #[test]
    fn test_render_config_empty_profile_not_masked() {
        let yaml = render_config(&Config::default()).unwrap();
        assert!(!yaml.contains(MASKED_PROFILE));
    }

    #[test]
    fn test_edit_profile_saves_valid_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        Config::default().save(&path).unwrap();

        let mut p = Prompter::new(Cursor::new(b"bad id!\nxyz789\n".to_vec()), Vec::new(), false);
        assert!(edit_profile(&path, &mut p).unwrap());
        assert_eq!(Config::load(&path).unwrap().nextdns.profile_id.as_str(), "xyz789");
    }

    #[test]
    fn test_edit_profile_skip_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = Config::default();
        config.nextdns.profile_id = SecureString::from("abc123");
        config.save(&path).unwrap();

        let mut p = Prompter::new(Cursor::new(b"\n".to_vec()), Vec::new(), false);
        assert!(!edit_profile(&path, &mut p).unwrap());
        assert_eq!(Config::load(&path).unwrap().nextdns.profile_id.as_str(), "abc123");
    }

    #[test]
    fn test_reset_config_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = Config::default();
        config.nextdns.profile_id = SecureString::from("abc123");
        config.backup.max_backups = 3;
        config.save(&path).unwrap();

        let mut declined = Prompter::new(Cursor::new(b"\n".to_vec()), Vec::new(), false);
        assert!(!reset_config(&path, &mut declined).unwrap());
        assert_eq!(Config::load(&path).unwrap().backup.max_backups, 3);

        let mut accepted = Prompter::new(Cursor::new(b"y\n".to_vec()), Vec::new(), false);
        assert!(reset_config(&path, &mut accepted).unwrap());
        let reset = Config::load(&path).unwrap();
        assert!(reset.nextdns.profile_id.is_empty());
        assert_eq!(reset.backup.max_backups, Config::default().backup.max_backups);
    }
}
