//! Backup command implementation.

use anyhow::Result;
use std::path::Path;

use crate::backup::CreateOptions;
use crate::cli::BackupAction;
use crate::lock::LockGuard;
use crate::ui;

/// Run a backup subcommand
pub async fn run(action: BackupAction, config_path: &Path) -> Result<()> {
    let manager = super::build_manager(config_path)?;
    let backups = manager.backup_manager();

    match action {
        BackupAction::Create {
            description,
            no_logs,
            no_security,
        } => {
            let options = CreateOptions {
                description,
                include_logs: no_logs.then_some(false),
                include_security: no_security.then_some(false),
            };
            let (path, metadata) = backups.create(&options)?;
            ui::success(&format!(
                "Backup created: {} ({} files)",
                path.display(),
                metadata.files.len()
            ));
        }
        BackupAction::List => {
            print!("{}", ui::banner("BACKUPS"));
            print!("{}", ui::render_backups(&backups.list()?));
        }
        BackupAction::Restore { archive, target } => {
            let _lock = LockGuard::acquire()?;
            let result = backups.restore(&backups.resolve(&archive), target.as_deref())?;
            ui::success(&format!(
                "Restored {} files to {}",
                result.restored_files.len(),
                result.target.display()
            ));
        }
        BackupAction::Verify { archive } => {
            let report = backups.verify(&backups.resolve(&archive));
            if report.valid {
                ui::success(&format!("Archive is valid ({} entries)", report.file_count));
            } else {
                anyhow::bail!(
                    "Archive is invalid: {}",
                    report.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
        }
        BackupAction::Delete { archive } => {
            let path = backups.resolve(&archive);
            if backups.delete(&path)? {
                ui::success(&format!("Deleted {}", path.display()));
            } else {
                ui::warning(&format!("No such backup: {}", path.display()));
            }
        }
        BackupAction::Stats => {
            print!("{}", ui::render_backup_stats(&backups.stats()?));
        }
    }
    Ok(())
}
