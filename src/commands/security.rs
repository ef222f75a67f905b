//! Security command implementation.

use anyhow::Result;
use std::path::Path;

use crate::cli::SecurityAction;
use crate::security::{self, SecurityManager};
use crate::ui;

/// Run a security subcommand
pub async fn run(action: SecurityAction, config_path: &Path) -> Result<()> {
    let manager = super::build_manager(config_path)?;

    match action {
        SecurityAction::Report => {
            let security = SecurityManager::load(&manager.config().security)?;
            print!("{}", ui::render_security_report(&security.report()));
        }
        SecurityAction::Encrypt { text } => {
            let security = SecurityManager::load(&manager.config().security)?;
            println!("{}", security.encrypt(&text)?);
        }
        SecurityAction::Decrypt { text } => {
            let security = SecurityManager::load(&manager.config().security)?;
            println!("{}", security.decrypt(&text)?);
        }
        SecurityAction::Audit { file } => {
            let audit = security::audit_config_file(&file);
            print!("{}", ui::section(&format!("AUDIT {}", file.display())));
            if audit.issues.is_empty() {
                ui::success("No issues found");
            }
            for issue in &audit.issues {
                ui::warning(issue);
            }
            for rec in &audit.recommendations {
                println!("  - {}", rec);
            }
            if !audit.valid {
                anyhow::bail!("{} issue(s) found in {}", audit.issues.len(), file.display());
            }
        }
        SecurityAction::Secure { file, keys } => {
            let security = SecurityManager::load(&manager.config().security)?;
            if security.secure_config_file(&file, &keys)? {
                ui::success(&format!("Secured {}", file.display()));
            } else {
                println!("Nothing to encrypt in {}", file.display());
            }
        }
        SecurityAction::Hash { password, salt } => {
            let (hash, salt) = security::hash_password(&password, salt.as_deref())?;
            println!("hash: {}", hash);
            println!("salt: {}", salt);
        }
        SecurityAction::Token { bytes } => {
            println!("{}", security::generate_token(bytes));
        }
        SecurityAction::Cleanup { days } => {
            let security = SecurityManager::load(&manager.config().security)?;
            let removed = security.cleanup_old_files(days)?;
            println!("Removed {} file(s) older than {} days", removed.len(), days);
        }
    }
    Ok(())
}
