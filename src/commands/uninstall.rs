//! Uninstall command implementation.

use anyhow::Result;
use std::path::Path;

use crate::lock::LockGuard;
use crate::platform;
use crate::ui::{self, Prompter};

/// Run the uninstall command
pub async fn run(config_path: &Path, yes: bool, auto: bool) -> Result<()> {
    platform::check_elevated()?;
    remove(config_path, &mut Prompter::stdio(auto || yes)).await
}

/// Confirm, then stop and remove the installed components.
pub async fn remove<R: std::io::BufRead, W: std::io::Write>(
    config_path: &Path,
    prompter: &mut Prompter<R, W>,
) -> Result<()> {
    if !prompter.confirm(
        "Remove the WARP profile, NextDNS and the auto-start service?",
        false,
    )? {
        prompter.print("Aborted.")?;
        return Ok(());
    }

    let _lock = LockGuard::acquire()?;
    let manager = super::build_manager(config_path)?;
    manager.stop();
    manager.uninstall()?;

    ui::success("Uninstalled. Configuration and backups were kept.");
    Ok(())
}
