//! Restart command implementation.

use anyhow::Result;
use std::path::Path;

use crate::lock::LockGuard;
use crate::platform;
use crate::ui;

/// Run the restart command
pub async fn run(config_path: &Path) -> Result<()> {
    platform::check_elevated()?;
    let _lock = LockGuard::acquire()?;
    let manager = super::build_manager(config_path)?;

    manager.restart().await?;
    if manager.verify_connection().await {
        ui::success("WARP and NextDNS restarted");
    } else {
        ui::warning("Services restarted but the connection could not be verified");
    }
    Ok(())
}
