//! Start command implementation.

use anyhow::Result;
use std::path::Path;

use crate::lock::LockGuard;
use crate::platform;
use crate::ui;

/// Run the start command
pub async fn run(config_path: &Path) -> Result<()> {
    platform::check_elevated()?;
    let _lock = LockGuard::acquire()?;
    let manager = super::build_manager(config_path)?;

    manager.start()?;
    if manager.verify_connection().await {
        ui::success("WARP and NextDNS started");
    } else {
        ui::warning("Services started but the connection could not be verified");
    }
    Ok(())
}
