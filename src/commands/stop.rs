//! Stop command implementation.

use anyhow::Result;
use std::path::Path;

use crate::lock::LockGuard;
use crate::platform;
use crate::ui;

/// Run the stop command
pub async fn run(config_path: &Path) -> Result<()> {
    platform::check_elevated()?;
    let _lock = LockGuard::acquire()?;
    let manager = super::build_manager(config_path)?;

    manager.stop();
    ui::success("WARP and NextDNS stopped");
    Ok(())
}
