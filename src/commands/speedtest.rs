//! Speedtest command implementation.

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::monitor::{current_location, run_speed_test};
use crate::ui;

/// Run the speedtest command
pub async fn run(config_path: &Path) -> Result<()> {
    let manager = super::build_manager(config_path)?;

    info!("Running speed test, this takes a few seconds...");
    let result = run_speed_test(manager.probe(), &manager.config().monitor.ping_targets).await?;
    print!("{}", ui::render_speed(&result));

    match current_location().await {
        Ok((ip, loc)) => println!(
            " Exit IP:  {} ({}, {}) via {}",
            ip,
            loc.city.as_deref().unwrap_or("?"),
            loc.country.as_deref().unwrap_or("?"),
            loc.isp.as_deref().unwrap_or("?")
        ),
        Err(e) => tracing::debug!("Location lookup failed: {:#}", e),
    }
    Ok(())
}
