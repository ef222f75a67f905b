//! Monitor command implementation: a live status view redrawn until
//! Ctrl-C.

use anyhow::Result;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

use crate::monitor::NetworkMonitor;
use crate::signal;
use crate::ui;

const CLEAR_SCREEN: &str = "\x1B[2J\x1B[H";

/// Run the monitor command
pub async fn run(config_path: &Path, refresh: Option<u64>, metrics: bool) -> Result<()> {
    let manager = super::build_manager(config_path)?;
    let refresh = Duration::from_secs(refresh.unwrap_or(manager.config().monitor.refresh_secs).max(1));

    let mut monitor = NetworkMonitor::new(
        manager.probe().clone(),
        manager.connectivity(),
        manager.config().monitor.clone(),
    );
    if metrics {
        monitor.start();
    }

    while !signal::is_shutdown_requested() {
        let report = manager.get_status().await;
        print!("{}", CLEAR_SCREEN);
        print!("{}", ui::render_status(&report));
        if let Some(latest) = monitor.latest() {
            println!();
            print!("{}", ui::render_metrics(&latest));
        } else if metrics {
            println!("\n Collecting network metrics...");
        }
        println!("\n Refreshing every {}s. Press Ctrl-C to exit.", refresh.as_secs());

        let deadline = Instant::now() + refresh;
        while !signal::is_shutdown_requested() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    monitor.stop().await;
    info!("Monitor stopped");
    Ok(())
}
