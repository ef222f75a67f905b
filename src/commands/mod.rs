//! CLI command implementations.

pub mod backup;
pub mod interactive;
pub mod logs;
pub mod monitor;
pub mod restart;
pub mod security;
pub mod setup;
pub mod speedtest;
pub mod start;
pub mod status;
pub mod stop;
pub mod test;
pub mod uninstall;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::cmd_abstraction::RealCommandExecutor;
use crate::config::Config;
use crate::manager::WarpNextDnsManager;
use crate::network::HttpConnectivity;

/// Load (or create) the configuration and wire a manager to the real
/// system.
pub fn build_manager(config_path: &Path) -> Result<WarpNextDnsManager> {
    let config = Config::load_or_init(config_path)?;
    Ok(WarpNextDnsManager::new(
        config,
        config_path.to_path_buf(),
        Arc::new(RealCommandExecutor::new()),
        Arc::new(HttpConnectivity::new()?),
    ))
}
