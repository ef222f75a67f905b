//! Setup command implementation.

use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

use crate::cmd_abstraction::RealCommandExecutor;
use crate::config::{is_valid_profile_id, SecureString};
use crate::fetcher::Fetcher;
use crate::lock::LockGuard;
use crate::manager::resolve_profile;
use crate::platform;
use crate::ui::{self, Prompter};

/// Run the setup command
pub async fn run(config_path: &Path, auto: bool) -> Result<()> {
    // Elevate before locking or touching the config: the elevated child
    // takes the lock itself and must read the same config file.
    let args: Vec<String> = std::env::args().skip(1).collect();
    platform::ensure_elevated(
        &RealCommandExecutor::new(),
        &platform::config_forward_args(&args, config_path),
    )?;

    install(config_path, &mut Prompter::stdio(auto)).await
}

/// Install and start everything once the process is elevated.
pub async fn install<R: std::io::BufRead, W: std::io::Write>(
    config_path: &Path,
    prompter: &mut Prompter<R, W>,
) -> Result<()> {
    let _lock = LockGuard::acquire()?;
    let mut manager = super::build_manager(config_path)?;

    let profile = match resolve_profile(manager.config(), prompter.is_auto()) {
        Some(p) => Some(p),
        None => prompt_profile(prompter)?,
    };

    if let Some(ref id) = profile {
        if manager.config().nextdns.get_profile_id().is_empty() {
            let mut config = manager.config().clone();
            config.nextdns.profile_id = SecureString::from(id.as_str());
            config.save(config_path)?;
            manager = super::build_manager(config_path)?;
            info!("Saved NextDNS profile to {}", config_path.display());
        }
    }

    print!("{}", ui::banner("WARP + NEXTDNS SETUP"));
    let fetcher = Fetcher::new()?;
    manager.setup(&fetcher, profile.as_deref()).await?;

    if manager.verify_connection().await {
        ui::success("WARP and NextDNS are running");
    } else {
        warn!("Services started but the connection could not be verified");
        ui::warning("Run 'warp-nextdns test' for details");
    }
    Ok(())
}

/// Ask for a NextDNS profile id until a valid one or nothing is given.
pub fn prompt_profile<R: std::io::BufRead, W: std::io::Write>(
    prompter: &mut Prompter<R, W>,
) -> Result<Option<String>> {
    if prompter.is_auto() {
        return Ok(None);
    }
    loop {
        match prompter.ask("NextDNS profile ID (empty to skip)")? {
            None => return Ok(None),
            Some(id) if is_valid_profile_id(&id) => return Ok(Some(id)),
            Some(id) => prompter.print(&format!("Invalid profile ID: {}", id))?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_prompt_profile_retries_invalid() {
        let mut p = Prompter::new(Cursor::new(b"bad id!\nabc123\n".to_vec()), Vec::new(), false);
        assert_eq!(prompt_profile(&mut p).unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn test_prompt_profile_skip() {
        let mut p = Prompter::new(Cursor::new(b"\n".to_vec()), Vec::new(), false);
        assert_eq!(prompt_profile(&mut p).unwrap(), None);
        let mut auto = Prompter::new(Cursor::new(Vec::new()), Vec::new(), true);
        assert_eq!(prompt_profile(&mut auto).unwrap(), None);
    }
}
