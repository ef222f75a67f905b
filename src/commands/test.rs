//! Test command implementation.

use anyhow::Result;
use std::path::Path;

use crate::fetcher::Fetcher;
use crate::ui;

/// Run the connection tests. Fails when any test fails.
pub async fn run(config_path: &Path) -> Result<()> {
    let manager = super::build_manager(config_path)?;
    let fetcher = Fetcher::new()?;

    let results = manager.run_tests(&fetcher).await;
    print!("{}", ui::render_tests(&results));

    let failed = results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        anyhow::bail!("{} of {} connection tests failed", failed, results.len());
    }
    Ok(())
}
