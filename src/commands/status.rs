//! Status command implementation.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::manager::StatusReport;
use crate::nextdns::NextDnsStatus;
use crate::ui;
use crate::wgcf::WgcfStatus;

/// `status --json` document: the component table plus per-tool detail.
#[derive(Debug, Serialize)]
pub struct StatusDocument<'a> {
    #[serde(flatten)]
    pub report: &'a StatusReport,
    pub wgcf: WgcfStatus,
    pub nextdns: NextDnsStatus,
}

/// Run the status command
pub async fn run(config_path: &Path, json: bool) -> Result<()> {
    let manager = super::build_manager(config_path)?;
    let report = manager.get_status().await;

    if json {
        let doc = StatusDocument {
            report: &report,
            wgcf: manager.wgcf().status(),
            nextdns: manager.nextdns().status(),
        };
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print!("{}", ui::render_status(&report));
    }
    Ok(())
}
