//! # warp-nextdns - Cloudflare WARP + NextDNS manager
//!
//! Installs and drives a WARP WireGuard tunnel (through `wgcf`) with the
//! NextDNS resolver on top, on Linux and Windows.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      warp-nextdns                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: setup, start, stop, status, monitor...     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Manager                                                    │
//! │    ├── wgcf: register, generate, DNS patch, wg-quick        │
//! │    ├── nextdns: install, configure, service control         │
//! │    └── installer: WireGuard tools, auto-start unit          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Network (reqwest + ping)                                   │
//! │    └── Cloudflare trace, external IP, latency, speed        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Backup (tar/flate2, zip) · Security (aes-gcm, openssl)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use warp_nextdns::cmd_abstraction::RealCommandExecutor;
//! use warp_nextdns::config::Config;
//! use warp_nextdns::manager::WarpNextDnsManager;
//! use warp_nextdns::network::HttpConnectivity;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let path = Config::default_path();
//!     let config = Config::load_or_init(&path)?;
//!     let manager = WarpNextDnsManager::new(
//!         config,
//!         path,
//!         Arc::new(RealCommandExecutor::new()),
//!         Arc::new(HttpConnectivity::new()?),
//!     );
//!     for component in manager.get_status().await.components {
//!         println!("{}: {}", component.component, component.state);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`backup`] - Archive create/list/restore/verify and retention
//! - [`cli`] - Command-line interface definitions
//! - [`cmd_abstraction`] - Mockable subprocess execution
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`manager`] - Setup orchestration and status aggregation
//! - [`monitor`] - Background network metric sampling
//! - [`network`] - Connectivity probes and output parsers
//! - [`remedy`] - User-facing error reports and recoveries
//! - [`security`] - Local key, certificate and config hardening

pub mod backup;
pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod installer;
pub mod lock;
pub mod logging;
pub mod manager;
pub mod monitor;
pub mod network;
pub mod nextdns;
pub mod platform;
pub mod remedy;
pub mod security;
pub mod signal;
pub mod ui;
pub mod utils;
pub mod wgcf;

pub use cli::{BackupAction, Cli, Commands, SecurityAction};
pub use config::Config;
pub use error::WarpError;
