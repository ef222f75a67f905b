//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "warp-nextdns")]
#[command(author, version, about = "Cloudflare WARP + NextDNS manager")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (default: ~/.warp-nextdns/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Accept every prompt (for boot units and scripts)
    #[arg(long, global = true)]
    pub auto: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install dependencies, register WARP, configure NextDNS and start
    Setup,

    /// Start the WARP tunnel and NextDNS
    Start,

    /// Stop the WARP tunnel and NextDNS
    Stop,

    /// Stop then start both services
    Restart,

    /// Show component status
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Live status view, refreshed until Ctrl-C
    Monitor {
        /// Refresh interval in seconds (default from config)
        #[arg(long, short)]
        refresh: Option<u64>,

        /// Also sample network metrics in the background
        #[arg(long)]
        metrics: bool,
    },

    /// Menu-driven mode
    Interactive,

    /// Show recent log lines
    Logs {
        /// Number of lines to show
        #[arg(long, short = 'n', default_value = "50")]
        lines: usize,

        /// Show NextDNS daemon logs instead
        #[arg(long)]
        nextdns: bool,

        /// Summarize recorded errors instead
        #[arg(long)]
        errors: bool,

        /// Truncate the log file
        #[arg(long, conflicts_with_all = ["nextdns", "errors"])]
        clear: bool,
    },

    /// Manage configuration backups
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Key, certificate and configuration security
    Security {
        #[command(subcommand)]
        action: SecurityAction,
    },

    /// Measure download/upload speed and latency
    Speedtest,

    /// Remove services, WARP profile and NextDNS
    Uninstall {
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Run connection tests
    Test,

    /// Show version
    Version,
}

#[derive(Subcommand)]
pub enum BackupAction {
    /// Create a new backup archive
    Create {
        /// Free-form description stored in the archive metadata
        #[arg(long, short, default_value = "")]
        description: String,

        /// Leave log files out
        #[arg(long)]
        no_logs: bool,

        /// Leave the security directory out
        #[arg(long)]
        no_security: bool,
    },
    /// List backups, newest first
    List,
    /// Restore a backup
    Restore {
        /// Archive name or path
        archive: String,

        /// Extract here instead of the data directory
        #[arg(long)]
        target: Option<PathBuf>,
    },
    /// Check an archive's integrity
    Verify {
        /// Archive name or path
        archive: String,
    },
    /// Delete a backup
    Delete {
        /// Archive name or path
        archive: String,
    },
    /// Show backup statistics
    Stats,
}

#[derive(Subcommand)]
pub enum SecurityAction {
    /// Show key, certificate and permission status
    Report,
    /// Encrypt a string with the local key
    Encrypt {
        /// Plaintext
        text: String,
    },
    /// Decrypt a string produced by `encrypt`
    Decrypt {
        /// Base64 ciphertext
        text: String,
    },
    /// Audit a JSON or YAML configuration file for plaintext secrets
    Audit {
        /// File to audit
        file: PathBuf,
    },
    /// Encrypt the named top-level values of a JSON file in place
    Secure {
        /// JSON file to rewrite
        file: PathBuf,

        /// Keys whose string values get encrypted
        #[arg(long = "key", short = 'k', required = true)]
        keys: Vec<String>,
    },
    /// Hash a password with PBKDF2-HMAC-SHA256
    Hash {
        password: String,

        /// Hex salt to reuse (random when omitted)
        #[arg(long)]
        salt: Option<String>,
    },
    /// Print a random URL-safe token
    Token {
        /// Random bytes before encoding
        #[arg(long, default_value = "32")]
        bytes: usize,
    },
    /// Remove stale files from the security directory
    Cleanup {
        /// Age in days beyond which files are removed
        #[arg(long, default_value = "30")]
        days: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses_help() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_version_command() {
        let cli = Cli::try_parse_from(["warp-nextdns", "version"]).unwrap();
        assert!(matches!(cli.command, Commands::Version));
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from([
            "warp-nextdns",
            "start",
            "--auto",
            "--quiet",
            "-c",
            "/tmp/c.yaml",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Start));
        assert!(cli.auto);
        assert!(cli.quiet);
        assert!(!cli.verbose);
        assert_eq!(cli.config_path(), PathBuf::from("/tmp/c.yaml"));
    }

    #[test]
    fn test_cli_default_config_path() {
        let cli = Cli::try_parse_from(["warp-nextdns", "status"]).unwrap();
        assert_eq!(cli.config_path(), Config::default_path());
    }

    #[test]
    fn test_cli_status_json() {
        let cli = Cli::try_parse_from(["warp-nextdns", "status", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Status { json: true }));
    }

    #[test]
    fn test_cli_monitor_options() {
        let cli =
            Cli::try_parse_from(["warp-nextdns", "monitor", "--refresh", "10", "--metrics"]).unwrap();
        match cli.command {
            Commands::Monitor { refresh, metrics } => {
                assert_eq!(refresh, Some(10));
                assert!(metrics);
            }
            _ => panic!("Expected Monitor command"),
        }
    }

    #[test]
    fn test_cli_logs_defaults() {
        let cli = Cli::try_parse_from(["warp-nextdns", "logs"]).unwrap();
        match cli.command {
            Commands::Logs {
                lines,
                nextdns,
                errors,
                clear,
            } => {
                assert_eq!(lines, 50);
                assert!(!nextdns);
                assert!(!errors);
                assert!(!clear);
            }
            _ => panic!("Expected Logs command"),
        }
    }

    #[test]
    fn test_cli_logs_clear_conflicts() {
        assert!(Cli::try_parse_from(["warp-nextdns", "logs", "--clear"]).is_ok());
        assert!(Cli::try_parse_from(["warp-nextdns", "logs", "--clear", "--errors"]).is_err());
    }

    #[test]
    fn test_cli_backup_create() {
        let cli = Cli::try_parse_from([
            "warp-nextdns",
            "backup",
            "create",
            "--description",
            "before upgrade",
            "--no-logs",
        ])
        .unwrap();
        match cli.command {
            Commands::Backup {
                action:
                    BackupAction::Create {
                        description,
                        no_logs,
                        no_security,
                    },
            } => {
                assert_eq!(description, "before upgrade");
                assert!(no_logs);
                assert!(!no_security);
            }
            _ => panic!("Expected Backup Create command"),
        }
    }

    #[test]
    fn test_cli_backup_restore_target() {
        let cli = Cli::try_parse_from([
            "warp-nextdns",
            "backup",
            "restore",
            "warp_nextdns_backup_20240101_120000.tar.gz",
            "--target",
            "/tmp/restore",
        ])
        .unwrap();
        match cli.command {
            Commands::Backup {
                action: BackupAction::Restore { archive, target },
            } => {
                assert_eq!(archive, "warp_nextdns_backup_20240101_120000.tar.gz");
                assert_eq!(target, Some(PathBuf::from("/tmp/restore")));
            }
            _ => panic!("Expected Backup Restore command"),
        }
    }

    #[test]
    fn test_cli_backup_requires_action() {
        assert!(Cli::try_parse_from(["warp-nextdns", "backup"]).is_err());
    }

    #[test]
    fn test_cli_security_secure_requires_keys() {
        assert!(Cli::try_parse_from(["warp-nextdns", "security", "secure", "a.json"]).is_err());
        let cli = Cli::try_parse_from([
            "warp-nextdns", "security", "secure", "a.json", "-k", "api_key", "-k", "token",
        ])
        .unwrap();
        match cli.command {
            Commands::Security {
                action: SecurityAction::Secure { file, keys },
            } => {
                assert_eq!(file, PathBuf::from("a.json"));
                assert_eq!(keys, vec!["api_key", "token"]);
            }
            _ => panic!("Expected security secure"),
        }
    }

    #[test]
    fn test_cli_security_defaults() {
        let cli = Cli::try_parse_from(["warp-nextdns", "security", "cleanup"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Security {
                action: SecurityAction::Cleanup { days: 30 }
            }
        ));
        let cli = Cli::try_parse_from(["warp-nextdns", "security", "token"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Security {
                action: SecurityAction::Token { bytes: 32 }
            }
        ));
    }

    #[test]
    fn test_cli_security_encrypt() {
        let cli = Cli::try_parse_from(["warp-nextdns", "security", "encrypt", "secret"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Security {
                action: SecurityAction::Encrypt { ref text }
            } if text == "secret"
        ));
    }

    #[test]
    fn test_cli_uninstall_yes() {
        let cli = Cli::try_parse_from(["warp-nextdns", "uninstall", "-y"]).unwrap();
        assert!(matches!(cli.command, Commands::Uninstall { yes: true }));
    }

    #[test]
    fn test_cli_unknown_command() {
        assert!(Cli::try_parse_from(["warp-nextdns", "frobnicate"]).is_err());
    }
}
