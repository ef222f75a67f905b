//! warp-nextdns - Cloudflare WARP + NextDNS manager

use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;

use warp_nextdns::cli::{Cli, Commands};
use warp_nextdns::commands;
use warp_nextdns::config::Config;
use warp_nextdns::logging;
use warp_nextdns::remedy::ErrorHandler;
use warp_nextdns::signal::ShutdownGuard;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config_path();

    // Log file location needs the config; fall back to defaults when it is unreadable
    let config = Config::load(&config_path).unwrap_or_default();
    let level = logging::console_level(cli.verbose, cli.quiet);
    if let Err(e) = logging::init(level, Some(&config.log_file())) {
        eprintln!("Failed to initialise logging: {:#}", e);
    }

    let _shutdown = ShutdownGuard::new();

    let command = command_name(&cli.command);
    let result = match cli.command {
        Commands::Setup => commands::setup::run(&config_path, cli.auto).await,
        Commands::Start => commands::start::run(&config_path).await,
        Commands::Stop => commands::stop::run(&config_path).await,
        Commands::Restart => commands::restart::run(&config_path).await,
        Commands::Status { json } => commands::status::run(&config_path, json).await,
        Commands::Monitor { refresh, metrics } => {
            commands::monitor::run(&config_path, refresh, metrics).await
        }
        Commands::Interactive => commands::interactive::run(&config_path).await,
        Commands::Logs {
            lines,
            nextdns,
            errors,
            clear,
        } => commands::logs::run(&config_path, lines, nextdns, errors, clear).await,
        Commands::Backup { action } => commands::backup::run(action, &config_path).await,
        Commands::Security { action } => commands::security::run(action, &config_path).await,
        Commands::Speedtest => commands::speedtest::run(&config_path).await,
        Commands::Uninstall { yes } => commands::uninstall::run(&config_path, yes, cli.auto).await,
        Commands::Test => commands::test::run(&config_path).await,
        Commands::Version => {
            println!("warp-nextdns {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let handler = ErrorHandler::new(&config.wgcf.binary_path, &config.wgcf.work_dir);
            let report = handler.handle(&e, command).await;
            eprintln!("{}: {}", "Error".red().bold(), report.user_message);
            if let Some(recovery) = &report.recovery_message {
                eprintln!("{}: {}", "Recovered".green(), recovery);
            }
            for suggestion in &report.suggestions {
                eprintln!("  - {}", suggestion);
            }
            ExitCode::FAILURE
        }
    }
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Setup => "setup",
        Commands::Start => "start",
        Commands::Stop => "stop",
        Commands::Restart => "restart",
        Commands::Status { .. } => "status",
        Commands::Monitor { .. } => "monitor",
        Commands::Interactive => "interactive",
        Commands::Logs { .. } => "logs",
        Commands::Backup { .. } => "backup",
        Commands::Security { .. } => "security",
        Commands::Speedtest => "speedtest",
        Commands::Uninstall { .. } => "uninstall",
        Commands::Test => "test",
        Commands::Version => "version",
    }
}
