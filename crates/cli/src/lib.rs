pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::Level;

use servicedesk_core::config::{AppConfig, LogFormat};

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Parser)]
#[command(
    name = "servicedesk",
    about = "Service desk approval workflow CLI",
    long_about = "Inspect configuration, compute SLA due dates, and dry-run approval chains.",
    after_help = "Examples:\n  servicedesk config\n  servicedesk sla --priority high\n  servicedesk chain --scenario request.json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a servicedesk.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Print the effective configuration with source attribution")]
    Config,
    #[command(about = "Assign SLA due dates for a priority and report their status")]
    Sla {
        #[arg(long, help = "Priority tier (low, medium, high, top or critical)")]
        priority: String,
        #[arg(long, help = "RFC 3339 reference time; defaults to now")]
        at: Option<String>,
    },
    #[command(about = "Build an approval chain from a JSON scenario and replay its decisions")]
    Chain {
        #[arg(long, help = "Path to the scenario JSON file")]
        scenario: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Command::Config => commands::config::run(config_path),
        Command::Sla { priority, at } => with_config("sla", config_path, |config| {
            commands::sla::run(config, &priority, at.as_deref(), Utc::now())
        }),
        Command::Chain { scenario } => with_config("chain", config_path, |config| {
            commands::chain::run(config, &scenario)
        }),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn with_config(
    command: &str,
    config_path: Option<&std::path::Path>,
    run: impl FnOnce(&AppConfig) -> CommandResult,
) -> CommandResult {
    match load_config(config_path) {
        Ok(config) => {
            init_logging(&config);
            run(&config)
        }
        Err(error) => CommandResult::config_failure(command, &error),
    }
}

fn init_logging(config: &AppConfig) {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}
