pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use leavewell_core::config::{AppConfig, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "leavewell",
    about = "Leavewell operator CLI",
    long_about = "Operate the leave approval workflow engine: migrations, demo fixtures, the escalation sweep, and configuration checks.",
    after_help = "Examples:\n  leavewell doctor --json\n  leavewell migrate\n  leavewell sweep"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo org chart and authority overlays")]
    Seed,
    #[command(about = "Run one escalation sweep over every pending approval step")]
    Sweep,
    #[command(about = "Inspect effective configuration values after file and env overrides")]
    Config,
    #[command(about = "Validate config and database connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Sweep => commands::sweep::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let config = AppConfig::load(LoadOptions::default()).unwrap_or_else(|_| AppConfig::default());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match config.logging.format {
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
        LogFormat::Pretty => {
            let _ = builder.pretty().try_init();
        }
        LogFormat::Compact => {
            let _ = builder.compact().try_init();
        }
    }
}
