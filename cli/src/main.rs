//! shiftsql CLI - Main entry point

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

use shiftsql_cli::commands;
use shiftsql_cli::config::Config;
use shiftsql_cli::error::CliError;
use shiftsql_migrations::Steps;

/// shiftsql - timestamped, reversible SQL migrations
#[derive(Parser, Debug)]
#[command(name = "shiftsql")]
#[command(author, version, about = "Timestamped, reversible SQL migrations", long_about = None)]
struct Cli {
    /// Path to config file (default: shiftsql.config.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log engine activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
enum Command {
    /// Create the migrations directory and the state table
    Init,

    /// Register a new migration and create its empty up/down scripts
    New {
        /// Migration name (letters, digits, '_' and '-')
        #[arg(short, long)]
        name: String,
    },

    /// Apply pending migrations, earliest first
    Up {
        /// How many migrations to apply, -1 for all
        #[arg(short, long, default_value_t = Steps::UNLIMITED, allow_negative_numbers = true)]
        steps: i64,
    },

    /// Revert applied migrations, latest first
    Down {
        /// How many migrations to revert, -1 for all
        #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
        steps: i64,
    },

    /// Show every migration and whether it is applied
    Status,
}

fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    shiftsql_cli::logging::init(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    // steps are validated before any configuration or connection work
    let command = match cli.command {
        Command::Up { steps } => Parsed::Up(Steps::from_arg(steps)?),
        Command::Down { steps } => Parsed::Down(Steps::from_arg(steps)?),
        Command::Init => Parsed::Init,
        Command::New { name } => Parsed::New(name),
        Command::Status => Parsed::Status,
    };

    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(
        source = ?config.source,
        dialect = %config.dialect,
        dir = %config.out.display(),
        "configuration loaded"
    );

    match command {
        Parsed::Init => commands::init::run(&config),
        Parsed::New(name) => commands::new::run(&config, &name),
        Parsed::Up(steps) => commands::up::run(&config, steps),
        Parsed::Down(steps) => commands::down::run(&config, steps),
        Parsed::Status => commands::status::run(&config),
    }
}

/// Command with its arguments validated
enum Parsed {
    Init,
    New(String),
    Up(Steps),
    Down(Steps),
    Status,
}
