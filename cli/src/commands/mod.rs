//! CLI command implementations
//!
//! Each command module implements a specific shiftsql CLI command.

pub mod down;
pub mod init;
pub mod new;
pub mod status;
pub mod up;

use shiftsql_migrations::{BatchReport, Direction, Runner};

use crate::config::Config;
use crate::error::CliError;
use crate::output;

/// Connect to the configured database and build a runner over it.
pub(crate) fn open_runner(config: &Config) -> Result<Runner, CliError> {
    Ok(Runner::connect(&config.connection(), config.runner())?)
}

/// Print the outcome of an up or down batch.
pub(crate) fn print_batch(report: &BatchReport) {
    let verb = match report.direction {
        Direction::Up => "Applied",
        Direction::Down => "Reverted",
    };

    if report.is_empty() {
        let nothing = match report.direction {
            Direction::Up => "No pending migrations.",
            Direction::Down => "No applied migrations.",
        };
        println!("{}", output::muted(nothing));
        return;
    }

    for migration in &report.applied {
        println!("  {} {}", output::label(verb), migration);
    }
    println!();
    println!(
        "{}",
        output::success(&format!(
            "{verb} {} migration(s) ({})",
            report.len(),
            report.direction
        ))
    );
}
