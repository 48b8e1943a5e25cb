//! Up command implementation

use shiftsql_migrations::Steps;

use crate::config::Config;
use crate::error::CliError;

/// Run the up command
pub fn run(config: &Config, steps: Steps) -> Result<(), CliError> {
    let mut runner = super::open_runner(config)?;
    let report = runner.up(steps)?;
    super::print_batch(&report);
    Ok(())
}
