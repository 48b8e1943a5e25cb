//! Init command implementation

use crate::config::Config;
use crate::error::CliError;
use crate::output;

/// Run the init command
pub fn run(config: &Config) -> Result<(), CliError> {
    let mut runner = super::open_runner(config)?;
    let report = runner.init()?;

    let dir = config.migrations_dir().display().to_string();
    if report.created_dir {
        println!("{} {}", output::success("Created directory"), dir);
    } else {
        println!("{} {}", output::muted("Directory exists"), dir);
    }

    let table = &config.table;
    if report.created_table {
        println!("{} {}", output::success("Created state table"), table);
    } else {
        println!("{} {}", output::muted("State table exists"), table);
    }

    Ok(())
}
