//! New command implementation
//!
//! Registers the migration in the state table and creates its two empty
//! scripts for the author to fill in.

use crate::config::Config;
use crate::error::CliError;
use crate::output;

/// Run the new command
pub fn run(config: &Config, name: &str) -> Result<(), CliError> {
    let mut runner = super::open_runner(config)?;
    let created = runner.create(name)?;

    println!(
        "{}",
        output::success(&format!(
            "Created migration {}_{}",
            created.created_at.timestamp(),
            created.name
        ))
    );
    println!("  {} {}", output::label("up:  "), created.files.up.display());
    println!("  {} {}", output::label("down:"), created.files.down.display());

    Ok(())
}
