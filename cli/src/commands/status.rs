//! Status command implementation
//!
//! Shows migration status (applied vs pending).

use crate::config::Config;
use crate::error::CliError;
use crate::output;

/// Run the status command
pub fn run(config: &Config) -> Result<(), CliError> {
    let mut runner = super::open_runner(config)?;
    let migrations = runner.status()?;

    println!("{}", output::heading("Migration Status"));
    println!();

    if migrations.is_empty() {
        println!("  {}", output::warning("No migrations found."));
        println!("  Run 'shiftsql new --name <NAME>' to create your first migration.");
        return Ok(());
    }

    let applied = migrations.iter().filter(|m| m.executed).count();
    let pending = migrations.len() - applied;

    for migration in &migrations {
        let state = if migration.executed {
            output::status_applied()
        } else {
            output::status_pending()
        };
        println!("  {state:>7}  {migration}");
    }

    println!();
    println!(
        "  {} applied, {} pending",
        output::success(&applied.to_string()),
        output::warning(&pending.to_string())
    );

    Ok(())
}
