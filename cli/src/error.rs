//! Error types for the CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Engine error, already carrying migration, file or SQL context
    #[error(transparent)]
    Migrate(#[from] shiftsql_migrations::Error),
}
