//! # shiftsql
//!
//! Timestamped, reversible SQL migrations for SQLite and PostgreSQL, applied
//! in all-or-nothing batches.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shiftsql::{ConnectionConfig, Dialect, Runner, RunnerConfig, Steps};
//!
//! # fn main() -> shiftsql::Result<()> {
//! let connection = ConnectionConfig::new(Dialect::Sqlite, "./dev.db");
//! let mut runner = Runner::connect(&connection, RunnerConfig::new("./migrations"))?;
//!
//! runner.init()?;
//! let report = runner.up(Steps::All)?;
//! println!("applied {} migration(s)", report.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Database Support
//!
//! | Database   | Driver   | Feature Flag    |
//! |------------|----------|-----------------|
//! | SQLite     | rusqlite | `rusqlite`      |
//! | PostgreSQL | postgres | `postgres-sync` |

pub use shiftsql_migrations::*;
