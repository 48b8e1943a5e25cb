//! shiftsql migrations - the migration runner engine
//!
//! This crate provides types and utilities for:
//! - Migration records and the per-backend state table that stores them
//! - Up/down SQL script pairs named `{unix_seconds}_{name}.{up|down}.sql`
//! - **Batch execution**: one transaction per `up`/`down` call, all-or-nothing
//! - A per-step deadline and cooperative cancellation
//!
//! # Usage
//!
//! ```ignore
//! use shiftsql_migrations::{ConnectionConfig, Dialect, Runner, RunnerConfig, Steps};
//!
//! let connection = ConnectionConfig::new(Dialect::Sqlite, "./dev.db");
//! let mut runner = Runner::connect(&connection, RunnerConfig::new("./migrations"))?;
//!
//! runner.init()?;
//! let created = runner.create("create_users")?;
//! // fill in created.files.up / created.files.down, then:
//! let report = runner.up(Steps::All)?;
//! for migration in &report.applied {
//!     println!("applied {migration}");
//! }
//! ```
//!
//! # Ordering
//!
//! Records are ordered by `created_at`, ties broken by `id`. `up` walks pending
//! records in ascending order; `down` walks applied records in the exact
//! reverse order.
//!
//! # Feature Flags
//!
//! - `rusqlite` (default) - SQLite driver
//! - `postgres-sync` - PostgreSQL driver on the synchronous `postgres` client

mod trace;

pub mod deadline;
pub mod driver;
pub mod error;
pub mod files;
pub mod record;
pub mod runner;
pub mod steps;

pub use deadline::{CancellationToken, DEFAULT_STEP_TIMEOUT};
pub use driver::{ConnectionConfig, Dialect, Driver, Executor, Interrupt, connect};
pub use error::{DbError, Error, Result};
pub use files::{FileStore, ScriptPair, filename, validate_name};
pub use record::{Direction, Migration, Order, StateFilter};
pub use runner::{BatchReport, InitReport, NewMigration, Runner, RunnerConfig};
pub use steps::Steps;

#[cfg(feature = "rusqlite")]
pub use driver::RusqliteDriver;

#[cfg(feature = "postgres-sync")]
pub use driver::PostgresSyncDriver;
