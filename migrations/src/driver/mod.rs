//! Backend drivers
//!
//! A driver owns one connection and knows the SQL of its backend: the state
//! table DDL, the state queries and updates, and how to run a migration script.
//! The runner only talks to the [`Driver`] and [`Executor`] traits.
//!
//! All state access happens inside [`Driver::transaction`], so a whole batch
//! of scripts plus every `executed` flip commits or rolls back together.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::record::{Migration, Order, StateFilter};

#[cfg(feature = "rusqlite")]
pub mod rusqlite;

#[cfg(feature = "postgres-sync")]
pub mod postgres_sync;

#[cfg(feature = "rusqlite")]
pub use self::rusqlite::RusqliteDriver;

#[cfg(feature = "postgres-sync")]
pub use self::postgres_sync::PostgresSyncDriver;

/// Default name of the state table
pub const DEFAULT_TABLE: &str = "migrations";

/// Default PostgreSQL schema of the state table
pub const DEFAULT_SCHEMA: &str = "public";

// ============================================================================
// Dialect
// ============================================================================

/// Database backend selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "sqlite3")]
    Sqlite,
    #[serde(alias = "postgres")]
    Postgresql,
}

impl Dialect {
    pub const ALL: &'static [&'static str] = &["sqlite", "postgresql"];

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgresql => "postgresql",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgresql" | "postgres" => Ok(Self::Postgresql),
            other => Err(format!(
                "unsupported driver \"{other}\", supported drivers: {}",
                Self::ALL.join(", ")
            )),
        }
    }
}

// ============================================================================
// Connection configuration
// ============================================================================

static IDENT_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$"));

fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    let pattern = IDENT_RE
        .as_ref()
        .map_err(|e| Error::Validation(format!("identifier pattern: {e}")))?;
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{kind} name \"{value}\" must be a plain SQL identifier"
        )))
    }
}

/// Everything a driver needs to open its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub dialect: Dialect,
    /// Connection string; a file path for SQLite
    pub dsn: String,
    /// State table name
    pub table: String,
    /// State table schema (PostgreSQL only)
    pub schema: String,
    /// SQL batch run once right after connecting
    pub exec_on_start: Option<String>,
}

impl ConnectionConfig {
    pub fn new(dialect: Dialect, dsn: impl Into<String>) -> Self {
        Self {
            dialect,
            dsn: dsn.into(),
            table: DEFAULT_TABLE.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            exec_on_start: None,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_exec_on_start(mut self, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        self.exec_on_start = (!sql.trim().is_empty()).then_some(sql);
        self
    }

    /// Table and schema names are spliced into DDL, so only plain identifiers pass.
    pub fn validate(&self) -> Result<()> {
        validate_identifier("table", &self.table)?;
        if self.dialect == Dialect::Postgresql {
            validate_identifier("schema", &self.schema)?;
        }
        Ok(())
    }
}

// ============================================================================
// Capability traits
// ============================================================================

/// State store operations, bound to an open transaction.
pub trait Executor {
    /// Whether the state table exists.
    fn state_table_exists(&mut self) -> Result<bool>;

    /// Create the state table if it is missing. Idempotent.
    fn ensure_state_table(&mut self) -> Result<()>;

    /// Records matching `filter`, sorted by `created_at` then `id` in `order`.
    ///
    /// Both keys follow `order`, so a descending listing (used by down)
    /// reverts same-second records by `id` descending, the exact reverse
    /// of how up applied them.
    fn list_migrations(&mut self, filter: StateFilter, order: Order) -> Result<Vec<Migration>>;

    /// Register a new record with `executed = false`.
    ///
    /// A duplicate name fails with [`Error::UniqueConstraint`].
    fn insert_migration(&mut self, name: &str, created_at: DateTime<Utc>) -> Result<()>;

    /// Run an up script and mark the record applied, in the same transaction.
    fn apply_up(&mut self, name: &str, sql: &str) -> Result<()>;

    /// Run a down script and mark the record pending, in the same transaction.
    fn apply_down(&mut self, name: &str, sql: &str) -> Result<()>;
}

/// Aborts whatever statement is running on a driver's connection.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// One open connection to a backend.
pub trait Driver {
    /// Short driver label used in logs, e.g. `sqlite.rusqlite`
    fn name(&self) -> &'static str;

    fn dialect(&self) -> Dialect;

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err` or
    /// panics. The error from `f` is returned as is; a failed rollback is
    /// only logged.
    fn transaction(&mut self, f: &mut dyn FnMut(&mut dyn Executor) -> Result<()>) -> Result<()>;

    /// Run `f` inside a transaction that only reads state.
    ///
    /// Drivers whose write transactions lock eagerly override this with a
    /// lighter one; the rest fall back to [`Driver::transaction`].
    fn read(&mut self, f: &mut dyn FnMut(&mut dyn Executor) -> Result<()>) -> Result<()> {
        self.transaction(f)
    }

    /// Handle that can abort the running statement from another thread.
    fn interrupt_handle(&self) -> Box<dyn Interrupt>;
}

/// Open a connection with the driver selected by `config.dialect`.
pub fn connect(config: &ConnectionConfig) -> Result<Box<dyn Driver>> {
    config.validate()?;

    match config.dialect {
        #[cfg(feature = "rusqlite")]
        Dialect::Sqlite => Ok(Box::new(RusqliteDriver::connect(config)?)),

        #[cfg(not(feature = "rusqlite"))]
        Dialect::Sqlite => Err(Error::MissingDriver {
            dialect: "SQLite",
            feature: "rusqlite",
        }),

        #[cfg(feature = "postgres-sync")]
        Dialect::Postgresql => Ok(Box::new(PostgresSyncDriver::connect(config)?)),

        #[cfg(not(feature = "postgres-sync"))]
        Dialect::Postgresql => Err(Error::MissingDriver {
            dialect: "PostgreSQL",
            feature: "postgres-sync",
        }),
    }
}

/// End of a backend transaction, implemented for each driver's handle.
pub(crate) trait TxEnd: Sized {
    fn commit_tx(self) -> Result<()>;
    fn rollback_tx(self) -> Result<()>;
}

/// Settle a transaction from the outcome of the callback that ran inside it.
///
/// Shared by the drivers so commit/rollback handling reads the same everywhere.
pub(crate) fn settle<T: TxEnd>(
    driver: &'static str,
    tx: T,
    outcome: std::thread::Result<Result<()>>,
) -> Result<()> {
    match outcome {
        Ok(Ok(())) => {
            crate::trace_tx!("commit", driver);
            tx.commit_tx()
        }
        Ok(Err(e)) => {
            crate::trace_tx!("rollback", driver);
            if let Err(rollback_err) = tx.rollback_tx() {
                tracing::warn!(driver, error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
        Err(panic_payload) => {
            crate::trace_tx!("rollback", driver);
            let _ = tx.rollback_tx();
            std::panic::resume_unwind(panic_payload);
        }
    }
}
