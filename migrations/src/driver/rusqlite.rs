//! SQLite state store through rusqlite
//!
//! Timestamps are stored as Unix seconds in `INTEGER` columns and flags as
//! `0`/`1`, so the table sorts and compares without any date parsing.

use std::panic::{AssertUnwindSafe, catch_unwind};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, InterruptHandle, Transaction, TransactionBehavior, params};

use super::{ConnectionConfig, Dialect, Driver, Executor, Interrupt, TxEnd, settle};
use crate::error::{Error, Result, mask_url};
use crate::record::{Direction, Migration, Order, StateFilter};
use crate::trace_query;

const DRIVER: &str = "sqlite.rusqlite";

/// State table DDL; `{table}` is a validated identifier.
fn create_table_sql(table: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS "{table}" (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at INTEGER NOT NULL,
    name TEXT NOT NULL UNIQUE CHECK (length(name) <= 128),
    executed INTEGER NOT NULL DEFAULT 0,
    executed_at INTEGER DEFAULT NULL,
    rolled_back_at INTEGER DEFAULT NULL
);"#
    )
}

/// A single SQLite connection holding the state table.
pub struct RusqliteDriver {
    conn: Connection,
    table: String,
}

impl RusqliteDriver {
    /// Open (or create) the database file named by `config.dsn`.
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let conn = Connection::open(&config.dsn).map_err(|e| Error::Connection {
            target: mask_url(&config.dsn),
            source: e.into(),
        })?;
        Self::from_connection(conn, config)
    }

    /// Wrap an already open connection, e.g. an in-memory database.
    pub fn from_connection(conn: Connection, config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;

        if let Some(sql) = &config.exec_on_start {
            trace_query!(DRIVER, sql);
            conn.execute_batch(sql)
                .map_err(|e| Error::query(sql.as_str(), e))?;
        }

        Ok(Self {
            conn,
            table: config.table.clone(),
        })
    }

    /// The underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn run_in(
        &mut self,
        behavior: TransactionBehavior,
        f: &mut dyn FnMut(&mut dyn Executor) -> Result<()>,
    ) -> Result<()> {
        crate::trace_tx!("begin", DRIVER);
        let begin = match behavior {
            TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
            _ => "BEGIN DEFERRED",
        };
        let tx = self
            .conn
            .transaction_with_behavior(behavior)
            .map_err(|e| Error::query(begin, e))?;

        let outcome = {
            let mut executor = SqliteExecutor {
                conn: &tx,
                table: &self.table,
            };
            catch_unwind(AssertUnwindSafe(|| f(&mut executor)))
        };

        settle(DRIVER, tx, outcome)
    }
}

impl Driver for RusqliteDriver {
    fn name(&self) -> &'static str {
        DRIVER
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn transaction(&mut self, f: &mut dyn FnMut(&mut dyn Executor) -> Result<()>) -> Result<()> {
        // IMMEDIATE takes the write lock up front instead of on the first write.
        self.run_in(TransactionBehavior::Immediate, f)
    }

    fn read(&mut self, f: &mut dyn FnMut(&mut dyn Executor) -> Result<()>) -> Result<()> {
        self.run_in(TransactionBehavior::Deferred, f)
    }

    fn interrupt_handle(&self) -> Box<dyn Interrupt> {
        Box::new(SqliteInterrupt(self.conn.get_interrupt_handle()))
    }
}

impl TxEnd for Transaction<'_> {
    fn commit_tx(self) -> Result<()> {
        self.commit().map_err(|e| Error::query("COMMIT", e))
    }

    fn rollback_tx(self) -> Result<()> {
        self.rollback().map_err(|e| Error::query("ROLLBACK", e))
    }
}

struct SqliteInterrupt(InterruptHandle);

impl Interrupt for SqliteInterrupt {
    fn interrupt(&self) {
        self.0.interrupt();
    }
}

// ============================================================================
// Executor
// ============================================================================

struct SqliteExecutor<'a> {
    conn: &'a Connection,
    table: &'a str,
}

impl SqliteExecutor<'_> {
    fn apply(&mut self, name: &str, sql: &str, direction: Direction) -> Result<()> {
        trace_query!(DRIVER, sql);
        self.conn
            .execute_batch(sql)
            .map_err(|e| Error::execution(name, sql, e))?;

        let stamp = match direction {
            Direction::Up => "executed_at",
            Direction::Down => "rolled_back_at",
        };
        let update = format!(
            r#"UPDATE "{}" SET executed = ?1, {stamp} = ?2 WHERE name = ?3 AND executed = ?4"#,
            self.table
        );
        trace_query!(DRIVER, update);
        let after = direction.executed_after();
        let changed = self
            .conn
            .execute(&update, params![after, Utc::now().timestamp(), name, !after])
            .map_err(|e| Error::execution(name, update.as_str(), e))?;

        if changed != 1 {
            return Err(Error::execution(
                name,
                update,
                format!("expected to update 1 state row, updated {changed}"),
            ));
        }
        Ok(())
    }
}

impl Executor for SqliteExecutor<'_> {
    fn state_table_exists(&mut self) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1";
        trace_query!(DRIVER, sql);
        let count: i64 = self
            .conn
            .query_row(sql, [self.table], |row| row.get(0))
            .map_err(|e| Error::schema(sql, e))?;
        Ok(count > 0)
    }

    fn ensure_state_table(&mut self) -> Result<()> {
        let sql = create_table_sql(self.table);
        trace_query!(DRIVER, sql);
        self.conn
            .execute_batch(&sql)
            .map_err(|e| Error::schema(sql.as_str(), e))
    }

    fn list_migrations(&mut self, filter: StateFilter, order: Order) -> Result<Vec<Migration>> {
        let condition = match filter {
            StateFilter::Applied => " WHERE executed = 1",
            StateFilter::Pending => " WHERE executed = 0",
            StateFilter::Any => "",
        };
        let sql = format!(
            r#"SELECT id, created_at, name, executed FROM "{}"{condition} ORDER BY created_at {dir}, id {dir}"#,
            self.table,
            dir = order.as_sql(),
        );
        trace_query!(DRIVER, sql);

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| Error::query(sql.as_str(), e))?;
        let rows = stmt
            .query_map([], |row| {
                let secs: i64 = row.get(1)?;
                let created_at = DateTime::<Utc>::from_timestamp(secs, 0)
                    .ok_or(rusqlite::Error::IntegralValueOutOfRange(1, secs))?;
                Ok(Migration {
                    id: row.get(0)?,
                    created_at,
                    name: row.get(2)?,
                    executed: row.get(3)?,
                })
            })
            .map_err(|e| Error::query(sql.as_str(), e))?;

        let migrations = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::query(sql.as_str(), e))?;
        Ok(migrations)
    }

    fn insert_migration(&mut self, name: &str, created_at: DateTime<Utc>) -> Result<()> {
        let sql = format!(
            r#"INSERT INTO "{}" (name, created_at, executed) VALUES (?1, ?2, 0)"#,
            self.table
        );
        trace_query!(DRIVER, sql);
        match self.conn.execute(&sql, params![name, created_at.timestamp()]) {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::UniqueConstraint {
                name: name.to_string(),
                sql,
                source: e.into(),
            }),
            Err(e) => Err(Error::query(sql, e)),
        }
    }

    fn apply_up(&mut self, name: &str, sql: &str) -> Result<()> {
        self.apply(name, sql, Direction::Up)
    }

    fn apply_down(&mut self, name: &str, sql: &str) -> Result<()> {
        self.apply(name, sql, Direction::Down)
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
