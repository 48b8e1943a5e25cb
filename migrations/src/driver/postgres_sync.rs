//! PostgreSQL state store through the synchronous `postgres` client

use std::panic::{AssertUnwindSafe, catch_unwind};

use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::{CancelToken, Client, NoTls, Transaction};

use super::{ConnectionConfig, Dialect, Driver, Executor, Interrupt, TxEnd, settle};
use crate::error::{Error, Result, mask_url};
use crate::record::{Direction, Migration, Order, StateFilter};
use crate::trace_query;

const DRIVER: &str = "postgres.sync";

/// A single PostgreSQL client holding the state table.
pub struct PostgresSyncDriver {
    client: Client,
    schema: String,
    table: String,
    /// `"schema"."table"`
    qualified: String,
}

impl PostgresSyncDriver {
    /// Connect to the server named by `config.dsn` (URL or key/value form).
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let client = Client::connect(&config.dsn, NoTls).map_err(|e| Error::Connection {
            target: mask_url(&config.dsn),
            source: e.into(),
        })?;
        Self::from_client(client, config)
    }

    /// Wrap an already connected client.
    pub fn from_client(mut client: Client, config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;

        if let Some(sql) = &config.exec_on_start {
            trace_query!(DRIVER, sql);
            client
                .batch_execute(sql)
                .map_err(|e| Error::query(sql.as_str(), e))?;
        }

        Ok(Self {
            client,
            qualified: format!(r#""{}"."{}""#, config.schema, config.table),
            schema: config.schema.clone(),
            table: config.table.clone(),
        })
    }

    /// The underlying client
    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl Driver for PostgresSyncDriver {
    fn name(&self) -> &'static str {
        DRIVER
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgresql
    }

    fn transaction(&mut self, f: &mut dyn FnMut(&mut dyn Executor) -> Result<()>) -> Result<()> {
        crate::trace_tx!("begin", DRIVER);
        let mut tx = self
            .client
            .transaction()
            .map_err(|e| Error::query("BEGIN", e))?;

        let outcome = {
            let mut executor = PgExecutor {
                tx: &mut tx,
                schema: &self.schema,
                table: &self.table,
                qualified: &self.qualified,
            };
            catch_unwind(AssertUnwindSafe(|| f(&mut executor)))
        };

        settle(DRIVER, tx, outcome)
    }

    fn interrupt_handle(&self) -> Box<dyn Interrupt> {
        Box::new(PgInterrupt(self.client.cancel_token()))
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

/// Sends a cancel request over a separate connection.
struct PgInterrupt(CancelToken);

impl Interrupt for PgInterrupt {
    fn interrupt(&self) {
        if let Err(e) = self.0.cancel_query(NoTls) {
            tracing::warn!(driver = DRIVER, error = %e, "failed to cancel running query");
        }
    }
}

// ============================================================================
// Executor
// ============================================================================

struct PgExecutor<'a, 'c> {
    tx: &'a mut Transaction<'c>,
    schema: &'a str,
    table: &'a str,
    qualified: &'a str,
}

impl PgExecutor<'_, '_> {
    fn apply(&mut self, name: &str, sql: &str, direction: Direction) -> Result<()> {
        trace_query!(DRIVER, sql);
        self.tx
            .batch_execute(sql)
            .map_err(|e| Error::execution(name, sql, e))?;

        let stamp = match direction {
            Direction::Up => "executed_at",
            Direction::Down => "rolled_back_at",
        };
        let update = format!(
            "UPDATE {} SET executed = $1, {stamp} = NOW() WHERE name = $2 AND executed = $3",
            self.qualified
        );
        trace_query!(DRIVER, update);
        let after = direction.executed_after();
        let changed = self
            .tx
            .execute(update.as_str(), &[&after, &name, &!after])
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

impl Executor for PgExecutor<'_, '_> {
    fn state_table_exists(&mut self) -> Result<bool> {
        let sql = "SELECT EXISTS (SELECT 1 FROM pg_tables WHERE schemaname = $1 AND tablename = $2)";
        trace_query!(DRIVER, sql);
        let row = self
            .tx
            .query_one(sql, &[&self.schema, &self.table])
            .map_err(|e| Error::schema(sql, e))?;
        row.try_get::<_, bool>(0).map_err(|e| Error::schema(sql, e))
    }

    fn ensure_state_table(&mut self) -> Result<()> {
        let sql = format!(
            r#"CREATE SCHEMA IF NOT EXISTS "{schema}";
CREATE TABLE IF NOT EXISTS {qualified} (
    id SERIAL PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL,
    name VARCHAR(128) NOT NULL CONSTRAINT "{table}_name_unique" UNIQUE,
    executed BOOLEAN NOT NULL DEFAULT FALSE,
    executed_at TIMESTAMPTZ DEFAULT NULL,
    rolled_back_at TIMESTAMPTZ DEFAULT NULL
);"#,
            schema = self.schema,
            qualified = self.qualified,
            table = self.table,
        );
        trace_query!(DRIVER, sql);
        self.tx
            .batch_execute(&sql)
            .map_err(|e| Error::schema(sql.as_str(), e))
    }

    fn list_migrations(&mut self, filter: StateFilter, order: Order) -> Result<Vec<Migration>> {
        let condition = match filter {
            StateFilter::Applied => " WHERE executed",
            StateFilter::Pending => " WHERE NOT executed",
            StateFilter::Any => "",
        };
        let sql = format!(
            "SELECT id, created_at, name, executed FROM {}{condition} ORDER BY created_at {dir}, id {dir}",
            self.qualified,
            dir = order.as_sql(),
        );
        trace_query!(DRIVER, sql);

        let rows = self
            .tx
            .query(sql.as_str(), &[])
            .map_err(|e| Error::query(sql.as_str(), e))?;

        rows.iter()
            .map(|row| {
                Ok(Migration {
                    id: i64::from(row.try_get::<_, i32>(0)?),
                    created_at: row.try_get(1)?,
                    name: row.try_get(2)?,
                    executed: row.try_get(3)?,
                })
            })
            .collect::<Result<Vec<_>, postgres::Error>>()
            .map_err(|e| Error::query(sql.as_str(), e))
    }

    fn insert_migration(&mut self, name: &str, created_at: DateTime<Utc>) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (name, created_at, executed) VALUES ($1, $2, FALSE)",
            self.qualified
        );
        trace_query!(DRIVER, sql);
        match self.tx.execute(sql.as_str(), &[&name, &created_at]) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => Err(Error::UniqueConstraint {
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
