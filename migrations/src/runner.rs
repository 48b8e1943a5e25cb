//! Migration runner
//!
//! Provides utilities to:
//! - Bootstrap the migrations directory and the state table
//! - Register new migrations with their empty script pair
//! - Apply pending migrations or revert applied ones in batches
//! - List every recorded migration
//!
//! The runner knows no SQL. It sequences driver calls and file reads, and
//! decides what a batch contains.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};

use crate::deadline::{self, CancellationToken, DEFAULT_STEP_TIMEOUT};
use crate::driver::{self, ConnectionConfig, Driver};
use crate::error::{Error, Result};
use crate::files::{FileStore, ScriptPair, validate_name};
use crate::record::{Direction, Migration, Order, StateFilter};
use crate::steps::Steps;

/// Default migrations directory
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Runner settings that are not about the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Directory holding the script pairs
    pub migrations_dir: PathBuf,
    /// Deadline for each migration step
    pub step_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }
}

impl RunnerConfig {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }
}

/// What [`Runner::init`] had to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitReport {
    pub created_dir: bool,
    pub created_table: bool,
}

/// A migration registered by [`Runner::create`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMigration {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub files: ScriptPair,
}

/// Outcome of a committed up or down batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub direction: Direction,
    /// Processed records in execution order, with their new `executed` flag
    pub applied: Vec<Migration>,
}

impl BatchReport {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.applied.len()
    }
}

/// Reconciles migration scripts on disk with the state table of one database.
pub struct Runner {
    driver: Box<dyn Driver>,
    store: FileStore,
    step_timeout: Duration,
    cancel: CancellationToken,
}

impl Runner {
    /// Create a runner over an open driver.
    pub fn new(driver: Box<dyn Driver>, config: RunnerConfig) -> Self {
        Self {
            driver,
            store: FileStore::new(config.migrations_dir),
            step_timeout: config.step_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Connect with the driver selected by `connection` and create a runner.
    pub fn connect(connection: &ConnectionConfig, config: RunnerConfig) -> Result<Self> {
        let driver = driver::connect(connection)?;
        tracing::debug!(driver = driver.name(), "connected");
        Ok(Self::new(driver, config))
    }

    /// Use `token` to cancel batches from another thread.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// A handle to this runner's cancellation flag
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    /// Ensure the migrations directory and the state table exist. Idempotent.
    pub fn init(&mut self) -> Result<InitReport> {
        let created_dir = self.store.ensure_dir()?;

        let mut created_table = false;
        self.driver.transaction(&mut |exec| {
            created_table = !exec.state_table_exists()?;
            if created_table {
                exec.ensure_state_table()?;
            }
            Ok(())
        })?;

        tracing::info!(
            dir = %self.store.dir().display(),
            created_dir,
            created_table,
            "initialized"
        );
        Ok(InitReport {
            created_dir,
            created_table,
        })
    }

    /// Register a migration and create its empty script pair.
    ///
    /// Either both files and the state row exist afterwards, or neither does.
    /// The row is inserted first, so a duplicate name fails with
    /// [`Error::UniqueConstraint`] before any file is touched.
    pub fn create(&mut self, name: &str) -> Result<NewMigration> {
        validate_name(name)?;
        let created_at = Utc::now().trunc_subsecs(0);

        let store = &self.store;
        let mut files = None;
        let outcome = self.driver.transaction(&mut |exec| {
            exec.insert_migration(name, created_at)?;
            files = Some(store.create_empty_pair(name, created_at)?);
            Ok(())
        });

        if let Err(e) = outcome {
            // commit failed after the files were written
            if let Some(pair) = files.take() {
                self.store.remove_pair(&pair);
            }
            return Err(e);
        }
        let files = files.ok_or_else(|| {
            Error::Validation(format!("script files for \"{name}\" were not created"))
        })?;

        tracing::info!(name, timestamp = created_at.timestamp(), "migration created");
        Ok(NewMigration {
            name: name.to_string(),
            created_at,
            files,
        })
    }

    /// Apply up to `steps` pending migrations, earliest first, in one transaction.
    pub fn up(&mut self, steps: Steps) -> Result<BatchReport> {
        self.batch(Direction::Up, steps)
    }

    /// Revert up to `steps` applied migrations, latest first, in one transaction.
    pub fn down(&mut self, steps: Steps) -> Result<BatchReport> {
        self.batch(Direction::Down, steps)
    }

    /// Every recorded migration, earliest first.
    pub fn status(&mut self) -> Result<Vec<Migration>> {
        let mut migrations = Vec::new();
        self.driver.read(&mut |exec| {
            migrations = exec.list_migrations(StateFilter::Any, Order::Ascending)?;
            Ok(())
        })?;
        Ok(migrations)
    }

    fn batch(&mut self, direction: Direction, steps: Steps) -> Result<BatchReport> {
        let interrupt = self.driver.interrupt_handle();
        let store = &self.store;
        let cancel = &self.cancel;
        let timeout = self.step_timeout;

        let mut applied = Vec::new();
        let outcome = self.driver.transaction(&mut |exec| {
            let eligible = exec.list_migrations(direction.filter(), direction.order())?;
            let count = steps.clamp(eligible.len());
            tracing::debug!(%direction, eligible = eligible.len(), selected = count, "batch planned");

            for record in eligible.into_iter().take(count) {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let sql = store.read_script(&record, direction)?;
                if sql.trim().is_empty() {
                    tracing::warn!(migration = %record, %direction, "script is empty");
                }

                deadline::run(&record.name, timeout, interrupt.as_ref(), cancel, || {
                    match direction {
                        Direction::Up => exec.apply_up(&record.name, &sql),
                        Direction::Down => exec.apply_down(&record.name, &sql),
                    }
                })?;

                tracing::info!(migration = %record, %direction, "migration executed");
                applied.push(Migration {
                    executed: direction.executed_after(),
                    ..record
                });
            }
            Ok(())
        });

        if let Err(e) = outcome {
            tracing::warn!(%direction, error = %e, "batch rolled back");
            return Err(e);
        }

        Ok(BatchReport { direction, applied })
    }
}
