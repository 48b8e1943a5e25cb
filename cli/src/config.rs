//! Configuration for shiftsql CLI
//!
//! Built once at startup from, lowest precedence first:
//! 1. `shiftsql.config.toml` (or the file passed with `--config`)
//! 2. `SHIFTSQL_DSN`, `SHIFTSQL_DRIVER` and `SHIFTSQL_EXEC_ON_START`
//!
//! A `.env` file is loaded into the process environment before this runs.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use shiftsql_migrations::{ConnectionConfig, Dialect, RunnerConfig};

pub const CONFIG_FILE: &str = "shiftsql.config.toml";

/// Connection string override
pub const ENV_DSN: &str = "SHIFTSQL_DSN";
/// Dialect override (`sqlite`, `postgresql`, ...)
pub const ENV_DRIVER: &str = "SHIFTSQL_DRIVER";
/// SQL batch run right after connecting
pub const ENV_EXEC_ON_START: &str = "SHIFTSQL_EXEC_ON_START";

const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Bytes escaped in the userinfo of a connection URL; RFC 3986 unreserved characters pass
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

// ============================================================================
// Credentials
// ============================================================================

/// Database credentials - validated and typed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Local SQLite file
    Sqlite { path: Box<str> },

    /// PostgreSQL
    Postgres(PostgresCreds),
}

/// PostgreSQL credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostgresCreds {
    Url(Box<str>),
    Host {
        host: Box<str>,
        port: u16,
        user: Option<Box<str>>,
        password: Option<Box<str>>,
        database: Box<str>,
    },
}

impl PostgresCreds {
    /// Build connection URL
    pub fn connection_url(&self) -> String {
        match self {
            Self::Url(url) => url.to_string(),
            Self::Host { host, port, user, password, database } => {
                let user = user.as_deref().map(|u| utf8_percent_encode(u, USERINFO));
                let password = password.as_deref().map(|p| utf8_percent_encode(p, USERINFO));
                let auth = match (user, password) {
                    (Some(u), Some(p)) => format!("{u}:{p}@"),
                    (Some(u), None) => format!("{u}@"),
                    _ => String::new(),
                };
                format!("postgres://{auth}{host}:{port}/{database}")
            }
        }
    }
}

impl Credentials {
    /// Connection string handed to the driver
    pub fn dsn(&self) -> String {
        match self {
            Self::Sqlite { path } => path.to_string(),
            Self::Postgres(creds) => creds.connection_url(),
        }
    }
}

// ============================================================================
// File format
// ============================================================================

/// Config file as written by the user; everything is optional until resolved
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    dialect: Option<Dialect>,

    #[serde(default)]
    out: Option<PathBuf>,

    #[serde(default)]
    exec_on_start: Option<String>,

    /// Per-migration deadline in seconds
    #[serde(default)]
    timeout: Option<u64>,

    #[serde(default)]
    db_credentials: Option<RawCreds>,

    #[serde(default)]
    migrations: Option<MigrationsOpts>,
}

/// State table options
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MigrationsOpts {
    pub table: Option<String>,
    pub schema: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawCreds {
    Url {
        url: String,
    },
    Host {
        host: String,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        password: Option<String>,
        database: String,
    },
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Fully resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub dialect: Dialect,
    pub credentials: Credentials,
    /// Migrations directory
    pub out: PathBuf,
    pub exec_on_start: Option<String>,
    pub timeout: Duration,
    pub table: String,
    pub schema: String,
    /// File the settings were read from, if any
    pub source: Option<PathBuf>,
}

impl Config {
    /// Load from `path`, or from [`CONFIG_FILE`] when it exists, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] with an explicit environment lookup.
    pub fn load_with_env(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Error> {
        let (raw, source) = match path {
            Some(path) => (read_file(path)?, Some(path.to_path_buf())),
            None => {
                let default = Path::new(CONFIG_FILE);
                if default.is_file() {
                    (read_file(default)?, Some(default.to_path_buf()))
                } else {
                    (RawConfig::default(), None)
                }
            }
        };

        let mut config = Self::resolve(raw, env)?;
        config.source = source;
        Ok(config)
    }

    /// Parse TOML text and resolve it against `env`.
    pub fn from_toml_str(
        content: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Error> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| Error::Parse(PathBuf::from("<inline>"), e))?;
        Self::resolve(raw, env)
    }

    fn resolve(raw: RawConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let env = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let dialect = match env(ENV_DRIVER) {
            Some(driver) => driver.parse::<Dialect>().map_err(Error::InvalidDialect)?,
            None => raw.dialect.ok_or(Error::MissingDialect)?,
        };

        let creds = match env(ENV_DSN) {
            Some(url) => RawCreds::Url { url },
            None => raw.db_credentials.ok_or(Error::MissingCredentials)?,
        };
        let credentials = typed_credentials(dialect, creds)?;

        let timeout = match raw.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS) {
            0 => return Err(Error::InvalidTimeout(0)),
            secs => Duration::from_secs(secs),
        };

        let migrations = raw.migrations.unwrap_or_default();
        let defaults = RunnerConfig::default();

        Ok(Self {
            dialect,
            credentials,
            out: raw.out.unwrap_or(defaults.migrations_dir),
            exec_on_start: env(ENV_EXEC_ON_START).or(raw.exec_on_start),
            timeout,
            table: migrations
                .table
                .unwrap_or_else(|| shiftsql_migrations::driver::DEFAULT_TABLE.to_string()),
            schema: migrations
                .schema
                .unwrap_or_else(|| shiftsql_migrations::driver::DEFAULT_SCHEMA.to_string()),
            source: None,
        })
    }

    /// Connection settings for the engine
    pub fn connection(&self) -> ConnectionConfig {
        let connection = ConnectionConfig::new(self.dialect, self.credentials.dsn())
            .with_table(&self.table)
            .with_schema(&self.schema);
        match &self.exec_on_start {
            Some(sql) => connection.with_exec_on_start(sql),
            None => connection,
        }
    }

    /// Runner settings for the engine
    pub fn runner(&self) -> RunnerConfig {
        RunnerConfig::new(&self.out).with_step_timeout(self.timeout)
    }

    #[inline]
    pub fn migrations_dir(&self) -> &Path {
        &self.out
    }
}

fn read_file(path: &Path) -> Result<RawConfig, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.into())
        } else {
            Error::Io(path.into(), e)
        }
    })?;

    toml::from_str(&content).map_err(|e| Error::Parse(path.into(), e))
}

fn typed_credentials(dialect: Dialect, raw: RawCreds) -> Result<Credentials, Error> {
    let err = |msg: &str| Error::InvalidCredentials(msg.into());

    match (dialect, raw) {
        (Dialect::Sqlite, RawCreds::Url { url }) if url.starts_with("libsql://") => {
            Err(err("libsql:// URLs are not supported, use a local file path"))
        }
        (Dialect::Sqlite, RawCreds::Url { url }) => Ok(Credentials::Sqlite {
            path: url.into_boxed_str(),
        }),
        (Dialect::Sqlite, RawCreds::Host { .. }) => {
            Err(err("SQLite needs `url` set to a database file path"))
        }
        (Dialect::Postgresql, RawCreds::Url { url }) if !url.starts_with("postgres") => {
            Err(err("PostgreSQL URL must start with postgres://"))
        }
        (Dialect::Postgresql, RawCreds::Url { url }) => {
            Ok(Credentials::Postgres(PostgresCreds::Url(url.into_boxed_str())))
        }
        (Dialect::Postgresql, RawCreds::Host { host, port, user, password, database }) => {
            Ok(Credentials::Postgres(PostgresCreds::Host {
                host: host.into_boxed_str(),
                port: port.unwrap_or(5432),
                user: user.map(String::into_boxed_str),
                password: password.map(String::into_boxed_str),
                database: database.into_boxed_str(),
            }))
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("no dialect configured: set `dialect` in {CONFIG_FILE} or {ENV_DRIVER}")]
    MissingDialect,

    #[error("no database configured: set [dbCredentials] in {CONFIG_FILE} or {ENV_DSN}")]
    MissingCredentials,

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("{0}")]
    InvalidDialect(String),

    #[error("timeout must be a positive number of seconds, got {0}")]
    InvalidTimeout(u64),
}

pub type ConfigError = Error;

// ============================================================================
// Tests
// ============================================================================
