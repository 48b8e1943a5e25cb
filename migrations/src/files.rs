//! Migration script files on disk
//!
//! Every migration owns two files in the migrations directory:
//! `{unix_seconds}_{name}.up.sql` and `{unix_seconds}_{name}.down.sql`.
//! Scripts are read fresh on every run; nothing is cached.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{Error, Result};
use crate::record::{Direction, Migration};

/// Longest accepted migration name (matches the state table column)
pub const MAX_NAME_LEN: usize = 128;

static NAME_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$"));

/// Reject names that are empty, too long, or unsafe inside a file name.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("migration name is required".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "migration name is {} characters long, the limit is {MAX_NAME_LEN}",
            name.len()
        )));
    }
    let pattern = NAME_RE
        .as_ref()
        .map_err(|e| Error::Validation(format!("migration name pattern: {e}")))?;
    if !pattern.is_match(name) {
        return Err(Error::Validation(format!(
            "migration name \"{name}\" may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

/// File name of one script. Pure, no I/O.
pub fn filename(created_at: DateTime<Utc>, name: &str, direction: Direction) -> String {
    format!("{}_{}.{}.sql", created_at.timestamp(), name, direction)
}

/// Paths of a freshly created up/down pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPair {
    pub up: PathBuf,
    pub down: PathBuf,
}

/// Maps migration records to their script files inside one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of a record's script
    pub fn path_for(&self, record: &Migration, direction: Direction) -> PathBuf {
        self.dir
            .join(filename(record.created_at, &record.name, direction))
    }

    /// Create the directory if it is missing. Returns `true` when it was created.
    pub fn ensure_dir(&self) -> Result<bool> {
        match fs::metadata(&self.dir) {
            Ok(meta) if meta.is_dir() => return Ok(false),
            Ok(_) => {
                return Err(Error::MigrationsDir {
                    path: self.dir.clone(),
                    source: std::io::Error::new(
                        ErrorKind::AlreadyExists,
                        "path exists and is not a directory",
                    ),
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(Error::MigrationsDir {
                    path: self.dir.clone(),
                    source,
                });
            }
        }

        match fs::create_dir_all(&self.dir) {
            Ok(()) => Ok(true),
            // lost a race with another process creating it
            Err(e) if e.kind() == ErrorKind::AlreadyExists && self.dir.is_dir() => Ok(false),
            Err(source) => Err(Error::MigrationsDir {
                path: self.dir.clone(),
                source,
            }),
        }
    }

    /// Read a record's script as text.
    pub fn read_script(&self, record: &Migration, direction: Direction) -> Result<String> {
        let path = self.path_for(record, direction);
        match fs::read_to_string(&path) {
            Ok(sql) => Ok(sql),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::FileNotFound { path }),
            Err(source) => Err(Error::Read { path, source }),
        }
    }

    /// Create both empty scripts for a new migration.
    ///
    /// All-or-nothing: if the down file cannot be created the up file is
    /// removed again before the error is returned. Existing files are never
    /// overwritten.
    pub fn create_empty_pair(&self, name: &str, created_at: DateTime<Utc>) -> Result<ScriptPair> {
        let up = self.dir.join(filename(created_at, name, Direction::Up));
        let down = self.dir.join(filename(created_at, name, Direction::Down));

        create_empty(&up)?;
        if let Err(e) = create_empty(&down) {
            if let Err(cleanup) = fs::remove_file(&up) {
                tracing::warn!(path = %up.display(), error = %cleanup, "failed to remove orphaned up script");
            }
            return Err(e);
        }

        Ok(ScriptPair { up, down })
    }

    /// Remove a pair created by [`FileStore::create_empty_pair`]. Failures are logged.
    pub fn remove_pair(&self, pair: &ScriptPair) {
        for path in [&pair.up, &pair.down] {
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove migration script");
            }
        }
    }
}

fn create_empty(path: &Path) -> Result<()> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map(drop)
        .map_err(|source| Error::FileCreate {
            path: path.to_path_buf(),
            source,
        })
}
