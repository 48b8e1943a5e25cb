//! Migration records as stored in the state table

use chrono::{DateTime, Utc};
use std::fmt;

/// One row of the state table.
///
/// Copies handed out by a driver are snapshots; they are not refreshed when the
/// transaction that produced them ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Backend-assigned surrogate key, increasing in insertion order
    pub id: i64,
    /// Creation instant (whole seconds); also embedded in the script file names
    pub created_at: DateTime<Utc>,
    /// Unique, filename-safe identifier
    pub name: String,
    /// Whether the up script is currently applied
    pub executed: bool,
}

impl Migration {
    /// Creation instant as Unix seconds, the prefix of both script files
    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.created_at.timestamp()
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.timestamp(), self.name)
    }
}

/// Which records a state query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    /// `executed = true`
    Applied,
    /// `executed = false`
    Pending,
    /// Every record
    Any,
}

/// Sort order by `created_at`, ties broken by `id` in the same direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

impl Order {
    #[inline]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Direction of travel for a batch.
///
/// Each direction has its own script file, its own eligible records and its
/// own ordering: up applies pending records earliest first, down reverts
/// applied records latest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    /// Records eligible for a batch in this direction
    #[inline]
    pub const fn filter(self) -> StateFilter {
        match self {
            Self::Up => StateFilter::Pending,
            Self::Down => StateFilter::Applied,
        }
    }

    #[inline]
    pub const fn order(self) -> Order {
        match self {
            Self::Up => Order::Ascending,
            Self::Down => Order::Descending,
        }
    }

    /// Value of `executed` once a record has been processed in this direction
    #[inline]
    pub const fn executed_after(self) -> bool {
        matches!(self, Self::Up)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
