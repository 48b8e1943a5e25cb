//! Step counts for up/down batches

use std::fmt;
use std::num::NonZeroUsize;

use crate::error::Error;

/// How many eligible migrations a batch may process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Steps {
    /// Every eligible migration
    #[default]
    All,
    /// At most this many
    Limit(NonZeroUsize),
}

impl Steps {
    /// Command-line sentinel for [`Steps::All`]
    pub const UNLIMITED: i64 = -1;

    /// Parse the command-line form: `-1` or a positive count.
    pub fn from_arg(steps: i64) -> Result<Self, Error> {
        if steps == Self::UNLIMITED {
            return Ok(Self::All);
        }
        usize::try_from(steps)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self::Limit)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "steps is invalid, it can be -1 or a positive number, but it is {steps}"
                ))
            })
    }

    /// Number of migrations to run out of `available`.
    #[inline]
    pub fn clamp(self, available: usize) -> usize {
        match self {
            Self::All => available,
            Self::Limit(n) => n.get().min(available),
        }
    }
}

impl fmt::Display for Steps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Limit(n) => write!(f, "{n}"),
        }
    }
}
