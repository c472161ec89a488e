pub mod sqlite;

#[cfg(test)]
mod sqlite_test;

use clap::ValueEnum;
use std::{fmt, path::PathBuf, str::FromStr};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store already exists at {0} and policy is 'fail'")]
    InitConflict(PathBuf),
    #[error("Existing store does not match the configured grid: {0}")]
    SchemaMismatch(String),
    #[error("Unknown status value: {0}")]
    UnknownStatus(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Policy applied when the store path already exists at initialization time.
/// Selected on the command line only, never read from the config file.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IfExists {
    /// Error out instead of touching the existing store
    Fail,
    /// Discard the existing grid and regenerate all cells
    Replace,
    /// Add the new cells alongside the existing ones (duplicate cells are possible)
    Append,
    /// Reuse the existing store unchanged, the common case for resuming a run
    #[default]
    Skip,
}

/// Processing state of a single grid cell.
/// Transitions are monotonic: pending -> in_progress -> completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Pending,
    InProgress,
    Completed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(StoreError::UnknownStatus(other.to_owned())),
        }
    }
}
