//! Failures of the metrics store
//!
//! Every [`MetricsStore`](super::MetricsStore) call reports one of these. The
//! monitoring cycle treats them all the same way: the cycle that hit one is
//! reported as failed and the next tick tries again.

use std::fmt;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    /// The database file could not be opened, or the configured backend is
    /// not compiled in
    Unavailable(String),

    /// A statement was rejected, e.g. a second snapshot for a timestamp
    /// that is already stored
    Query(String),

    /// Creating or upgrading the snapshot and alert tables failed
    Schema(String),

    /// A stored snapshot or alert row no longer decodes
    CorruptRow(String),

    Io(std::io::Error),

    /// `close` already ran
    Closed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Unavailable(msg) => write!(f, "metrics store unavailable: {msg}"),
            StorageError::Query(msg) => write!(f, "metrics store rejected statement: {msg}"),
            StorageError::Schema(msg) => write!(f, "metrics schema setup failed: {msg}"),
            StorageError::CorruptRow(msg) => write!(f, "stored row is unreadable: {msg}"),
            StorageError::Io(err) => write!(f, "metrics store I/O failed: {err}"),
            StorageError::Closed => write!(f, "metrics store is closed"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::CorruptRow(err.to_string())
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::Io(io_err),
            sqlx::Error::PoolClosed => StorageError::Closed,
            sqlx::Error::Decode(e) | sqlx::Error::ColumnDecode { source: e, .. } => {
                StorageError::CorruptRow(e.to_string())
            }
            _ => StorageError::Query(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::Schema(err.to_string())
    }
}
