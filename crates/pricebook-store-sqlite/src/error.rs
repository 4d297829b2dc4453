//! Error type for `pricebook-store-sqlite`.

use pricebook_core::store::StoreError;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  /// A column held a value the domain types cannot represent.
  #[error("decode error: {0}")]
  Decode(String),

  /// The rows a commit plan was computed from changed before it was
  /// applied.
  #[error("stale commit plan for observation {0}")]
  StaleCommit(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn sqlite_failure(e: &tokio_rusqlite::Error) -> Option<&rusqlite::ffi::Error> {
  match e {
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(f, _)) => {
      Some(f)
    }
    _ => None,
  }
}

/// Whether `e` is a violated UNIQUE constraint or primary key.
pub(crate) fn is_unique_violation(e: &tokio_rusqlite::Error) -> bool {
  sqlite_failure(e).is_some_and(|f| {
    f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
      || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
  })
}

impl StoreError for Error {
  fn is_unavailable(&self) -> bool {
    match self {
      Self::Database(tokio_rusqlite::Error::ConnectionClosed) => true,
      Self::Database(e) => sqlite_failure(e).is_some_and(|f| {
        matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
      }),
      _ => false,
    }
  }

  fn is_conflict(&self) -> bool { matches!(self, Self::StaleCommit(_)) }
}
