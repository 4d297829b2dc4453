//! Error type for `pricebook-reconcile`.

use pricebook_core::{
  catalog::MaterialId, store::StoreError, unmatched::ResolutionStatus,
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  /// Late data contradicts the recorded price history.
  #[error("temporal conflict: {0}")]
  TemporalConflict(String),

  /// The catalog store kept failing with a transient error.
  #[error("catalog store unavailable: {0}")]
  StoreUnavailable(String),

  #[error("store error: {0}")]
  Store(Box<dyn std::error::Error + Send + Sync>),

  /// The batch could not be processed; the session is marked failed.
  #[error("import session {session_id} aborted: {reason}")]
  SessionAborted { session_id: Uuid, reason: String },

  #[error("import session not found: {0}")]
  SessionNotFound(Uuid),

  #[error("price source not found: {0}")]
  SourceNotFound(Uuid),

  #[error("material not found: {0}")]
  MaterialNotFound(MaterialId),

  #[error("customer not found: {0}")]
  CustomerNotFound(Uuid),

  #[error("unmatched import not found: {0}")]
  UnmatchedNotFound(Uuid),

  #[error("unmatched import {id} is already {status}")]
  AlreadyResolved { id: Uuid, status: ResolutionStatus },

  #[error("unmatched import {0} has no usable price")]
  MissingPrice(Uuid),

  #[error(transparent)]
  Core(pricebook_core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  /// Classify a backend error.
  pub fn store<E: StoreError>(e: E) -> Self {
    if e.is_unavailable() {
      Self::StoreUnavailable(e.to_string())
    } else {
      Self::Store(Box::new(e))
    }
  }
}

impl From<pricebook_core::Error> for Error {
  fn from(e: pricebook_core::Error) -> Self {
    match e {
      pricebook_core::Error::TemporalConflict { line, date, detail } => {
        Self::TemporalConflict(format!("{line} at {date}: {detail}"))
      }
      other => Self::Core(other),
    }
  }
}
