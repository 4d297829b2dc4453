//! Error types for `pricebook-core`.

use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::observation::PriceLine;

#[derive(Debug, Error)]
pub enum Error {
  /// A price commit would break the non-overlap rule of its price line.
  #[error("temporal conflict on {line} at {date}: {detail}")]
  TemporalConflict {
    line:   PriceLine,
    date:   NaiveDate,
    detail: String,
  },

  #[error("import session {0} is already closed")]
  SessionClosed(Uuid),

  #[error(
    "import session {session_id} has accounted for {accounted} of {total} rows"
  )]
  IncompleteSession {
    session_id: Uuid,
    accounted:  u64,
    total:      u64,
  },

  #[error("import session {0} would account for more rows than it holds")]
  CounterOverflow(Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
