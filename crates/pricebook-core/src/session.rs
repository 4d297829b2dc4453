//! Import sessions: one batch of raw rows and its counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionStatus {
  Processing,
  Completed,
  Failed,
}

/// A batch import job. Counters only grow; status only leaves `Processing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSession {
  pub session_id:     Uuid,
  pub source_file:    String,
  pub customer_id:    Option<Uuid>,
  pub vendor_id:      Option<Uuid>,
  pub status:         SessionStatus,
  pub total_rows:     u64,
  pub processed_rows: u64,
  pub error_rows:     u64,
  pub failure_reason: Option<String>,
  pub started_at:     DateTime<Utc>,
  pub finished_at:    Option<DateTime<Utc>>,
}

/// Input to [`crate::store::CatalogStore::create_session`].
#[derive(Debug, Clone)]
pub struct NewImportSession {
  pub source_file: String,
  pub customer_id: Option<Uuid>,
  pub vendor_id:   Option<Uuid>,
  pub total_rows:  u64,
}

impl ImportSession {
  pub fn accounted(&self) -> u64 { self.processed_rows + self.error_rows }

  pub fn is_terminal(&self) -> bool { self.status != SessionStatus::Processing }

  fn ensure_open(&self) -> Result<()> {
    if self.is_terminal() {
      return Err(Error::SessionClosed(self.session_id));
    }
    Ok(())
  }

  fn ensure_room(&self) -> Result<()> {
    self.ensure_open()?;
    if self.accounted() >= self.total_rows {
      return Err(Error::CounterOverflow(self.session_id));
    }
    Ok(())
  }

  /// Count a row that committed (or was a handled duplicate).
  pub fn record_processed(&mut self) -> Result<()> {
    self.ensure_room()?;
    self.processed_rows += 1;
    Ok(())
  }

  /// Count a row that ended as an unmatched import or failed outright.
  pub fn record_error(&mut self) -> Result<()> {
    self.ensure_room()?;
    self.error_rows += 1;
    Ok(())
  }

  /// `processing → completed`; every row must be accounted for.
  pub fn complete(&mut self, at: DateTime<Utc>) -> Result<()> {
    self.ensure_open()?;
    if self.accounted() != self.total_rows {
      return Err(Error::IncompleteSession {
        session_id: self.session_id,
        accounted:  self.accounted(),
        total:      self.total_rows,
      });
    }
    self.status = SessionStatus::Completed;
    self.finished_at = Some(at);
    Ok(())
  }

  /// `processing → failed`.
  pub fn fail(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> Result<()> {
    self.ensure_open()?;
    self.status = SessionStatus::Failed;
    self.failure_reason = Some(reason.into());
    self.finished_at = Some(at);
    Ok(())
  }
}
