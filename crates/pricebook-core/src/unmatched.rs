//! Raw rows and the manual-review queue they fall into when they cannot be
//! matched automatically.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::MaterialId;

/// A pre-tokenised price line item as emitted by an upstream parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
  pub raw_name:    String,
  #[serde(default)]
  pub raw_price:   Option<f64>,
  #[serde(default)]
  pub raw_unit:    Option<String>,
  #[serde(default)]
  pub raw_article: Option<String>,
  pub source_id:   Uuid,
  /// Overrides the configured default currency.
  #[serde(default)]
  pub currency:    Option<String>,
  /// Overrides the source's document date.
  #[serde(default)]
  pub price_date:  Option<NaiveDate>,
}

impl RawRow {
  pub fn new(raw_name: impl Into<String>, raw_price: f64, source_id: Uuid) -> Self {
    Self {
      raw_name: raw_name.into(),
      raw_price: Some(raw_price),
      raw_unit: None,
      raw_article: None,
      source_id,
      currency: None,
      price_date: None,
    }
  }
}

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
pub enum ResolutionStatus {
  Pending,
  Resolved,
  Rejected,
}

/// Why a row was queued for review instead of committed.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueueReason {
  /// No alias and no AI suggestion matched at all.
  NoCandidate,
  /// The best candidates were too close to call.
  AmbiguousMatch,
  /// The best candidate stayed below the auto-accept threshold.
  LowConfidence,
  /// Matched, but the row carries no usable price.
  MissingPrice,
  /// Blank name or nonsensical price.
  MalformedRow,
  /// The price contradicts the material's recorded history.
  TemporalConflict,
  /// The catalog store kept failing for this row.
  StoreUnavailable,
}

/// A raw row awaiting (or having received) manual resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmatchedImport {
  pub unmatched_id:          Uuid,
  pub session_id:            Uuid,
  pub raw_name:              String,
  pub raw_price:             Option<f64>,
  pub raw_unit:              Option<String>,
  pub raw_article:           Option<String>,
  pub source_id:             Uuid,
  pub currency:              String,
  pub price_date:            NaiveDate,
  /// Duplicate-detection key of the raw row within its session.
  pub fingerprint:           String,
  pub suggested_material_id: Option<MaterialId>,
  pub suggested_confidence:  Option<f64>,
  pub reason:                QueueReason,
  pub resolution_status:     ResolutionStatus,
  /// Set only by manual resolution.
  pub resolved_material_id:  Option<MaterialId>,
  /// The observation committed on resolution.
  pub observation_id:        Option<Uuid>,
  pub created_at:            DateTime<Utc>,
  pub resolved_at:           Option<DateTime<Utc>>,
}

/// Input to [`crate::store::CatalogStore::insert_unmatched`].
#[derive(Debug, Clone)]
pub struct NewUnmatched {
  pub session_id:            Uuid,
  pub row:                   RawRow,
  pub currency:              String,
  pub price_date:            NaiveDate,
  pub fingerprint:           String,
  pub suggested_material_id: Option<MaterialId>,
  pub suggested_confidence:  Option<f64>,
  pub reason:                QueueReason,
}
