//! Price observations and their validity intervals.
//!
//! An observation records that a source asserted a price for a material over a
//! window of calendar days. Observations are never deleted; superseding one
//! only closes its interval and clears its active flag.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{MaterialId, SourceType};

// ─── Interval ────────────────────────────────────────────────────────────────

/// An inclusive window of calendar days. `valid_to = None` is open-ended.
///
/// An interval whose end precedes its start is *void*: it covers no day. Void
/// intervals are what a same-day re-price leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
  pub valid_from: NaiveDate,
  pub valid_to:   Option<NaiveDate>,
}

impl Interval {
  pub fn open(valid_from: NaiveDate) -> Self {
    Self { valid_from, valid_to: None }
  }

  pub fn closed(valid_from: NaiveDate, valid_to: NaiveDate) -> Self {
    Self { valid_from, valid_to: Some(valid_to) }
  }

  pub fn is_open(&self) -> bool { self.valid_to.is_none() }

  pub fn is_void(&self) -> bool {
    self.valid_to.is_some_and(|to| to < self.valid_from)
  }

  pub fn contains(&self, date: NaiveDate) -> bool {
    !self.is_void()
      && self.valid_from <= date
      && self.valid_to.is_none_or(|to| date <= to)
  }

  /// Whether two non-void intervals share at least one day.
  pub fn overlaps(&self, other: &Interval) -> bool {
    if self.is_void() || other.is_void() {
      return false;
    }
    let starts_before_other_ends =
      other.valid_to.is_none_or(|to| self.valid_from <= to);
    let other_starts_before_end =
      self.valid_to.is_none_or(|to| other.valid_from <= to);
    starts_before_other_ends && other_starts_before_end
  }
}

impl fmt::Display for Interval {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.valid_to {
      Some(to) => write!(f, "[{}, {}]", self.valid_from, to),
      None => write!(f, "[{}, ∞)", self.valid_from),
    }
  }
}

// ─── Price line ──────────────────────────────────────────────────────────────

/// The partition inside which active intervals must not overlap: one logical
/// price per material, customer scope and source type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceLine {
  pub material_id: MaterialId,
  pub customer_id: Option<Uuid>,
  pub source_type: SourceType,
}

impl fmt::Display for PriceLine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.customer_id {
      Some(c) => write!(f, "{}/{}/{}", self.material_id, c, self.source_type),
      None => write!(f, "{}/global/{}", self.material_id, self.source_type),
    }
  }
}

// ─── Observation ─────────────────────────────────────────────────────────────

/// One row of a material's price history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceObservation {
  pub observation_id: Uuid,
  pub material_id:    MaterialId,
  pub price:          f64,
  pub currency:       String,
  /// The date the source asserted the price for.
  pub price_date:     NaiveDate,
  pub source_id:      Uuid,
  pub source_type:    SourceType,
  pub customer_id:    Option<Uuid>,
  pub vendor_id:      Option<Uuid>,
  pub is_active:      bool,
  #[serde(flatten)]
  pub interval:       Interval,
  pub recorded_at:    DateTime<Utc>,
}

impl PriceObservation {
  pub fn line(&self) -> PriceLine {
    PriceLine {
      material_id: self.material_id.clone(),
      customer_id: self.customer_id,
      source_type: self.source_type,
    }
  }

  pub fn same_price(&self, price: f64, currency: &str) -> bool {
    self.price == price && self.currency == currency
  }
}
