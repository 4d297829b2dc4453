//! Temporal price-history planning.
//!
//! [`plan_commit`] decides how a new price observation changes a price line;
//! the storage layer then applies the returned [`CommitPlan`] atomically.
//! [`check_line`] is the invariant checker every plan is validated against.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
  Error, Result,
  catalog::{Customer, MaterialId, PriceSource},
  observation::{Interval, PriceLine, PriceObservation},
};

// ─── Requests and plans ──────────────────────────────────────────────────────

/// A price asserted by `source` for `material_id` on `date`.
#[derive(Debug, Clone)]
pub struct CommitRequest {
  pub material_id: MaterialId,
  pub price:       f64,
  pub currency:    String,
  pub date:        NaiveDate,
  pub source:      PriceSource,
}

impl CommitRequest {
  pub fn line(&self) -> PriceLine {
    PriceLine {
      material_id: self.material_id.clone(),
      customer_id: self.source.customer_id,
      source_type: self.source.source_type,
    }
  }

  fn observation(
    &self,
    interval: Interval,
    is_active: bool,
    now: DateTime<Utc>,
  ) -> PriceObservation {
    PriceObservation {
      observation_id: Uuid::new_v4(),
      material_id: self.material_id.clone(),
      price: self.price,
      currency: self.currency.clone(),
      price_date: self.date,
      source_id: self.source.source_id,
      source_type: self.source.source_type,
      customer_id: self.source.customer_id,
      vendor_id: self.source.vendor_id,
      is_active,
      interval,
      recorded_at: now,
    }
  }
}

/// The minimal change to a price line that records a [`CommitRequest`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CommitPlan {
  /// An existing observation already asserts this price on this date.
  Unchanged { observation_id: Uuid },
  /// The active observation ended before the date; stretch it to cover it.
  Extend {
    observation_id: Uuid,
    valid_to:       NaiveDate,
  },
  /// Close the active observation and open a new one.
  Supersede {
    closed_id: Uuid,
    closed_to: NaiveDate,
    opened:    PriceObservation,
  },
  /// Open the first active observation of the line.
  Open(PriceObservation),
  /// Late-arriving data: a closed row before the current history.
  InsertHistorical(PriceObservation),
}

impl CommitPlan {
  /// The observation that now asserts the committed price.
  pub fn observation_id(&self) -> Uuid {
    match self {
      Self::Unchanged { observation_id }
      | Self::Extend { observation_id, .. } => *observation_id,
      Self::Supersede { opened, .. } => opened.observation_id,
      Self::Open(o) | Self::InsertHistorical(o) => o.observation_id,
    }
  }

  /// The observation this plan inserts, if any.
  pub fn inserted(&self) -> Option<&PriceObservation> {
    match self {
      Self::Supersede { opened, .. } => Some(opened),
      Self::Open(o) | Self::InsertHistorical(o) => Some(o),
      Self::Unchanged { .. } | Self::Extend { .. } => None,
    }
  }

  /// Short label for logs.
  pub fn action(&self) -> &'static str {
    match self {
      Self::Unchanged { .. } => "unchanged",
      Self::Extend { .. } => "extend",
      Self::Supersede { .. } => "supersede",
      Self::Open(_) => "open",
      Self::InsertHistorical(_) => "insert_historical",
    }
  }

  /// Apply this plan to an in-memory copy of a price line.
  pub fn apply_to(&self, rows: &mut Vec<PriceObservation>) {
    match self {
      Self::Unchanged { .. } => {}
      Self::Extend { observation_id, valid_to } => {
        if let Some(row) =
          rows.iter_mut().find(|r| r.observation_id == *observation_id)
        {
          row.interval.valid_to = Some(*valid_to);
        }
      }
      Self::Supersede { closed_id, closed_to, opened } => {
        if let Some(row) =
          rows.iter_mut().find(|r| r.observation_id == *closed_id)
        {
          row.is_active = false;
          row.interval.valid_to = Some(*closed_to);
        }
        rows.push(opened.clone());
      }
      Self::Open(o) | Self::InsertHistorical(o) => rows.push(o.clone()),
    }
  }
}

// ─── Planner ─────────────────────────────────────────────────────────────────

fn day_before(date: NaiveDate) -> NaiveDate {
  date.pred_opt().unwrap_or(NaiveDate::MIN)
}

/// Decide how `request` changes its price line.
///
/// `existing` may contain rows of other lines; they are ignored. Returns
/// [`Error::TemporalConflict`] when the request contradicts a closed interval
/// or the resulting line would fail [`check_line`].
pub fn plan_commit(
  existing: &[PriceObservation],
  request: &CommitRequest,
  now: DateTime<Utc>,
) -> Result<CommitPlan> {
  let line = request.line();
  let date = request.date;
  let rows: Vec<&PriceObservation> = existing
    .iter()
    .filter(|o| o.line() == line && !o.interval.is_void())
    .collect();

  let conflict = |detail: String| Error::TemporalConflict {
    line: line.clone(),
    date,
    detail,
  };

  let active = rows.iter().copied().find(|o| o.is_active);
  let containing = rows.iter().copied().find(|o| o.interval.contains(date));

  let plan = match (containing, active) {
    (Some(row), _) if row.same_price(request.price, &request.currency) => {
      CommitPlan::Unchanged { observation_id: row.observation_id }
    }
    (Some(row), _) if row.is_active => CommitPlan::Supersede {
      closed_id: row.observation_id,
      closed_to: day_before(date),
      opened:    request.observation(Interval::open(date), true, now),
    },
    (Some(row), _) => {
      return Err(conflict(format!(
        "price {} {} contradicts closed observation {} ({} {}) over {}",
        request.price,
        request.currency,
        row.observation_id,
        row.price,
        row.currency,
        row.interval,
      )));
    }
    // The active row is bounded and ended before `date`.
    (None, Some(a)) if a.interval.valid_from <= date => {
      if a.same_price(request.price, &request.currency) {
        CommitPlan::Extend { observation_id: a.observation_id, valid_to: date }
      } else {
        CommitPlan::Supersede {
          closed_id: a.observation_id,
          closed_to: a.interval.valid_to.unwrap_or_else(|| day_before(date)),
          opened:    request.observation(Interval::open(date), true, now),
        }
      }
    }
    (None, _) => {
      let next_start = rows
        .iter()
        .map(|o| o.interval.valid_from)
        .filter(|from| *from > date)
        .min();
      match next_start {
        Some(next) => CommitPlan::InsertHistorical(request.observation(
          Interval::closed(date, day_before(next)),
          false,
          now,
        )),
        None => {
          CommitPlan::Open(request.observation(Interval::open(date), true, now))
        }
      }
    }
  };

  let mut simulated: Vec<PriceObservation> =
    rows.into_iter().cloned().collect();
  plan.apply_to(&mut simulated);
  check_line(&simulated).map_err(|v| conflict(v.to_string()))?;

  Ok(plan)
}

// ─── Invariant checker ───────────────────────────────────────────────────────

/// A broken price-history invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
  #[error("observations {0} and {1} are both active")]
  MultipleActive(Uuid, Uuid),

  #[error("observations {0} and {1} have overlapping intervals")]
  Overlap(Uuid, Uuid),

  #[error("active observation {active} starts before observation {later}")]
  ActiveNotLatest { active: Uuid, later: Uuid },
}

/// Check the rows of a single price line.
///
/// At most one row is active, no two non-void intervals overlap, and the
/// active row is the latest one.
pub fn check_line(rows: &[PriceObservation]) -> Result<(), Violation> {
  let live: Vec<&PriceObservation> =
    rows.iter().filter(|o| !o.interval.is_void()).collect();

  let mut active: Option<&PriceObservation> = None;
  for row in rows.iter().filter(|o| o.is_active) {
    if let Some(first) = active {
      return Err(Violation::MultipleActive(
        first.observation_id,
        row.observation_id,
      ));
    }
    active = Some(row);
  }

  for (i, a) in live.iter().enumerate() {
    for b in &live[i + 1..] {
      if a.interval.overlaps(&b.interval) {
        return Err(Violation::Overlap(a.observation_id, b.observation_id));
      }
    }
  }

  if let Some(active) = active
    && let Some(later) = live
      .iter()
      .find(|o| o.interval.valid_from > active.interval.valid_from)
  {
    return Err(Violation::ActiveNotLatest {
      active: active.observation_id,
      later:  later.observation_id,
    });
  }

  Ok(())
}

/// Check every price line present in `rows`.
pub fn check_invariants(rows: &[PriceObservation]) -> Result<(), Violation> {
  let mut lines: HashMap<PriceLine, Vec<PriceObservation>> = HashMap::new();
  for row in rows {
    lines.entry(row.line()).or_default().push(row.clone());
  }
  lines.values().try_for_each(|line| check_line(line))
}

// ─── As-of selection ─────────────────────────────────────────────────────────

/// Pick the price of a material on `date` for `customer`.
///
/// Only observations whose interval covers `date` qualify, and only global
/// ones or the customer's own. Preference: the customer's own rows, then the
/// customer's preferred source type, then invoice > website > manual >
/// import, then the most recent interval.
pub fn select_price<'a>(
  observations: &'a [PriceObservation],
  date: NaiveDate,
  customer: Option<&Customer>,
) -> Option<&'a PriceObservation> {
  let customer_id = customer.map(|c| c.customer_id);
  let preferred = customer.map(|c| c.preferred_source_type);

  observations
    .iter()
    .filter(|o| o.interval.contains(date))
    .filter(|o| o.customer_id.is_none() || o.customer_id == customer_id)
    .min_by_key(|o| {
      let scope_rank = u8::from(o.customer_id.is_none());
      let source_rank = if Some(o.source_type) == preferred {
        0
      } else {
        1 + o.source_type.preference_rank()
      };
      (
        scope_rank,
        source_rank,
        std::cmp::Reverse(o.interval.valid_from),
        std::cmp::Reverse(o.recorded_at),
      )
    })
}
