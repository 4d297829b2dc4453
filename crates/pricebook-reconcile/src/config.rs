//! Engine tuning knobs.

use std::time::Duration;

use pricebook_core::{resolver::AliasResolver, scorer::AcceptPolicy};
use serde::{Deserialize, Serialize};

/// Policy and resource limits of the reconciliation engine.
///
/// Every field has a default, so a partial `[reconcile]` table in the
/// configuration file is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
  /// Minimum confidence for an automatic commit.
  pub auto_accept_threshold: f64,
  /// A runner-up closer than this to the top candidate forces review.
  pub ambiguity_margin:      f64,
  /// Minimum similarity for a fuzzy alias match.
  pub fuzzy_threshold:       f64,
  pub ai_timeout_ms:         u64,
  /// Rows processed concurrently within one batch.
  pub workers:               usize,
  /// Retries of a store call that failed as unavailable.
  pub max_store_retries:     u32,
  /// Linear backoff step between those retries.
  pub retry_backoff_ms:      u64,
  /// Currency of rows that carry none.
  pub default_currency:      String,
}

impl Default for ReconcileConfig {
  fn default() -> Self {
    Self {
      auto_accept_threshold: 0.95,
      ambiguity_margin:      0.05,
      fuzzy_threshold:       0.8,
      ai_timeout_ms:         2000,
      workers:               4,
      max_store_retries:     3,
      retry_backoff_ms:      50,
      default_currency:      "RUB".into(),
    }
  }
}

impl ReconcileConfig {
  pub fn policy(&self) -> AcceptPolicy {
    AcceptPolicy {
      auto_accept_threshold: self.auto_accept_threshold,
      ambiguity_margin:      self.ambiguity_margin,
    }
  }

  pub fn resolver(&self) -> AliasResolver { AliasResolver::new(self.fuzzy_threshold) }

  pub fn ai_timeout(&self) -> Duration { Duration::from_millis(self.ai_timeout_ms) }

  pub fn retry_backoff(&self) -> Duration {
    Duration::from_millis(self.retry_backoff_ms)
  }

  /// Never zero.
  pub fn workers(&self) -> usize { self.workers.max(1) }
}
