//! The async reconciliation engine of Pricebook.
//!
//! [`Reconciler`] takes batches of raw supplier rows through alias
//! resolution, scoring and the optional AI suggester, commits accepted rows
//! into the temporal price history and queues the rest for manual review.
//! It works against any [`pricebook_core::store::CatalogStore`].
//!
//! ```rust,ignore
//! let reconciler = Reconciler::new(store, NoSuggester, ReconcileConfig::default());
//! let report = reconciler.import(batch).await?;
//! ```

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod history;
pub mod locks;
pub mod migrate;
pub mod pipeline;
pub mod resolution;
pub mod session;

pub use config::ReconcileConfig;
pub use error::{Error, Result};
pub use history::PriceHistory;
pub use locks::KeyedLocks;
pub use migrate::{LegacyMaterial, MigrationReport};
pub use pipeline::{ImportBatch, ImportReport, Reconciler, RowOutcome, RowReport};
pub use resolution::ResolutionOutcome;
pub use session::SessionTracker;

#[cfg(test)]
mod tests;
