//! The `CatalogStore` trait: the persistence collaborator of the engine.
//!
//! The trait is implemented by storage backends (e.g.
//! `pricebook-store-sqlite`). The reconciliation engine and the HTTP API
//! depend on this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  catalog::{
    Alias, Customer, Material, MaterialId, NewAlias, NewPriceSource,
    PriceSource, SourceType, Vendor,
  },
  history::CommitPlan,
  observation::{PriceLine, PriceObservation},
  session::{ImportSession, NewImportSession},
  unmatched::{NewUnmatched, ResolutionStatus, UnmatchedImport},
};

/// Classification the engine needs from a backend error.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  /// Transient I/O failure; the operation may succeed when retried.
  fn is_unavailable(&self) -> bool;

  /// The write lost a race with a concurrent writer of the same price line.
  fn is_conflict(&self) -> bool { false }
}

/// Parameters for [`CatalogStore::list_unmatched`].
#[derive(Debug, Clone, Default)]
pub struct UnmatchedQuery {
  pub session_id: Option<Uuid>,
  pub status:     Option<ResolutionStatus>,
  pub limit:      Option<usize>,
}

/// Abstraction over a catalog store backend.
///
/// Price observations are append-only apart from the supersession fields
/// (`is_active`, `valid_to`), and those change only through
/// [`CatalogStore::apply_commit`] and [`CatalogStore::apply_resolution`],
/// both atomic.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait CatalogStore: Send + Sync {
  type Error: StoreError;

  // ── Catalog ───────────────────────────────────────────────────────────

  /// Insert or replace a material, keyed by its id.
  fn upsert_material(
    &self,
    material: Material,
  ) -> impl Future<Output = Result<Material, Self::Error>> + Send + '_;

  fn get_material<'a>(
    &'a self,
    id: &'a MaterialId,
  ) -> impl Future<Output = Result<Option<Material>, Self::Error>> + Send + 'a;

  fn list_materials(
    &self,
    active_only: bool,
  ) -> impl Future<Output = Result<Vec<Material>, Self::Error>> + Send + '_;

  fn add_customer(
    &self,
    name: String,
    preferred_source_type: SourceType,
  ) -> impl Future<Output = Result<Customer, Self::Error>> + Send + '_;

  fn get_customer(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Customer>, Self::Error>> + Send + '_;

  /// Ordered by name.
  fn list_customers(
    &self,
  ) -> impl Future<Output = Result<Vec<Customer>, Self::Error>> + Send + '_;

  fn add_vendor(
    &self,
    name: String,
    website_url: Option<String>,
  ) -> impl Future<Output = Result<Vendor, Self::Error>> + Send + '_;

  fn get_vendor(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Vendor>, Self::Error>> + Send + '_;

  /// Ordered by name.
  fn list_vendors(
    &self,
  ) -> impl Future<Output = Result<Vec<Vendor>, Self::Error>> + Send + '_;

  fn add_price_source(
    &self,
    input: NewPriceSource,
  ) -> impl Future<Output = Result<PriceSource, Self::Error>> + Send + '_;

  fn get_price_source(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<PriceSource>, Self::Error>> + Send + '_;

  /// The oldest source with this type and name, if any.
  fn find_price_source<'a>(
    &'a self,
    source_type: SourceType,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<PriceSource>, Self::Error>> + Send + 'a;

  // ── Aliases ───────────────────────────────────────────────────────────

  /// Aliases whose folded text equals `folded`, visible to `customer_id`:
  /// the customer's own aliases first, then global ones.
  fn find_aliases<'a>(
    &'a self,
    folded: &'a str,
    customer_id: Option<Uuid>,
  ) -> impl Future<Output = Result<Vec<Alias>, Self::Error>> + Send + 'a;

  /// Every alias visible to `customer_id` (its own plus global ones). With
  /// `None`, global aliases only.
  fn aliases_for_scope(
    &self,
    customer_id: Option<Uuid>,
  ) -> impl Future<Output = Result<Vec<Alias>, Self::Error>> + Send + '_;

  /// Insert an alias. If `(material, customer, alias_text)` already exists
  /// the existing alias is returned unchanged.
  fn insert_alias(
    &self,
    input: NewAlias,
  ) -> impl Future<Output = Result<Alias, Self::Error>> + Send + '_;

  /// Count one more exact resolution through this alias.
  fn record_alias_use(
    &self,
    alias_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Price history ─────────────────────────────────────────────────────

  /// All observations of one price line, voided ones included.
  fn line_observations<'a>(
    &'a self,
    line: &'a PriceLine,
  ) -> impl Future<Output = Result<Vec<PriceObservation>, Self::Error>> + Send + 'a;

  /// All observations of a material across every line, ordered by line and
  /// `valid_from`.
  fn material_observations<'a>(
    &'a self,
    id: &'a MaterialId,
  ) -> impl Future<Output = Result<Vec<PriceObservation>, Self::Error>> + Send + 'a;

  /// Apply a commit plan in one transaction: every row it touches changes,
  /// or none does.
  fn apply_commit<'a>(
    &'a self,
    plan: &'a CommitPlan,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Import sessions ───────────────────────────────────────────────────

  fn create_session(
    &self,
    input: NewImportSession,
  ) -> impl Future<Output = Result<ImportSession, Self::Error>> + Send + '_;

  fn get_session(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<ImportSession>, Self::Error>> + Send + '_;

  /// Persist the counters and status of a session snapshot.
  fn save_session<'a>(
    &'a self,
    session: &'a ImportSession,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Atomically claim a row fingerprint within a session. Returns `false`
  /// when the fingerprint was already claimed (a duplicate row).
  fn claim_row<'a>(
    &'a self,
    session_id: Uuid,
    fingerprint: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Unmatched imports ─────────────────────────────────────────────────

  /// Insert a pending unmatched import. The row's fingerprint is claimed in
  /// the same transaction, so a later identical row of the session is a
  /// duplicate even when [`CatalogStore::claim_row`] never succeeded for it.
  fn insert_unmatched(
    &self,
    input: NewUnmatched,
  ) -> impl Future<Output = Result<UnmatchedImport, Self::Error>> + Send + '_;

  fn get_unmatched(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<UnmatchedImport>, Self::Error>> + Send + '_;

  /// Newest first.
  fn list_unmatched<'a>(
    &'a self,
    query: &'a UnmatchedQuery,
  ) -> impl Future<Output = Result<Vec<UnmatchedImport>, Self::Error>> + Send + 'a;

  /// Apply `plan` and move the unmatched import `id` from `pending` to
  /// `resolved` (material, the plan's observation, `at`) in one transaction.
  ///
  /// Returns `false`, with nothing written, when the row was no longer
  /// pending. A stale plan fails like [`CatalogStore::apply_commit`].
  fn apply_resolution<'a>(
    &'a self,
    plan: &'a CommitPlan,
    id: Uuid,
    material_id: &'a MaterialId,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// `pending → rejected`. Returns `false` if the row was not pending.
  fn mark_rejected(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}
