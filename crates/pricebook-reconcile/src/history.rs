//! The Price History Manager: serialised commits and as-of queries.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use pricebook_core::{
  catalog::MaterialId,
  history::{CommitPlan, CommitRequest, plan_commit, select_price},
  observation::PriceObservation,
  store::{CatalogStore, StoreError as _},
};
use uuid::Uuid;

use crate::{Error, Result, locks::KeyedLocks};

/// Re-plans allowed when another writer changed the line between read and
/// write.
const MAX_REPLANS: u32 = 3;

/// Commits observations one material at a time.
///
/// Read, plan and apply form a critical section per material id; commits for
/// different materials run fully in parallel.
pub struct PriceHistory<S> {
  store: Arc<S>,
  locks: Arc<KeyedLocks<MaterialId>>,
}

impl<S> Clone for PriceHistory<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), locks: Arc::clone(&self.locks) }
  }
}

impl<S: CatalogStore> PriceHistory<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store, locks: Arc::new(KeyedLocks::new()) }
  }

  /// Record `request` in its price line.
  ///
  /// Returns the applied plan; [`CommitPlan::observation_id`] names the
  /// observation that now asserts the price. A contradiction with closed
  /// history is an [`Error::TemporalConflict`] and changes nothing.
  pub async fn commit(&self, request: &CommitRequest) -> Result<CommitPlan> {
    let (plan, _) = self.commit_with(request, None).await?;
    Ok(plan)
  }

  /// Commit `request` and resolve the unmatched import `unmatched_id` to its
  /// material in the same store transaction.
  ///
  /// `None` means the row was no longer pending; nothing was written.
  pub async fn commit_resolution(
    &self,
    request: &CommitRequest,
    unmatched_id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<Option<CommitPlan>> {
    let (plan, applied) = self.commit_with(request, Some((unmatched_id, at))).await?;
    Ok(applied.then_some(plan))
  }

  async fn commit_with(
    &self,
    request: &CommitRequest,
    resolution: Option<(Uuid, DateTime<Utc>)>,
  ) -> Result<(CommitPlan, bool)> {
    let _guard = self.locks.lock(&request.material_id).await;
    let line = request.line();

    let mut replans = 0;
    loop {
      let existing = self
        .store
        .line_observations(&line)
        .await
        .map_err(Error::store)?;
      let plan = plan_commit(&existing, request, Utc::now())?;

      let applied = match resolution {
        None => self.store.apply_commit(&plan).await.map(|()| true),
        Some((unmatched_id, at)) => {
          self
            .store
            .apply_resolution(&plan, unmatched_id, &request.material_id, at)
            .await
        }
      };

      match applied {
        Ok(false) => return Ok((plan, false)),
        Ok(true) => {
          match &plan {
            CommitPlan::Unchanged { .. } | CommitPlan::Extend { .. } => {
              tracing::debug!(
                %line,
                date = %request.date,
                action = plan.action(),
                "price confirmed"
              );
            }
            _ => tracing::info!(
              %line,
              date = %request.date,
              price = request.price,
              currency = %request.currency,
              action = plan.action(),
              observation_id = %plan.observation_id(),
              "price committed"
            ),
          }
          return Ok((plan, true));
        }
        Err(e) if e.is_conflict() && replans < MAX_REPLANS => {
          replans += 1;
          tracing::warn!(%line, replans, "price line changed before commit, re-planning");
        }
        Err(e) => return Err(Error::store(e)),
      }
    }
  }

  /// The price of `material_id` on `date` as seen by `customer_id`.
  pub async fn price_as_of(
    &self,
    material_id: &MaterialId,
    date: NaiveDate,
    customer_id: Option<Uuid>,
  ) -> Result<Option<PriceObservation>> {
    self.ensure_material(material_id).await?;
    let customer = match customer_id {
      Some(id) => Some(
        self
          .store
          .get_customer(id)
          .await
          .map_err(Error::store)?
          .ok_or(Error::CustomerNotFound(id))?,
      ),
      None => None,
    };

    let observations = self
      .store
      .material_observations(material_id)
      .await
      .map_err(Error::store)?;
    Ok(select_price(&observations, date, customer.as_ref()).cloned())
  }

  /// Every observation of `material_id`, voided ones included, ordered by
  /// price line and `valid_from`.
  pub async fn history(
    &self,
    material_id: &MaterialId,
  ) -> Result<Vec<PriceObservation>> {
    self.ensure_material(material_id).await?;
    self
      .store
      .material_observations(material_id)
      .await
      .map_err(Error::store)
  }

  async fn ensure_material(&self, material_id: &MaterialId) -> Result<()> {
    self
      .store
      .get_material(material_id)
      .await
      .map_err(Error::store)?
      .map(|_| ())
      .ok_or_else(|| Error::MaterialNotFound(material_id.clone()))
  }
}
