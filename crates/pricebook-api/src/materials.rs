//! Handlers for `/materials` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/materials` | Active materials; `?include_inactive=true` for all |
//! | `GET`  | `/materials/{id}` | One material |
//! | `GET`  | `/materials/{id}/price` | Optional `as_of` (default today) and `customer_id` |
//! | `GET`  | `/materials/{id}/history` | Every observation, voided ones included |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::{NaiveDate, Utc};
use pricebook_core::{
  catalog::{Material, MaterialId},
  observation::PriceObservation,
  store::CatalogStore,
  suggest::Suggester,
};
use pricebook_reconcile::{Error, Reconciler};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

// ─── Catalog ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  #[serde(default)]
  pub include_inactive: bool,
}

/// `GET /materials[?include_inactive=true]`
pub async fn list<S, A>(
  State(reconciler): State<Arc<Reconciler<S, A>>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Material>>, ApiError>
where
  S: CatalogStore + 'static,
  A: Suggester + 'static,
{
  let materials = reconciler
    .store()
    .list_materials(!params.include_inactive)
    .await
    .map_err(Error::store)?;
  Ok(Json(materials))
}

/// `GET /materials/{id}`
pub async fn get_one<S, A>(
  State(reconciler): State<Arc<Reconciler<S, A>>>,
  Path(id): Path<String>,
) -> Result<Json<Material>, ApiError>
where
  S: CatalogStore + 'static,
  A: Suggester + 'static,
{
  let id = MaterialId::from(id);
  let material = reconciler
    .store()
    .get_material(&id)
    .await
    .map_err(Error::store)?
    .ok_or_else(|| ApiError::NotFound(format!("material {id} not found")))?;
  Ok(Json(material))
}

// ─── Prices ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PriceParams {
  /// Calendar day to price on. Defaults to today (UTC).
  pub as_of:       Option<NaiveDate>,
  /// Price as seen by this customer; global prices only when absent.
  pub customer_id: Option<Uuid>,
}

/// `GET /materials/{id}/price[?as_of=YYYY-MM-DD][&customer_id=...]`
pub async fn price<S, A>(
  State(reconciler): State<Arc<Reconciler<S, A>>>,
  Path(id): Path<String>,
  Query(params): Query<PriceParams>,
) -> Result<Json<PriceObservation>, ApiError>
where
  S: CatalogStore + 'static,
  A: Suggester + 'static,
{
  let id = MaterialId::from(id);
  let date = params.as_of.unwrap_or_else(|| Utc::now().date_naive());
  let observation = reconciler
    .history()
    .price_as_of(&id, date, params.customer_id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("no price for {id} on {date}")))?;
  Ok(Json(observation))
}

/// `GET /materials/{id}/history`
pub async fn history<S, A>(
  State(reconciler): State<Arc<Reconciler<S, A>>>,
  Path(id): Path<String>,
) -> Result<Json<Vec<PriceObservation>>, ApiError>
where
  S: CatalogStore + 'static,
  A: Suggester + 'static,
{
  let id = MaterialId::from(id);
  Ok(Json(reconciler.history().history(&id).await?))
}
