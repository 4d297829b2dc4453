//! Handlers for `/customers` and `/vendors`.
//!
//! Both lists are read-only and ordered by name.

use std::sync::Arc;

use axum::{Json, extract::State};
use pricebook_core::{
  catalog::{Customer, Vendor},
  store::CatalogStore,
  suggest::Suggester,
};
use pricebook_reconcile::{Error, Reconciler};

use crate::error::ApiError;

/// `GET /customers`
pub async fn customers<S, A>(
  State(reconciler): State<Arc<Reconciler<S, A>>>,
) -> Result<Json<Vec<Customer>>, ApiError>
where
  S: CatalogStore + 'static,
  A: Suggester + 'static,
{
  let customers = reconciler.store().list_customers().await.map_err(Error::store)?;
  Ok(Json(customers))
}

/// `GET /vendors`
pub async fn vendors<S, A>(
  State(reconciler): State<Arc<Reconciler<S, A>>>,
) -> Result<Json<Vec<Vendor>>, ApiError>
where
  S: CatalogStore + 'static,
  A: Suggester + 'static,
{
  let vendors = reconciler.store().list_vendors().await.map_err(Error::store)?;
  Ok(Json(vendors))
}
