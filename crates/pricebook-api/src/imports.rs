//! Handlers for batch imports and their sessions.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/imports` | Body: [`ImportBatch`]; runs it, returns 201 + [`ImportReport`] |
//! | `GET`  | `/sessions/{id}` | One import session |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use pricebook_core::{session::ImportSession, store::CatalogStore, suggest::Suggester};
use pricebook_reconcile::{ImportBatch, Reconciler};
use uuid::Uuid;

use crate::error::ApiError;

/// `POST /imports`
///
/// The batch runs to completion before the response is sent. Rows that could
/// not be matched show up as `queued` with their unmatched import ids.
pub async fn create<S, A>(
  State(reconciler): State<Arc<Reconciler<S, A>>>,
  Json(batch): Json<ImportBatch>,
) -> Result<impl IntoResponse, ApiError>
where
  S: CatalogStore + 'static,
  A: Suggester + 'static,
{
  let report = reconciler.import(batch).await?;
  Ok((StatusCode::CREATED, Json(report)))
}

/// `GET /sessions/{id}`
pub async fn get_session<S, A>(
  State(reconciler): State<Arc<Reconciler<S, A>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<ImportSession>, ApiError>
where
  S: CatalogStore + 'static,
  A: Suggester + 'static,
{
  Ok(Json(reconciler.session(id).await?))
}
