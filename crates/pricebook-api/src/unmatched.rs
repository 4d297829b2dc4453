//! Handlers for the review queue.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/unmatched` | Optional `session_id`, `status`, `limit`; newest first |
//! | `GET`  | `/unmatched/{id}` | One unmatched import |
//! | `POST` | `/unmatched/{id}/resolve` | Body: `{"material_id":"..."}` |
//! | `POST` | `/unmatched/{id}/reject` | No body |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use pricebook_core::{
  catalog::MaterialId,
  store::{CatalogStore, UnmatchedQuery},
  suggest::Suggester,
  unmatched::{ResolutionStatus, UnmatchedImport},
};
use pricebook_reconcile::{Reconciler, ResolutionOutcome};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub session_id: Option<Uuid>,
  /// Defaults to `pending`; `all` lifts the filter.
  pub status:     Option<String>,
  pub limit:      Option<usize>,
}

/// `GET /unmatched[?session_id=...][&status=pending|resolved|rejected|all][&limit=N]`
pub async fn list<S, A>(
  State(reconciler): State<Arc<Reconciler<S, A>>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<UnmatchedImport>>, ApiError>
where
  S: CatalogStore + 'static,
  A: Suggester + 'static,
{
  let status = match params.status.as_deref() {
    None => Some(ResolutionStatus::Pending),
    Some("all") => None,
    Some(s) => Some(
      s.parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown status {s:?}")))?,
    ),
  };
  let query = UnmatchedQuery {
    session_id: params.session_id,
    status,
    limit: params.limit,
  };
  Ok(Json(reconciler.list_unmatched(&query).await?))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /unmatched/{id}`
pub async fn get_one<S, A>(
  State(reconciler): State<Arc<Reconciler<S, A>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<UnmatchedImport>, ApiError>
where
  S: CatalogStore + 'static,
  A: Suggester + 'static,
{
  Ok(Json(reconciler.unmatched(id).await?))
}

// ─── Decide ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
  pub material_id: MaterialId,
}

/// `POST /unmatched/{id}/resolve`
///
/// Repeating the same resolution returns the original outcome with
/// `"replayed": true`.
pub async fn resolve<S, A>(
  State(reconciler): State<Arc<Reconciler<S, A>>>,
  Path(id): Path<Uuid>,
  Json(body): Json<ResolveBody>,
) -> Result<Json<ResolutionOutcome>, ApiError>
where
  S: CatalogStore + 'static,
  A: Suggester + 'static,
{
  Ok(Json(reconciler.resolve(id, body.material_id).await?))
}

/// `POST /unmatched/{id}/reject`
pub async fn reject<S, A>(
  State(reconciler): State<Arc<Reconciler<S, A>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<UnmatchedImport>, ApiError>
where
  S: CatalogStore + 'static,
  A: Suggester + 'static,
{
  Ok(Json(reconciler.reject(id).await?))
}
