//! Manual review of unmatched imports.

use chrono::Utc;
use pricebook_core::{
  catalog::{AliasProvenance, MaterialId, NewAlias},
  history::CommitRequest,
  session::ImportSession,
  store::{CatalogStore, UnmatchedQuery},
  suggest::Suggester,
  unmatched::{ResolutionStatus, UnmatchedImport},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{Error, Result, pipeline::Reconciler};

/// Result of resolving an unmatched import.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionOutcome {
  pub unmatched:      UnmatchedImport,
  pub observation_id: Uuid,
  /// The row was already resolved to the same material; nothing changed.
  pub replayed:       bool,
}

impl<S: CatalogStore, A: Suggester> Reconciler<S, A> {
  /// Commit the stored row data as a price of `material_id` and close the
  /// unmatched import.
  ///
  /// Repeating a resolution to the same material returns the original
  /// outcome. The raw name is learned as a manual alias, scoped to the
  /// session's customer.
  pub async fn resolve(
    &self,
    unmatched_id: Uuid,
    material_id: MaterialId,
  ) -> Result<ResolutionOutcome> {
    let _guard = self.resolution_locks.lock(&unmatched_id).await;
    let mut unmatched = self.unmatched(unmatched_id).await?;

    match (unmatched.resolution_status, unmatched.observation_id) {
      (ResolutionStatus::Pending, _) => {}
      (ResolutionStatus::Resolved, Some(observation_id))
        if unmatched.resolved_material_id.as_ref() == Some(&material_id) =>
      {
        tracing::debug!(%unmatched_id, %material_id, "resolution replayed");
        return Ok(ResolutionOutcome { unmatched, observation_id, replayed: true });
      }
      (status, _) => {
        return Err(Error::AlreadyResolved { id: unmatched_id, status });
      }
    }

    let (store, material_ref) = (&**self.store(), &material_id);
    let material = self
      .retry("load material", || async move {
        store.get_material(material_ref).await.map_err(Error::store)
      })
      .await?
      .ok_or_else(|| Error::MaterialNotFound(material_id.clone()))?;
    let price = unmatched
      .raw_price
      .filter(|p| p.is_finite() && *p >= 0.0)
      .ok_or(Error::MissingPrice(unmatched_id))?;
    let source_id = unmatched.source_id;
    let source = self
      .retry("load price source", || async move {
        store.get_price_source(source_id).await.map_err(Error::store)
      })
      .await?
      .ok_or(Error::SourceNotFound(source_id))?;

    let request = CommitRequest {
      material_id: material.material_id.clone(),
      price,
      currency: unmatched.currency.clone(),
      date: unmatched.price_date,
      source,
    };
    let now = Utc::now();
    let (history, request_ref) = (self.history(), &request);
    let committed = self
      .retry("commit resolution", || {
        history.commit_resolution(request_ref, unmatched_id, now)
      })
      .await?;
    let Some(plan) = committed else {
      // Another engine decided the row since we read it; nothing was written.
      let current = self.unmatched(unmatched_id).await?;
      return match (current.resolution_status, current.observation_id) {
        (ResolutionStatus::Resolved, Some(observation_id))
          if current.resolved_material_id.as_ref() == Some(&material_id) =>
        {
          Ok(ResolutionOutcome { unmatched: current, observation_id, replayed: true })
        }
        (status, _) => Err(Error::AlreadyResolved { id: unmatched_id, status }),
      };
    };
    let observation_id = plan.observation_id();

    self.learn_manual_alias(&unmatched, &material_id).await;
    tracing::info!(
      %unmatched_id,
      %material_id,
      %observation_id,
      action = plan.action(),
      "unmatched import resolved"
    );

    unmatched.resolution_status = ResolutionStatus::Resolved;
    unmatched.resolved_material_id = Some(material_id);
    unmatched.observation_id = Some(observation_id);
    unmatched.resolved_at = Some(now);
    Ok(ResolutionOutcome { unmatched, observation_id, replayed: false })
  }

  /// Close an unmatched import without committing anything. Rejecting twice
  /// is a no-op.
  pub async fn reject(&self, unmatched_id: Uuid) -> Result<UnmatchedImport> {
    let _guard = self.resolution_locks.lock(&unmatched_id).await;
    let mut unmatched = self.unmatched(unmatched_id).await?;

    match unmatched.resolution_status {
      ResolutionStatus::Pending => {}
      ResolutionStatus::Rejected => return Ok(unmatched),
      status => return Err(Error::AlreadyResolved { id: unmatched_id, status }),
    }

    let store = &**self.store();
    let now = Utc::now();
    let marked = self
      .retry("mark rejected", || async move {
        store.mark_rejected(unmatched_id, now).await.map_err(Error::store)
      })
      .await?;
    if !marked {
      let current = self.unmatched(unmatched_id).await?;
      return match current.resolution_status {
        ResolutionStatus::Rejected => Ok(current),
        status => Err(Error::AlreadyResolved { id: unmatched_id, status }),
      };
    }

    tracing::info!(%unmatched_id, raw_name = %unmatched.raw_name, "unmatched import rejected");
    unmatched.resolution_status = ResolutionStatus::Rejected;
    unmatched.resolved_at = Some(now);
    Ok(unmatched)
  }

  // ─── Queries ───────────────────────────────────────────────────────────────

  pub async fn unmatched(&self, unmatched_id: Uuid) -> Result<UnmatchedImport> {
    self
      .store()
      .get_unmatched(unmatched_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::UnmatchedNotFound(unmatched_id))
  }

  /// The review queue, newest first.
  pub async fn list_unmatched(
    &self,
    query: &UnmatchedQuery,
  ) -> Result<Vec<UnmatchedImport>> {
    self.store().list_unmatched(query).await.map_err(Error::store)
  }

  pub async fn session(&self, session_id: Uuid) -> Result<ImportSession> {
    self
      .store()
      .get_session(session_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::SessionNotFound(session_id))
  }

  async fn learn_manual_alias(&self, unmatched: &UnmatchedImport, material_id: &MaterialId) {
    if unmatched.raw_name.trim().is_empty() {
      return;
    }
    let scope = match self.store().get_session(unmatched.session_id).await {
      Ok(session) => session.and_then(|s| s.customer_id),
      Err(e) => {
        tracing::warn!(session_id = %unmatched.session_id, error = %e, "could not load session");
        return;
      }
    };
    let input = NewAlias {
      material_id: material_id.clone(),
      customer_id: scope,
      alias_text:  unmatched.raw_name.trim().to_owned(),
      provenance:  AliasProvenance::Manual,
    };
    if let Err(e) = self.store().insert_alias(input).await {
      tracing::warn!(%material_id, error = %e, "could not learn manual alias");
    }
  }
}
