//! The Reconciliation Pipeline.
//!
//! Each raw row goes `received → scored → {auto-matched | queued}`. A batch
//! runs inside one import session on a bounded number of concurrent workers;
//! every row ends either as a committed observation or as an unmatched
//! import, and is counted exactly once in the session.

use std::{collections::HashMap, future::Future, sync::Arc};

use chrono::{NaiveDate, Utc};
use futures::{StreamExt as _, future, stream};
use pricebook_core::{
  catalog::{Alias, AliasProvenance, Material, MaterialId, NewAlias, PriceSource},
  history::CommitRequest,
  scorer::{Candidate, MatchBasis, Verdict, decide, has_exact, score},
  session::{ImportSession, NewImportSession},
  store::CatalogStore,
  suggest::{AiSuggestion, NoSuggester, Suggester},
  unmatched::{NewUnmatched, QueueReason, RawRow},
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
  Error, Result, config::ReconcileConfig, fingerprint::fingerprint,
  history::PriceHistory, locks::KeyedLocks, session::SessionTracker,
};

// ─── Batch input and report ──────────────────────────────────────────────────

/// A batch of raw rows from one source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
  pub source_file: String,
  /// Alias scope of the batch.
  #[serde(default)]
  pub customer_id: Option<Uuid>,
  #[serde(default)]
  pub vendor_id:   Option<Uuid>,
  pub rows:        Vec<RawRow>,
}

/// How one row ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
  Committed {
    material_id:    MaterialId,
    observation_id: Uuid,
    confidence:     f64,
    basis:          MatchBasis,
    action:         &'static str,
  },
  Queued {
    unmatched_id: Uuid,
    reason:       QueueReason,
  },
  /// Same row already seen in this session.
  Duplicate,
  /// Counted as an error; the store refused even the unmatched record.
  Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RowReport {
  /// Position of the row in the batch.
  pub index:   usize,
  #[serde(flatten)]
  pub outcome: RowOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
  pub session:       ImportSession,
  pub committed:     u64,
  pub queued:        u64,
  pub duplicates:    u64,
  pub failed:        u64,
  pub unmatched_ids: Vec<Uuid>,
  /// Outcomes of dispatched rows, in batch order.
  pub rows:          Vec<RowReport>,
}

impl ImportReport {
  fn new(session: ImportSession, mut rows: Vec<RowReport>) -> Self {
    rows.sort_by_key(|r| r.index);
    let mut report = Self {
      session,
      committed: 0,
      queued: 0,
      duplicates: 0,
      failed: 0,
      unmatched_ids: vec![],
      rows: vec![],
    };
    for row in &rows {
      match &row.outcome {
        RowOutcome::Committed { .. } => report.committed += 1,
        RowOutcome::Queued { unmatched_id, .. } => {
          report.queued += 1;
          report.unmatched_ids.push(*unmatched_id);
        }
        RowOutcome::Duplicate => report.duplicates += 1,
        RowOutcome::Failed { .. } => report.failed += 1,
      }
    }
    report.rows = rows;
    report
  }
}

// ─── Reconciler ──────────────────────────────────────────────────────────────

/// The reconciliation engine: batch imports and manual resolution over one
/// catalog store and an optional AI suggester.
pub struct Reconciler<S, A = NoSuggester> {
  store:                       Arc<S>,
  suggester:                   Arc<A>,
  history:                     PriceHistory<S>,
  config:                      Arc<ReconcileConfig>,
  pub(crate) resolution_locks: Arc<KeyedLocks<Uuid>>,
}

impl<S, A> Clone for Reconciler<S, A> {
  fn clone(&self) -> Self {
    Self {
      store:            Arc::clone(&self.store),
      suggester:        Arc::clone(&self.suggester),
      history:          self.history.clone(),
      config:           Arc::clone(&self.config),
      resolution_locks: Arc::clone(&self.resolution_locks),
    }
  }
}

/// Everything rows of one batch share.
struct Batch<S> {
  tracker:   SessionTracker<S>,
  sources:   HashMap<Uuid, PriceSource>,
  materials: Vec<Material>,
  aliases:   Vec<Alias>,
  scope:     Option<Uuid>,
}

impl<S> Batch<S> {
  fn knows_material(&self, id: &MaterialId) -> bool {
    self.materials.iter().any(|m| &m.material_id == id)
  }
}

/// A claimed row with its effective date and currency.
struct Pending {
  row:         RawRow,
  fingerprint: String,
  date:        NaiveDate,
  currency:    String,
}

impl<S: CatalogStore, A: Suggester> Reconciler<S, A> {
  pub fn new(store: Arc<S>, suggester: A, config: ReconcileConfig) -> Self {
    Self {
      history: PriceHistory::new(Arc::clone(&store)),
      store,
      suggester: Arc::new(suggester),
      config: Arc::new(config),
      resolution_locks: Arc::new(KeyedLocks::new()),
    }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn history(&self) -> &PriceHistory<S> { &self.history }

  pub fn config(&self) -> &ReconcileConfig { &self.config }

  /// Run a batch to completion.
  pub async fn import(&self, batch: ImportBatch) -> Result<ImportReport> {
    self.import_with_cancel(batch, &CancellationToken::new()).await
  }

  /// Run a batch until it completes or `cancel` fires.
  ///
  /// Cancelling stops dispatching rows, lets in-flight rows finish and marks
  /// the session failed, even when every row was already dispatched;
  /// committed rows stay committed. A batch that cannot
  /// be processed at all (an unknown price source or customer, or a session
  /// bookkeeping failure) fails its session and returns
  /// [`Error::SessionAborted`].
  pub async fn import_with_cancel(
    &self,
    batch: ImportBatch,
    cancel: &CancellationToken,
  ) -> Result<ImportReport> {
    let ImportBatch { source_file, customer_id, vendor_id, rows } = batch;
    let total = rows.len();

    let tracker = SessionTracker::start(Arc::clone(&self.store), NewImportSession {
      source_file,
      customer_id,
      vendor_id,
      total_rows: total as u64,
    })
    .await?;

    let (sources, materials, aliases) =
      match self.load_context(&rows, customer_id).await {
        Ok(context) => context,
        Err(e) => return Err(self.abort(&tracker, e.to_string()).await),
      };
    let batch = Batch { tracker, sources, materials, aliases, scope: customer_id };

    // Internal failures stop dispatch without cancelling the caller's token.
    let abort = cancel.child_token();
    let (batch_ref, abort_ref) = (&batch, &abort);

    let results: Vec<Result<RowReport>> = stream::iter(rows.into_iter().enumerate())
      .take_while(|_| future::ready(!abort_ref.is_cancelled()))
      .map(|(index, row)| async move {
        let outcome = self.process_row(batch_ref, row).await;
        if outcome.is_err() {
          abort_ref.cancel();
        }
        outcome.map(|outcome| RowReport { index, outcome })
      })
      .buffer_unordered(self.config.workers())
      .collect()
      .await;

    let mut reports = Vec::with_capacity(results.len());
    let mut fatal = None;
    for result in results {
      match result {
        Ok(report) => reports.push(report),
        Err(e) => {
          fatal.get_or_insert(e.to_string());
        }
      }
    }
    if let Some(reason) = fatal {
      return Err(self.abort(&batch.tracker, reason).await);
    }

    let session = if cancel.is_cancelled() {
      tracing::warn!(
        session_id = %batch.tracker.session_id(),
        dispatched = reports.len(),
        total,
        "import cancelled"
      );
      batch.tracker.fail("cancelled").await?
    } else {
      match batch.tracker.complete().await {
        Ok(session) => session,
        Err(e) => return Err(self.abort(&batch.tracker, e.to_string()).await),
      }
    };

    let report = ImportReport::new(session, reports);
    tracing::info!(
      session_id = %report.session.session_id,
      status = %report.session.status,
      committed = report.committed,
      queued = report.queued,
      duplicates = report.duplicates,
      failed = report.failed,
      "import session finished"
    );
    Ok(report)
  }

  /// Validate the batch and snapshot what its rows are matched against.
  async fn load_context(
    &self,
    rows: &[RawRow],
    scope: Option<Uuid>,
  ) -> Result<(HashMap<Uuid, PriceSource>, Vec<Material>, Vec<Alias>)> {
    let store = &*self.store;

    if let Some(id) = scope {
      self
        .retry("load customer", || async move {
          store.get_customer(id).await.map_err(Error::store)
        })
        .await?
        .ok_or(Error::CustomerNotFound(id))?;
    }

    let mut sources = HashMap::new();
    for id in rows.iter().map(|r| r.source_id) {
      if sources.contains_key(&id) {
        continue;
      }
      let source = self
        .retry("load price source", || async move {
          store.get_price_source(id).await.map_err(Error::store)
        })
        .await?
        .ok_or(Error::SourceNotFound(id))?;
      sources.insert(id, source);
    }

    let materials = self
      .retry("load materials", || async move {
        store.list_materials(true).await.map_err(Error::store)
      })
      .await?;
    let aliases = self
      .retry("load aliases", || async move {
        store.aliases_for_scope(scope).await.map_err(Error::store)
      })
      .await?;

    Ok((sources, materials, aliases))
  }

  /// Take one row to its outcome. `Err` is reserved for failures that must
  /// abort the whole batch.
  async fn process_row(&self, batch: &Batch<S>, row: RawRow) -> Result<RowOutcome> {
    let session_id = batch.tracker.session_id();
    let source = batch.sources.get(&row.source_id);
    let pending = Pending {
      fingerprint: fingerprint(&row),
      date:        row
        .price_date
        .or_else(|| source.and_then(|s| s.doc_date))
        .unwrap_or_else(|| Utc::now().date_naive()),
      currency:    row
        .currency
        .clone()
        .unwrap_or_else(|| self.config.default_currency.clone()),
      row,
    };

    let store = &*self.store;
    let fp = pending.fingerprint.as_str();
    let claimed = self
      .retry("claim row", || async move {
        store.claim_row(session_id, fp).await.map_err(Error::store)
      })
      .await;
    match claimed {
      Ok(true) => {}
      Ok(false) => {
        tracing::debug!(
          %session_id,
          raw_name = %pending.row.raw_name,
          "duplicate row skipped"
        );
        batch.tracker.record_processed().await?;
        return Ok(RowOutcome::Duplicate);
      }
      Err(e) => {
        // Queueing claims the fingerprint along with the unmatched record.
        tracing::warn!(%session_id, error = %e, "could not claim row");
        return self.queue(batch, pending, QueueReason::StoreUnavailable, None).await;
      }
    }

    let malformed = pending.row.raw_name.trim().is_empty()
      || pending.row.raw_price.is_some_and(|p| !p.is_finite() || p < 0.0);
    let Some(source) = source.filter(|_| !malformed) else {
      return self.queue(batch, pending, QueueReason::MalformedRow, None).await;
    };

    let matches = self.config.resolver().resolve(
      &pending.row.raw_name,
      batch.scope,
      &batch.aliases,
      &batch.materials,
    );
    let suggestion = if has_exact(&matches) {
      None
    } else {
      self.suggest(batch, &pending.row).await
    };
    let candidates = score(&matches, suggestion.as_ref());

    let candidate = match decide(&candidates, &self.config.policy()) {
      Verdict::Accept(candidate) => candidate,
      Verdict::Queue { reason, suggestion } => {
        return self.queue(batch, pending, reason, suggestion).await;
      }
    };
    let Some(price) = pending.row.raw_price else {
      return self
        .queue(batch, pending, QueueReason::MissingPrice, Some(candidate))
        .await;
    };

    let request = CommitRequest {
      material_id: candidate.material_id.clone(),
      price,
      currency: pending.currency.clone(),
      date: pending.date,
      source: source.clone(),
    };
    let (history, request_ref) = (&self.history, &request);
    let committed = self.retry("commit price", || history.commit(request_ref)).await;
    match committed {
      Ok(plan) => {
        self.learn_alias(batch, &pending.row, &candidate).await;
        batch.tracker.record_processed().await?;
        tracing::debug!(
          %session_id,
          raw_name = %pending.row.raw_name,
          material_id = %candidate.material_id,
          confidence = candidate.confidence,
          "row auto-matched"
        );
        Ok(RowOutcome::Committed {
          material_id:    candidate.material_id,
          observation_id: plan.observation_id(),
          confidence:     candidate.confidence,
          basis:          candidate.basis,
          action:         plan.action(),
        })
      }
      Err(Error::TemporalConflict(detail)) => {
        tracing::warn!(%session_id, %detail, "row conflicts with price history");
        self
          .queue(batch, pending, QueueReason::TemporalConflict, Some(candidate))
          .await
      }
      Err(e) => {
        tracing::warn!(%session_id, error = %e, "could not commit row");
        self
          .queue(batch, pending, QueueReason::StoreUnavailable, Some(candidate))
          .await
      }
    }
  }

  /// Record the row as an unmatched import and count it as an error.
  async fn queue(
    &self,
    batch: &Batch<S>,
    pending: Pending,
    reason: QueueReason,
    suggestion: Option<Candidate>,
  ) -> Result<RowOutcome> {
    let session_id = batch.tracker.session_id();
    let input = NewUnmatched {
      session_id,
      row: pending.row,
      currency: pending.currency,
      price_date: pending.date,
      fingerprint: pending.fingerprint,
      suggested_material_id: suggestion.as_ref().map(|c| c.material_id.clone()),
      suggested_confidence: suggestion.map(|c| c.confidence),
      reason,
    };

    let (store, input_ref) = (&*self.store, &input);
    let inserted = self
      .retry("queue row", || async move {
        store
          .insert_unmatched(input_ref.clone())
          .await
          .map_err(Error::store)
      })
      .await;
    batch.tracker.record_error().await?;

    match inserted {
      Ok(unmatched) => {
        tracing::debug!(
          %session_id,
          unmatched_id = %unmatched.unmatched_id,
          raw_name = %unmatched.raw_name,
          %reason,
          "row queued for review"
        );
        Ok(RowOutcome::Queued { unmatched_id: unmatched.unmatched_id, reason })
      }
      Err(e) => {
        tracing::error!(
          %session_id,
          raw_name = %input.row.raw_name,
          error = %e,
          "row could not be queued"
        );
        Ok(RowOutcome::Failed { error: e.to_string() })
      }
    }
  }

  /// Ask the AI suggester, bounded by the configured timeout. Any failure is
  /// "no suggestion".
  async fn suggest(&self, batch: &Batch<S>, row: &RawRow) -> Option<AiSuggestion> {
    let call = self.suggester.suggest(&row.raw_name, row.raw_unit.as_deref());
    match tokio::time::timeout(self.config.ai_timeout(), call).await {
      Ok(Ok(Some(s))) if !s.confidence.is_finite() => {
        tracing::warn!(raw_name = %row.raw_name, "AI suggestion without a usable confidence");
        None
      }
      Ok(Ok(Some(s))) if !batch.knows_material(&s.material_id) => {
        tracing::warn!(
          raw_name = %row.raw_name,
          material_id = %s.material_id,
          "AI suggested a material outside the active catalog"
        );
        None
      }
      Ok(Ok(suggestion)) => suggestion,
      Ok(Err(e)) => {
        tracing::warn!(raw_name = %row.raw_name, error = %e, "AI suggester failed");
        None
      }
      Err(_) => {
        tracing::warn!(
          raw_name = %row.raw_name,
          timeout_ms = self.config.ai_timeout_ms,
          "AI suggester timed out"
        );
        None
      }
    }
  }

  /// Teach the alias table what an auto-match learned.
  async fn learn_alias(&self, batch: &Batch<S>, row: &RawRow, candidate: &Candidate) {
    let provenance = match candidate.basis {
      MatchBasis::Exact => {
        if let Some(alias_id) = candidate.alias_id
          && let Err(e) = self.store.record_alias_use(alias_id).await
        {
          tracing::warn!(%alias_id, error = %e, "could not count alias use");
        }
        return;
      }
      MatchBasis::NormalizedExact => AliasProvenance::Import,
      MatchBasis::Fuzzy => AliasProvenance::Fuzzy,
      MatchBasis::Ai => AliasProvenance::Ai,
    };

    let input = NewAlias {
      material_id: candidate.material_id.clone(),
      customer_id: batch.scope,
      alias_text: row.raw_name.trim().to_owned(),
      provenance,
    };
    match self.store.insert_alias(input).await {
      Ok(alias) => tracing::debug!(
        alias_id = %alias.alias_id,
        material_id = %alias.material_id,
        %provenance,
        "alias learned"
      ),
      Err(e) => tracing::warn!(
        material_id = %candidate.material_id,
        error = %e,
        "could not learn alias"
      ),
    }
  }

  /// Fail the session and build the error reported to the caller.
  async fn abort(&self, tracker: &SessionTracker<S>, reason: String) -> Error {
    let session_id = tracker.session_id();
    tracing::error!(%session_id, %reason, "import session aborted");
    if let Err(e) = tracker.fail(&reason).await {
      tracing::warn!(%session_id, error = %e, "could not mark session failed");
    }
    Error::SessionAborted { session_id, reason }
  }

  /// Run `op`, retrying with linear backoff while the store is unavailable.
  pub(crate) async fn retry<T, F, Fut>(
    &self,
    operation: &'static str,
    mut op: F,
  ) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let mut attempt = 0;
    loop {
      match op().await {
        Err(Error::StoreUnavailable(detail))
          if attempt < self.config.max_store_retries =>
        {
          attempt += 1;
          tracing::warn!(
            operation,
            attempt,
            error = %detail,
            "catalog store unavailable, retrying"
          );
          tokio::time::sleep(self.config.retry_backoff() * attempt).await;
        }
        other => return other,
      }
    }
  }
}
