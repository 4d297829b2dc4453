//! Engine tests against an in-memory `SqliteStore`.

use std::{
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use chrono::NaiveDate;
use pricebook_core::{
  catalog::{AliasProvenance, Material, MaterialId, NewAlias, NewPriceSource, PriceSource, SourceType},
  history::{CommitRequest, check_line},
  normalize::fold,
  scorer::MatchBasis,
  session::SessionStatus,
  store::{CatalogStore, UnmatchedQuery},
  suggest::{AiSuggestion, NoSuggester, Suggester},
  unmatched::{QueueReason, RawRow, ResolutionStatus},
};
use pricebook_store_sqlite::SqliteStore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
  Error, ImportBatch, LegacyMaterial, MigrationReport, ReconcileConfig, Reconciler, RowOutcome,
};


// ─── Fixtures ────────────────────────────────────────────────────────────────

const CEMENT: &str = "cement-m500-50";

fn d(s: &str) -> NaiveDate { s.parse().unwrap() }

struct Fixture {
  store:  Arc<SqliteStore>,
  source: PriceSource,
}

async fn fixture() -> Fixture {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  for (id, name, unit) in [
    (CEMENT, "Цемент М500 50 кг", "мешок"),
    ("cement-m400-50", "Цемент М400 50 кг", "мешок"),
    ("sand-river", "Песок речной", "м3"),
    ("gravel-20-40", "Щебень гранитный 20-40", "м3"),
    ("rebar-a500-12", "Арматура А500С 12 мм", "т"),
    ("brick-m150", "Кирпич керамический М150", "шт"),
    ("plaster-gypsum-30", "Штукатурка гипсовая 30 кг", "мешок"),
  ] {
    store.upsert_material(Material::new(id, name, unit)).await.unwrap();
  }
  store
    .insert_alias(NewAlias {
      material_id: CEMENT.into(),
      customer_id: None,
      alias_text:  "Цемент М500 50кг".into(),
      provenance:  AliasProvenance::Manual,
    })
    .await
    .unwrap();
  let source = store
    .add_price_source(NewPriceSource::new(SourceType::Invoice, "invoice 17"))
    .await
    .unwrap();
  Fixture { store, source }
}

impl Fixture {
  fn reconciler(&self) -> Reconciler<SqliteStore> {
    Reconciler::new(self.store.clone(), NoSuggester, ReconcileConfig::default())
  }

  fn with_suggester<A: Suggester>(
    &self,
    suggester: A,
    config: ReconcileConfig,
  ) -> Reconciler<SqliteStore, A> {
    Reconciler::new(self.store.clone(), suggester, config)
  }

  fn row(&self, name: &str, price: f64) -> RawRow {
    RawRow::new(name, price, self.source.source_id)
  }

  fn dated(&self, name: &str, price: f64, date: &str) -> RawRow {
    let mut row = self.row(name, price);
    row.price_date = Some(d(date));
    row
  }
}

fn quick_ai() -> ReconcileConfig {
  ReconcileConfig { ai_timeout_ms: 100, ..Default::default() }
}

fn batch(rows: Vec<RawRow>) -> ImportBatch {
  ImportBatch {
    source_file: "prices.xlsx".into(),
    customer_id: None,
    vendor_id: None,
    rows,
  }
}

// ─── Suggesters ──────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("suggester offline")]
struct Offline;

struct Fixed(AiSuggestion);

impl Suggester for Fixed {
  type Error = Offline;

  async fn suggest<'a>(
    &'a self,
    _raw_name: &'a str,
    _unit: Option<&'a str>,
  ) -> Result<Option<AiSuggestion>, Offline> {
    Ok(Some(self.0.clone()))
  }
}

struct Slow;

impl Suggester for Slow {
  type Error = Offline;

  async fn suggest<'a>(
    &'a self,
    _raw_name: &'a str,
    _unit: Option<&'a str>,
  ) -> Result<Option<AiSuggestion>, Offline> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Ok(Some(AiSuggestion { material_id: CEMENT.into(), confidence: 0.99 }))
  }
}

struct Failing;

impl Suggester for Failing {
  type Error = Offline;

  async fn suggest<'a>(
    &'a self,
    _raw_name: &'a str,
    _unit: Option<&'a str>,
  ) -> Result<Option<AiSuggestion>, Offline> {
    Err(Offline)
  }
}

#[derive(Clone, Default)]
struct Counting(Arc<AtomicUsize>);

impl Suggester for Counting {
  type Error = Offline;

  async fn suggest<'a>(
    &'a self,
    _raw_name: &'a str,
    _unit: Option<&'a str>,
  ) -> Result<Option<AiSuggestion>, Offline> {
    self.0.fetch_add(1, Ordering::SeqCst);
    Ok(Some(AiSuggestion { material_id: "sand-river".into(), confidence: 0.99 }))
  }
}

// ─── Auto-match ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn exact_alias_commits_directly() {
  let f = fixture().await;
  let report = f
    .reconciler()
    .import(batch(vec![f.row("Цемент М500 50кг", 450.0)]))
    .await
    .unwrap();

  assert_eq!(report.committed, 1);
  assert!(report.unmatched_ids.is_empty());
  match &report.rows[0].outcome {
    RowOutcome::Committed { material_id, confidence, basis, .. } => {
      assert_eq!(material_id.as_str(), CEMENT);
      assert_eq!(*confidence, 1.0);
      assert_eq!(*basis, MatchBasis::Exact);
    }
    other => panic!("unexpected outcome {other:?}"),
  }

  let history = f.store.material_observations(&CEMENT.into()).await.unwrap();
  assert_eq!(history.len(), 1);
  assert_eq!(history[0].price, 450.0);
  assert_eq!(history[0].currency, "RUB");
  assert!(history[0].is_active);

  let pending = f.store.list_unmatched(&UnmatchedQuery::default()).await.unwrap();
  assert!(pending.is_empty());
}

#[tokio::test]
async fn typo_is_queued_with_its_suggestion() {
  let f = fixture().await;
  let report = f
    .reconciler()
    .import(batch(vec![f.row("Cемент М-500, 50 кг", 460.0)]))
    .await
    .unwrap();

  assert_eq!(report.queued, 1);
  let unmatched = f.reconciler().unmatched(report.unmatched_ids[0]).await.unwrap();
  assert_eq!(unmatched.resolution_status, ResolutionStatus::Pending);
  assert_eq!(unmatched.suggested_material_id.as_ref().map(|m| m.as_str()), Some(CEMENT));
  assert!(unmatched.suggested_confidence.is_some_and(|c| c < 0.95));
  assert!(matches!(
    unmatched.reason,
    QueueReason::LowConfidence | QueueReason::AmbiguousMatch
  ));

  assert!(f.store.material_observations(&CEMENT.into()).await.unwrap().is_empty());
  assert_eq!(report.session.error_rows, 1);
}

#[tokio::test]
async fn ten_row_batch_accounts_for_every_row() {
  let f = fixture().await;
  let mut rows: Vec<RawRow> = [
    "Цемент М500 50 кг",
    "Цемент М400 50 кг",
    "Песок речной",
    "Щебень гранитный 20-40",
    "Арматура А500С 12 мм",
    "Кирпич керамический М150",
    "Штукатурка гипсовая 30 кг",
  ]
  .into_iter()
  .map(|name| f.row(name, 100.0))
  .collect();
  for name in ["Гвозди строительные 100 мм", "Саморезы по дереву", "Пленка ПВХ"] {
    rows.push(f.row(name, 10.0));
  }

  let report = f.reconciler().import(batch(rows)).await.unwrap();

  assert_eq!(report.session.status, SessionStatus::Completed);
  assert_eq!(report.session.total_rows, 10);
  assert_eq!(report.session.processed_rows, 7);
  assert_eq!(report.session.error_rows, 3);
  assert_eq!((report.committed, report.queued), (7, 3));
  assert_eq!(report.rows.iter().map(|r| r.index).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());

  let stored = f.store.get_session(report.session.session_id).await.unwrap().unwrap();
  assert_eq!(stored.status, SessionStatus::Completed);
  assert_eq!(stored.accounted(), 10);

  let query = UnmatchedQuery {
    session_id: Some(report.session.session_id),
    ..Default::default()
  };
  let queued = f.store.list_unmatched(&query).await.unwrap();
  assert!(queued.iter().all(|u| u.reason == QueueReason::NoCandidate));
}

#[tokio::test]
async fn duplicate_rows_commit_once() {
  let f = fixture().await;
  let row = f.row("Цемент М500 50кг", 450.0);
  let report = f
    .reconciler()
    .import(batch(vec![row.clone(), row]))
    .await
    .unwrap();

  assert_eq!((report.committed, report.duplicates), (1, 1));
  assert_eq!(report.session.processed_rows, 2);
  assert_eq!(report.session.status, SessionStatus::Completed);
  let history = f.store.material_observations(&CEMENT.into()).await.unwrap();
  assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn row_without_price_is_queued() {
  let f = fixture().await;
  let mut row = f.row("Цемент М500 50кг", 0.0);
  row.raw_price = None;
  let mut negative = f.row("Песок речной", -5.0);
  negative.raw_article = Some("S-1".into());

  let report = f.reconciler().import(batch(vec![row, negative])).await.unwrap();

  let reasons: Vec<QueueReason> = report
    .rows
    .iter()
    .map(|r| match &r.outcome {
      RowOutcome::Queued { reason, .. } => *reason,
      other => panic!("unexpected outcome {other:?}"),
    })
    .collect();
  assert_eq!(reasons, vec![QueueReason::MissingPrice, QueueReason::MalformedRow]);

  let missing = f.reconciler().unmatched(report.unmatched_ids[0]).await.unwrap();
  assert_eq!(missing.suggested_material_id.as_ref().map(|m| m.as_str()), Some(CEMENT));
}

#[tokio::test]
async fn row_date_falls_back_to_document_date() {
  let f = fixture().await;
  let mut input = NewPriceSource::new(SourceType::Invoice, "invoice 18");
  input.doc_date = Some(d("2024-03-05"));
  let source = f.store.add_price_source(input).await.unwrap();

  let mut row = RawRow::new("Песок речной", 900.0, source.source_id);
  row.currency = Some("USD".into());
  f.reconciler().import(batch(vec![row])).await.unwrap();

  let history = f.store.material_observations(&"sand-river".into()).await.unwrap();
  assert_eq!(history[0].price_date, d("2024-03-05"));
  assert_eq!(history[0].interval.valid_from, d("2024-03-05"));
  assert_eq!(history[0].currency, "USD");
}

// ─── Alias learning ──────────────────────────────────────────────────────────

#[tokio::test]
async fn normalized_match_learns_an_import_alias() {
  let f = fixture().await;
  let reconciler = f.reconciler();
  let report = reconciler
    .import(batch(vec![f.dated("Цемент М-500, 50 кг", 450.0, "2024-01-10")]))
    .await
    .unwrap();
  assert!(matches!(
    report.rows[0].outcome,
    RowOutcome::Committed { basis: MatchBasis::NormalizedExact, .. }
  ));

  let learned = f
    .store
    .find_aliases(&fold("Цемент М-500, 50 кг"), None)
    .await
    .unwrap();
  assert_eq!(learned.len(), 1);
  assert_eq!(learned[0].provenance, AliasProvenance::Import);

  // The next batch sees the learned alias as an exact match.
  let report = reconciler
    .import(batch(vec![f.dated("Цемент М-500, 50 кг", 450.0, "2024-01-11")]))
    .await
    .unwrap();
  assert!(matches!(
    report.rows[0].outcome,
    RowOutcome::Committed { basis: MatchBasis::Exact, .. }
  ));
  let learned = f
    .store
    .find_aliases(&fold("Цемент М-500, 50 кг"), None)
    .await
    .unwrap();
  assert_eq!(learned[0].confirmed_uses, 1);
}

#[tokio::test]
async fn customer_batch_learns_scoped_alias() {
  let f = fixture().await;
  let customer = f.store.add_customer("Acme".into(), SourceType::Invoice).await.unwrap();
  let mut input = batch(vec![f.row("Цемент М-500, 50 кг", 450.0)]);
  input.customer_id = Some(customer.customer_id);
  f.reconciler().import(input).await.unwrap();

  let folded = fold("Цемент М-500, 50 кг");
  assert!(f.store.find_aliases(&folded, None).await.unwrap().is_empty());
  let scoped = f.store.find_aliases(&folded, Some(customer.customer_id)).await.unwrap();
  assert_eq!(scoped[0].customer_id, Some(customer.customer_id));
}

// ─── AI suggester ────────────────────────────────────────────────────────────

#[tokio::test]
async fn exact_match_skips_the_suggester() {
  let f = fixture().await;
  let calls = Counting::default();
  let reconciler = f.with_suggester(calls.clone(), quick_ai());
  let report = reconciler
    .import(batch(vec![f.row("Цемент М500 50кг", 450.0)]))
    .await
    .unwrap();

  assert_eq!(report.committed, 1);
  match &report.rows[0].outcome {
    RowOutcome::Committed { material_id, .. } => assert_eq!(material_id.as_str(), CEMENT),
    other => panic!("unexpected outcome {other:?}"),
  }
  assert_eq!(calls.0.load(Ordering::SeqCst), 0);

  reconciler
    .import(batch(vec![f.row("Гвозди строительные 100 мм", 10.0)]))
    .await
    .unwrap();
  assert_eq!(calls.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ai_alone_never_auto_accepts() {
  let f = fixture().await;
  let reconciler = f.with_suggester(
    Fixed(AiSuggestion { material_id: "sand-river".into(), confidence: 0.99 }),
    quick_ai(),
  );
  let report = reconciler
    .import(batch(vec![f.row("Песок мытый карьерный", 700.0)]))
    .await
    .unwrap();

  let unmatched = reconciler.unmatched(report.unmatched_ids[0]).await.unwrap();
  assert_eq!(unmatched.reason, QueueReason::LowConfidence);
  assert_eq!(unmatched.suggested_material_id.as_ref().map(|m| m.as_str()), Some("sand-river"));
  assert_eq!(unmatched.suggested_confidence, Some(0.85));
}

#[tokio::test]
async fn suggestion_outside_catalog_is_ignored() {
  let f = fixture().await;
  let reconciler = f.with_suggester(
    Fixed(AiSuggestion { material_id: "made-up".into(), confidence: 0.7 }),
    quick_ai(),
  );
  let report = reconciler
    .import(batch(vec![f.row("Гвозди строительные 100 мм", 10.0)]))
    .await
    .unwrap();

  let unmatched = reconciler.unmatched(report.unmatched_ids[0]).await.unwrap();
  assert_eq!(unmatched.reason, QueueReason::NoCandidate);
  assert!(unmatched.suggested_material_id.is_none());
}

#[tokio::test]
async fn slow_or_failing_suggester_means_no_suggestion() {
  let f = fixture().await;

  let started = std::time::Instant::now();
  let report = f
    .with_suggester(Slow, quick_ai())
    .import(batch(vec![f.row("Гвозди строительные 100 мм", 10.0)]))
    .await
    .unwrap();
  assert!(started.elapsed() < Duration::from_secs(2));
  assert_eq!(report.queued, 1);
  assert_eq!(report.session.status, SessionStatus::Completed);

  let report = f
    .with_suggester(Failing, quick_ai())
    .import(batch(vec![f.row("Гвозди строительные 100 мм", 10.0)]))
    .await
    .unwrap();
  let unmatched = f.reconciler().unmatched(report.unmatched_ids[0]).await.unwrap();
  assert_eq!(unmatched.reason, QueueReason::NoCandidate);
}

// ─── Price history ───────────────────────────────────────────────────────────

#[tokio::test]
async fn new_price_supersedes_the_active_one() {
  let f = fixture().await;
  let reconciler = f.reconciler();
  reconciler
    .import(batch(vec![f.dated("Цемент М500 50кг", 450.0, "2024-01-10")]))
    .await
    .unwrap();
  reconciler
    .import(batch(vec![f.dated("Цемент М500 50кг", 470.0, "2024-02-01")]))
    .await
    .unwrap();

  let history = reconciler.history().history(&CEMENT.into()).await.unwrap();
  assert_eq!(history.len(), 2);
  let (old, new) = (&history[0], &history[1]);
  assert_eq!(old.price, 450.0);
  assert!(!old.is_active);
  assert_eq!(old.interval.valid_to, Some(d("2024-01-31")));
  assert_eq!(new.price, 470.0);
  assert!(new.is_active);
  assert_eq!(new.interval.valid_from, d("2024-02-01"));

  let cement: MaterialId = CEMENT.into();
  let on = |date: &str| reconciler.history().price_as_of(&cement, d(date), None);
  assert_eq!(on("2024-01-20").await.unwrap().map(|o| o.price), Some(450.0));
  assert_eq!(on("2024-03-01").await.unwrap().map(|o| o.price), Some(470.0));
  assert!(on("2023-06-01").await.unwrap().is_none());
}

#[tokio::test]
async fn late_price_is_inserted_as_history() {
  let f = fixture().await;
  let reconciler = f.reconciler();
  for (price, date) in [(450.0, "2024-01-10"), (470.0, "2024-02-01"), (430.0, "2023-12-01")] {
    reconciler
      .import(batch(vec![f.dated("Цемент М500 50кг", price, date)]))
      .await
      .unwrap();
  }

  let history = reconciler.history().history(&CEMENT.into()).await.unwrap();
  assert_eq!(history.len(), 3);
  check_line(&history).unwrap();

  let late = history.iter().find(|o| o.price == 430.0).unwrap();
  assert!(!late.is_active);
  assert_eq!(late.interval.valid_from, d("2023-12-01"));
  assert_eq!(late.interval.valid_to, Some(d("2024-01-09")));

  let active: Vec<_> = history.iter().filter(|o| o.is_active).collect();
  assert_eq!(active.len(), 1);
  assert_eq!(active[0].price, 470.0);
}

#[tokio::test]
async fn contradicting_closed_history_is_queued() {
  let f = fixture().await;
  let reconciler = f.reconciler();
  for (price, date) in [(450.0, "2024-01-10"), (470.0, "2024-02-01")] {
    reconciler
      .import(batch(vec![f.dated("Цемент М500 50кг", price, date)]))
      .await
      .unwrap();
  }

  let report = reconciler
    .import(batch(vec![f.dated("Цемент М500 50кг", 455.0, "2024-01-20")]))
    .await
    .unwrap();
  let unmatched = reconciler.unmatched(report.unmatched_ids[0]).await.unwrap();
  assert_eq!(unmatched.reason, QueueReason::TemporalConflict);
  assert_eq!(reconciler.history().history(&CEMENT.into()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_commits_keep_the_line_consistent() {
  let f = fixture().await;
  let reconciler = f.reconciler();

  let tasks: Vec<_> = (0..20)
    .map(|i| {
      let history = reconciler.history().clone();
      let request = CommitRequest {
        material_id: CEMENT.into(),
        price:       400.0 + f64::from(i),
        currency:    "RUB".into(),
        date:        d("2024-01-01"),
        source:      f.source.clone(),
      };
      tokio::spawn(async move { history.commit(&request).await })
    })
    .collect();
  for task in tasks {
    task.await.unwrap().unwrap();
  }

  let history = reconciler.history().history(&CEMENT.into()).await.unwrap();
  check_line(&history).unwrap();
  assert_eq!(history.iter().filter(|o| o.is_active).count(), 1);
}

#[tokio::test]
async fn price_query_rejects_unknown_ids() {
  let f = fixture().await;
  let reconciler = f.reconciler();
  let err = reconciler
    .history()
    .price_as_of(&"missing".into(), d("2024-01-01"), None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::MaterialNotFound(_)));

  let err = reconciler
    .history()
    .price_as_of(&CEMENT.into(), d("2024-01-01"), Some(Uuid::new_v4()))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::CustomerNotFound(_)));
}

// ─── Session lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_source_aborts_the_session() {
  let f = fixture().await;
  let report = f
    .reconciler()
    .import(batch(vec![RawRow::new("Цемент М500 50кг", 450.0, Uuid::new_v4())]))
    .await;

  let Err(Error::SessionAborted { session_id, reason }) = report else {
    panic!("expected an aborted session");
  };
  assert!(reason.contains("price source not found"));
  let session = f.store.get_session(session_id).await.unwrap().unwrap();
  assert_eq!(session.status, SessionStatus::Failed);
  assert!(f.store.material_observations(&CEMENT.into()).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_import_fails_its_session() {
  let f = fixture().await;
  let cancel = CancellationToken::new();
  cancel.cancel();

  let report = f
    .reconciler()
    .import_with_cancel(batch(vec![f.row("Цемент М500 50кг", 450.0)]), &cancel)
    .await
    .unwrap();

  assert_eq!(report.session.status, SessionStatus::Failed);
  assert_eq!(report.session.failure_reason.as_deref(), Some("cancelled"));
  assert!(report.rows.is_empty());
}

#[tokio::test]
async fn cancel_while_the_last_row_is_in_flight_fails_the_session() {
  let f = fixture().await;
  let config = ReconcileConfig { ai_timeout_ms: 500, ..Default::default() };
  let reconciler = f.with_suggester(Slow, config);
  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(100)).await;
    trigger.cancel();
  });

  let report = reconciler
    .import_with_cancel(batch(vec![f.row("Гвозди строительные 100 мм", 10.0)]), &cancel)
    .await
    .unwrap();

  assert!(cancel.is_cancelled());
  assert_eq!(report.rows.len(), 1);
  assert_eq!(report.queued, 1);
  assert_eq!(report.session.status, SessionStatus::Failed);
  assert_eq!(report.session.failure_reason.as_deref(), Some("cancelled"));
  let stored = f.store.get_session(report.session.session_id).await.unwrap().unwrap();
  assert_eq!(stored.status, SessionStatus::Failed);
}

#[tokio::test]
async fn empty_batch_completes() {
  let f = fixture().await;
  let report = f.reconciler().import(batch(vec![])).await.unwrap();
  assert_eq!(report.session.status, SessionStatus::Completed);
  assert_eq!(report.session.total_rows, 0);
}

// ─── Manual resolution ───────────────────────────────────────────────────────

async fn queued_typo(f: &Fixture) -> Uuid {
  let report = f
    .reconciler()
    .import(batch(vec![f.dated("Cемент М-500, 50 кг", 460.0, "2024-01-15")]))
    .await
    .unwrap();
  report.unmatched_ids[0]
}

#[tokio::test]
async fn resolve_commits_and_is_idempotent() {
  let f = fixture().await;
  let reconciler = f.reconciler();
  let id = queued_typo(&f).await;

  let first = reconciler.resolve(id, CEMENT.into()).await.unwrap();
  assert!(!first.replayed);
  assert_eq!(first.unmatched.resolution_status, ResolutionStatus::Resolved);

  let history = reconciler.history().history(&CEMENT.into()).await.unwrap();
  assert_eq!(history.len(), 1);
  assert_eq!(history[0].observation_id, first.observation_id);
  assert_eq!(history[0].price, 460.0);
  assert_eq!(history[0].price_date, d("2024-01-15"));

  let again = reconciler.resolve(id, CEMENT.into()).await.unwrap();
  assert!(again.replayed);
  assert_eq!(again.observation_id, first.observation_id);
  assert_eq!(reconciler.history().history(&CEMENT.into()).await.unwrap().len(), 1);

  let err = reconciler.resolve(id, "sand-river".into()).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyResolved { status: ResolutionStatus::Resolved, .. }));
  let err = reconciler.reject(id).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyResolved { .. }));
}

#[tokio::test]
async fn resolution_teaches_a_manual_alias() {
  let f = fixture().await;
  let reconciler = f.reconciler();
  let id = queued_typo(&f).await;
  reconciler.resolve(id, CEMENT.into()).await.unwrap();

  let aliases = f.store.find_aliases(&fold("Cемент М-500, 50 кг"), None).await.unwrap();
  assert_eq!(aliases[0].provenance, AliasProvenance::Manual);

  let report = reconciler
    .import(batch(vec![f.dated("Cемент М-500, 50 кг", 465.0, "2024-02-01")]))
    .await
    .unwrap();
  assert_eq!(report.committed, 1);
}

#[tokio::test]
async fn concurrent_resolutions_commit_once() {
  let f = fixture().await;
  let reconciler = f.reconciler();
  let id = queued_typo(&f).await;

  let tasks: Vec<_> = (0..5)
    .map(|_| {
      let reconciler = reconciler.clone();
      tokio::spawn(async move { reconciler.resolve(id, CEMENT.into()).await })
    })
    .collect();
  let mut fresh = 0;
  for task in tasks {
    if !task.await.unwrap().unwrap().replayed {
      fresh += 1;
    }
  }
  assert_eq!(fresh, 1);
  assert_eq!(reconciler.history().history(&CEMENT.into()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn competing_engines_resolve_a_row_once() {
  let f = fixture().await;
  let id = queued_typo(&f).await;
  // Separate engines share only the store, like two processes on one file.
  let (a, b) = (f.reconciler(), f.reconciler());

  let (to_m500, to_m400) = tokio::join!(
    a.resolve(id, CEMENT.into()),
    b.resolve(id, "cement-m400-50".into()),
  );
  assert!(to_m500.is_ok() != to_m400.is_ok());
  let loser = if to_m500.is_ok() { to_m400 } else { to_m500 };
  assert!(matches!(loser, Err(Error::AlreadyResolved { .. })));

  let m500 = f.store.material_observations(&CEMENT.into()).await.unwrap();
  let m400 = f.store.material_observations(&"cement-m400-50".into()).await.unwrap();
  assert_eq!(m500.len() + m400.len(), 1);

  let unmatched = a.unmatched(id).await.unwrap();
  let winner = if m500.is_empty() { &m400[0] } else { &m500[0] };
  assert_eq!(unmatched.resolved_material_id.as_ref(), Some(&winner.material_id));
  assert_eq!(unmatched.observation_id, Some(winner.observation_id));
}

#[tokio::test]
async fn reject_is_terminal_and_repeatable() {
  let f = fixture().await;
  let reconciler = f.reconciler();
  let id = queued_typo(&f).await;

  let rejected = reconciler.reject(id).await.unwrap();
  assert_eq!(rejected.resolution_status, ResolutionStatus::Rejected);
  assert!(rejected.resolved_at.is_some());
  assert_eq!(reconciler.reject(id).await.unwrap().resolution_status, ResolutionStatus::Rejected);

  let err = reconciler.resolve(id, CEMENT.into()).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyResolved { status: ResolutionStatus::Rejected, .. }));
  assert!(reconciler.history().history(&CEMENT.into()).await.unwrap().is_empty());
}

#[tokio::test]
async fn resolution_errors() {
  let f = fixture().await;
  let reconciler = f.reconciler();

  let err = reconciler.resolve(Uuid::new_v4(), CEMENT.into()).await.unwrap_err();
  assert!(matches!(err, Error::UnmatchedNotFound(_)));

  let id = queued_typo(&f).await;
  let err = reconciler.resolve(id, "missing".into()).await.unwrap_err();
  assert!(matches!(err, Error::MaterialNotFound(_)));

  let mut row = f.row("Гвозди строительные 100 мм", 0.0);
  row.raw_price = None;
  let report = reconciler.import(batch(vec![row])).await.unwrap();
  let err = reconciler
    .resolve(report.unmatched_ids[0], "sand-river".into())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::MissingPrice(_)));
}

// ─── Legacy migration ────────────────────────────────────────────────────────

fn legacy(json: serde_json::Value) -> Vec<LegacyMaterial> {
  serde_json::from_value(json).unwrap()
}

#[tokio::test]
async fn legacy_catalog_is_migrated_through_the_price_history() {
  let f = fixture().await;
  let reconciler = f.reconciler();
  let items = legacy(serde_json::json!([
    {
      "id": "tile-ceramic-30",
      "name": "Плитка керамическая 30x30",
      "unit": "м2",
      "labor_cost": 350.0,
      "price_history": [
        { "price": 890.0, "price_date": "2024-03-01" },
        { "price": 820.0, "price_date": "2024-01-15" }
      ],
      "aliases": ["Плитка 30*30", "  "]
    },
    {
      "id": "primer-5l",
      "name": "Грунтовка 5 л",
      "unit": "шт",
      "active": false,
      "category": "Химия",
      "price_history": [
        { "price": 410.0, "price_date": "2024-02-10", "source_type": "website", "source_name": "stroy.example" }
      ]
    }
  ]));

  let report = reconciler.migrate(items.clone()).await.unwrap();
  assert_eq!(report, MigrationReport { materials: 2, aliases: 1, prices: 3, conflicts: 0 });

  let tile = f.store.get_material(&"tile-ceramic-30".into()).await.unwrap().unwrap();
  assert_eq!(tile.work_rate, 350.0);
  assert_eq!(tile.category.as_deref(), Some("Строительные материалы"));
  assert!(tile.active);
  let primer = f.store.get_material(&"primer-5l".into()).await.unwrap().unwrap();
  assert!(!primer.active);
  assert_eq!(primer.category.as_deref(), Some("Химия"));

  // Out-of-order entries still form one supersession chain.
  let history = reconciler.history().history(&"tile-ceramic-30".into()).await.unwrap();
  assert_eq!(history.len(), 2);
  assert_eq!(history[0].price, 820.0);
  assert_eq!(history[0].interval.valid_to, Some(d("2024-02-29")));
  assert!(history[1].is_active);
  assert_eq!(history[1].currency, "RUB");
  check_line(&history).unwrap();

  let source = f
    .store
    .find_price_source(SourceType::Manual, "Migration")
    .await
    .unwrap()
    .unwrap();
  assert_eq!(source.doc_date, Some(d("2024-01-15")));
  assert_eq!(history[0].source_id, source.source_id);
  let website = f.store.find_price_source(SourceType::Website, "stroy.example").await.unwrap();
  assert!(website.is_some());

  let aliases = f.store.find_aliases(&fold("плитка 30*30"), None).await.unwrap();
  assert_eq!(aliases.len(), 1);
  assert_eq!(aliases[0].provenance, AliasProvenance::Manual);

  // A second run confirms what the first one wrote.
  let again = reconciler.migrate(items).await.unwrap();
  assert_eq!(again.prices, 3);
  assert_eq!(reconciler.history().history(&"tile-ceramic-30".into()).await.unwrap().len(), 2);
  assert_eq!(f.store.find_aliases(&fold("плитка 30*30"), None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn legacy_price_contradicting_closed_history_is_skipped() {
  let f = fixture().await;
  let reconciler = f.reconciler();
  reconciler
    .migrate(legacy(serde_json::json!([{
      "id": CEMENT,
      "name": "Цемент М500 50 кг",
      "unit": "мешок",
      "price_history": [
        { "price": 450.0, "price_date": "2024-01-10" },
        { "price": 470.0, "price_date": "2024-02-01" }
      ]
    }])))
    .await
    .unwrap();

  let report = reconciler
    .migrate(legacy(serde_json::json!([{
      "id": CEMENT,
      "name": "Цемент М500 50 кг",
      "unit": "мешок",
      "price_history": [{ "price": 430.0, "price_date": "2024-01-20" }]
    }])))
    .await
    .unwrap();

  assert_eq!(report.prices, 0);
  assert_eq!(report.conflicts, 1);
  let history = reconciler.history().history(&CEMENT.into()).await.unwrap();
  assert_eq!(history.len(), 2);
  assert!(history.iter().all(|o| o.price != 430.0));
}
