//! The Import Session Tracker.

use std::sync::Arc;

use chrono::Utc;
use pricebook_core::{
  session::{ImportSession, NewImportSession},
  store::CatalogStore,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{Error, Result};

/// Serialises counter updates of one session across workers.
///
/// The in-memory snapshot is authoritative while the batch runs. Counter
/// updates are persisted best effort; the terminal transition must persist.
pub struct SessionTracker<S> {
  store:      Arc<S>,
  session_id: Uuid,
  session:    Mutex<ImportSession>,
}

impl<S: CatalogStore> SessionTracker<S> {
  /// Create and persist a new session in `processing`.
  pub async fn start(store: Arc<S>, input: NewImportSession) -> Result<Self> {
    let session = store.create_session(input).await.map_err(Error::store)?;
    tracing::info!(
      session_id = %session.session_id,
      source_file = %session.source_file,
      total_rows = session.total_rows,
      "import session started"
    );
    Ok(Self {
      store,
      session_id: session.session_id,
      session: Mutex::new(session),
    })
  }

  pub fn session_id(&self) -> Uuid { self.session_id }

  pub async fn snapshot(&self) -> ImportSession { self.session.lock().await.clone() }

  pub async fn record_processed(&self) -> Result<()> {
    self.count(ImportSession::record_processed).await
  }

  pub async fn record_error(&self) -> Result<()> {
    self.count(ImportSession::record_error).await
  }

  /// `processing → completed`.
  pub async fn complete(&self) -> Result<ImportSession> {
    self.finish(|s| s.complete(Utc::now())).await
  }

  /// `processing → failed`.
  pub async fn fail(&self, reason: &str) -> Result<ImportSession> {
    self.finish(|s| s.fail(reason, Utc::now())).await
  }

  async fn count(
    &self,
    update: impl FnOnce(&mut ImportSession) -> pricebook_core::Result<()>,
  ) -> Result<()> {
    let mut session = self.session.lock().await;
    update(&mut *session)?;
    if let Err(e) = self.store.save_session(&*session).await {
      tracing::warn!(
        session_id = %self.session_id,
        error = %e,
        "could not persist session counters"
      );
    }
    Ok(())
  }

  async fn finish(
    &self,
    transition: impl FnOnce(&mut ImportSession) -> pricebook_core::Result<()>,
  ) -> Result<ImportSession> {
    let mut session = self.session.lock().await;
    let mut next = session.clone();
    transition(&mut next)?;
    self.store.save_session(&next).await.map_err(Error::store)?;
    *session = next.clone();
    Ok(next)
  }
}

#[cfg(test)]
mod tests {
  use pricebook_core::session::SessionStatus;
  use pricebook_store_sqlite::SqliteStore;

  use super::*;

  async fn tracker(total_rows: u64) -> (Arc<SqliteStore>, Arc<SessionTracker<SqliteStore>>) {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let tracker = SessionTracker::start(store.clone(), NewImportSession {
      source_file: "prices.xlsx".into(),
      customer_id: None,
      vendor_id:   None,
      total_rows,
    })
    .await
    .unwrap();
    (store, Arc::new(tracker))
  }

  #[tokio::test]
  async fn concurrent_updates_are_all_counted() {
    let (store, tracker) = tracker(100).await;

    let tasks: Vec<_> = (0..100)
      .map(|i| {
        let tracker = tracker.clone();
        tokio::spawn(async move {
          if i % 4 == 0 {
            tracker.record_error().await.unwrap();
          } else {
            tracker.record_processed().await.unwrap();
          }
        })
      })
      .collect();
    for task in tasks {
      task.await.unwrap();
    }

    let done = tracker.complete().await.unwrap();
    assert_eq!((done.processed_rows, done.error_rows), (75, 25));

    let stored = store.get_session(tracker.session_id()).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.accounted(), 100);
  }

  #[tokio::test]
  async fn failed_session_rejects_further_updates() {
    let (store, tracker) = tracker(2).await;
    tracker.record_processed().await.unwrap();
    tracker.fail("cancelled").await.unwrap();

    assert!(tracker.record_processed().await.is_err());
    assert!(tracker.complete().await.is_err());

    let stored = store.get_session(tracker.session_id()).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Failed);
    assert_eq!(stored.processed_rows, 1);
    assert_eq!(stored.failure_reason.as_deref(), Some("cancelled"));
  }
}
