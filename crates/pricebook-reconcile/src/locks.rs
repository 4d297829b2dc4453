//! Per-key async mutexes.
//!
//! Holders of the same key are serialised; different keys never contend.
//! Entries nobody holds or waits for are pruned on the next `lock` call, so
//! the map stays as small as the set of keys in flight.

use std::{
  collections::HashMap,
  hash::Hash,
  sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub struct KeyedLocks<K> {
  inner: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
  fn default() -> Self { Self { inner: Mutex::new(HashMap::new()) } }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
  pub fn new() -> Self { Self::default() }

  /// Wait for exclusive access to `key`. Access ends when the guard drops.
  pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
    let slot = {
      let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
      map.retain(|_, slot| Arc::strong_count(slot) > 1);
      Arc::clone(map.entry(key.clone()).or_default())
    };
    slot.lock_owned().await
  }

  /// Number of keys currently tracked.
  pub fn len(&self) -> usize {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
  };

  use super::*;

  #[tokio::test]
  async fn same_key_is_serialised() {
    let locks = Arc::new(KeyedLocks::<&'static str>::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..8)
      .map(|_| {
        let (locks, inside, peak) = (locks.clone(), inside.clone(), peak.clone());
        tokio::spawn(async move {
          let _guard = locks.lock(&"cement").await;
          let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(5)).await;
          inside.fetch_sub(1, Ordering::SeqCst);
        })
      })
      .collect();
    for task in tasks {
      task.await.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn different_keys_do_not_contend() {
    let locks = KeyedLocks::new();
    let _a = locks.lock(&"cement").await;
    let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&"sand")).await;
    assert!(b.is_ok());
  }

  #[tokio::test]
  async fn idle_keys_are_pruned() {
    let locks = KeyedLocks::new();
    drop(locks.lock(&1).await);
    drop(locks.lock(&2).await);
    let _held = locks.lock(&3).await;
    assert_eq!(locks.len(), 1);
  }
}
