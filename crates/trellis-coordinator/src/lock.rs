//! Keyed mutual exclusion with TTL and bounded acquisition wait.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::LockError;

/// Proof of lock ownership, passed back on release.
#[derive(Debug)]
pub struct LockHandle {
  pub key: String,
  token: u64,
}

/// The distributed-lock capability.
///
/// `acquire` blocks for at most `wait_timeout` and then fails with
/// [`LockError::Busy`]; a `wait_timeout` of zero turns it into a
/// try-lock. Locks expire after `ttl` even if never released, so a
/// crashed holder cannot wedge a key forever. Releasing an expired (or
/// since-reacquired) handle is a no-op.
#[async_trait]
pub trait LockProvider: Send + Sync {
  async fn acquire(
    &self,
    key: &str,
    ttl: Duration,
    wait_timeout: Duration,
  ) -> Result<LockHandle, LockError>;

  async fn release(&self, handle: LockHandle);
}

#[derive(Debug, Clone, Copy)]
struct LockEntry {
  token: u64,
  expires_at: Instant,
}

/// In-process [`LockProvider`] for single-host deployments and tests.
///
/// Acquisition polls the lock table; the poll interval bounds how long
/// a waiter can overshoot a release.
#[derive(Debug, Default)]
pub struct InMemoryLockProvider {
  locks: Mutex<HashMap<String, LockEntry>>,
  next_token: AtomicU64,
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

impl InMemoryLockProvider {
  pub fn new() -> Self {
    Self::default()
  }

  fn try_acquire(&self, key: &str, ttl: Duration) -> Option<LockHandle> {
    let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
    let now = Instant::now();
    match locks.get(key) {
      Some(entry) if entry.expires_at > now => None,
      _ => {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        locks.insert(
          key.to_string(),
          LockEntry {
            token,
            expires_at: now + ttl,
          },
        );
        Some(LockHandle {
          key: key.to_string(),
          token,
        })
      }
    }
  }
}

#[async_trait]
impl LockProvider for InMemoryLockProvider {
  async fn acquire(
    &self,
    key: &str,
    ttl: Duration,
    wait_timeout: Duration,
  ) -> Result<LockHandle, LockError> {
    let started = Instant::now();
    loop {
      if let Some(handle) = self.try_acquire(key, ttl) {
        return Ok(handle);
      }
      if started.elapsed() >= wait_timeout {
        return Err(LockError::Busy {
          key: key.to_string(),
          waited_ms: wait_timeout.as_millis() as u64,
        });
      }
      tokio::time::sleep(POLL_INTERVAL.min(wait_timeout)).await;
    }
  }

  async fn release(&self, handle: LockHandle) {
    let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
    if locks.get(&handle.key).is_some_and(|e| e.token == handle.token) {
      locks.remove(&handle.key);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_second_acquire_with_zero_wait_is_busy() {
    let provider = InMemoryLockProvider::new();
    let ttl = Duration::from_secs(30);

    let _held = provider.acquire("graph:42", ttl, Duration::ZERO).await.unwrap();
    let busy = provider.acquire("graph:42", ttl, Duration::ZERO).await;

    assert!(matches!(busy, Err(LockError::Busy { .. })));
  }

  #[tokio::test]
  async fn test_release_allows_reacquire() {
    let provider = InMemoryLockProvider::new();
    let ttl = Duration::from_secs(30);

    let held = provider.acquire("k", ttl, Duration::ZERO).await.unwrap();
    provider.release(held).await;
    assert!(provider.acquire("k", ttl, Duration::ZERO).await.is_ok());
  }

  #[tokio::test]
  async fn test_expired_lock_can_be_taken() {
    let provider = InMemoryLockProvider::new();

    let _stale = provider
      .acquire("k", Duration::from_millis(20), Duration::ZERO)
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert!(
      provider
        .acquire("k", Duration::from_secs(30), Duration::ZERO)
        .await
        .is_ok()
    );
  }

  #[tokio::test]
  async fn test_stale_handle_release_is_noop() {
    let provider = InMemoryLockProvider::new();

    let stale = provider
      .acquire("k", Duration::from_millis(10), Duration::ZERO)
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let fresh = provider
      .acquire("k", Duration::from_secs(30), Duration::ZERO)
      .await
      .unwrap();

    // Releasing the expired handle must not free the new holder's lock.
    provider.release(stale).await;
    let busy = provider.acquire("k", Duration::from_secs(30), Duration::ZERO).await;
    assert!(busy.is_err());

    provider.release(fresh).await;
  }

  #[tokio::test]
  async fn test_bounded_wait_succeeds_after_release() {
    let provider = std::sync::Arc::new(InMemoryLockProvider::new());
    let held = provider
      .acquire("k", Duration::from_secs(30), Duration::ZERO)
      .await
      .unwrap();

    let waiter = {
      let provider = provider.clone();
      tokio::spawn(async move {
        provider
          .acquire("k", Duration::from_secs(30), Duration::from_millis(500))
          .await
      })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    provider.release(held).await;

    assert!(waiter.await.unwrap().is_ok());
  }
}
