// Named, node-owned, TTL'd leases. §4.1.

use std::sync::Arc;

use crate::coordination::CoordinationStore;
use crate::errors::{ServerError, ServerResult};
use crate::types::LockRow;

pub struct Lock {
  store: Arc<dyn CoordinationStore>,
  node: String,
}

impl Lock {
  pub fn new(store: Arc<dyn CoordinationStore>, node: String) -> Self {
    Lock { store, node }
  }

  /// conditional insert of `{id=name, node=self, acquired_on=now, ttl}`.
  /// Succeeds iff no healthy row already exists.
  pub async fn acquire(&self, name: &str, ttl: f64) -> ServerResult<()> {
    let row = LockRow {
      id: name.to_string(),
      node: self.node.clone(),
      segment: name.to_string(),
      acquired_on: self.store.now(),
      ttl,
    };
    let won = self.store.put_lock_if_vacant(row).await?;
    if won {
      Ok(())
    } else {
      Err(ServerError::already_held(name))
    }
  }

  /// returns the row iff it exists and has not expired.
  pub async fn load(&self, name: &str) -> ServerResult<Option<LockRow>> {
    let row = self.store.get_lock(name).await?;
    let now = self.store.now();
    Ok(row.filter(|r| r.is_healthy_at(now)))
  }

  /// deletes the row iff it's held by this node; no-op otherwise.
  pub async fn release(&self, name: &str) -> ServerResult<()> {
    if let Some(row) = self.store.get_lock(name).await? {
      if row.node == self.node {
        self.store.delete_lock(name).await?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::coordination::memory::MemoryCoordinationStore;

  fn lock_for(node: &str) -> Lock {
    Lock::new(Arc::new(MemoryCoordinationStore::new()), node.to_string())
  }

  #[tokio::test]
  async fn second_acquire_fails_with_already_held() {
    let store = Arc::new(MemoryCoordinationStore::new());
    let a = Lock::new(store.clone(), "host-a".to_string());
    let b = Lock::new(store, "host-b".to_string());

    a.acquire("write:lock:s1", 30.0).await.unwrap();
    let err = b.acquire("write:lock:s1", 30.0).await.unwrap_err();
    assert_eq!(err.kind, crate::errors::ServerErrorKind::AlreadyHeld);
  }

  #[tokio::test]
  async fn release_by_non_owner_is_a_no_op() {
    let store = Arc::new(MemoryCoordinationStore::new());
    let a = Lock::new(store.clone(), "host-a".to_string());
    let b = Lock::new(store, "host-b".to_string());

    a.acquire("write:lock:s1", 30.0).await.unwrap();
    b.release("write:lock:s1").await.unwrap();
    assert!(a.load("write:lock:s1").await.unwrap().is_some());
  }

  #[tokio::test]
  async fn release_by_owner_clears_the_row() {
    let lock = lock_for("host-a");
    lock.acquire("write:lock:s1", 30.0).await.unwrap();
    lock.release("write:lock:s1").await.unwrap();
    assert!(lock.load("write:lock:s1").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn expired_lock_can_be_reacquired_by_another_node() {
    let store = Arc::new(MemoryCoordinationStore::new());
    let a = Lock::new(store.clone(), "host-a".to_string());
    let b = Lock::new(store, "host-b".to_string());

    a.acquire("write:lock:s1", 0.0).await.unwrap();
    // ttl of 0 means the row is immediately stale to any future check
    b.acquire("write:lock:s1", 30.0).await.unwrap();
  }
}
