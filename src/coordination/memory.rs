// In-process coordination store, used by tests and by `trough-sync --dev`.
// Bucketed RwLock<HashMap> to spread contention the way pancake-db's
// `SharedHashMap` does, sized down to four fixed tables instead of a
// generic store.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::coordination::CoordinationStore;
use crate::errors::ServerResult;
use crate::types::{AssignmentRecord, LockRow, SchemaRow, ServiceRow};

const HASH_BUCKETS: usize = 16;

struct Bucketed<V> {
  buckets: Vec<RwLock<HashMap<String, V>>>,
}

impl<V: Clone> Bucketed<V> {
  fn new() -> Self {
    let mut buckets = Vec::with_capacity(HASH_BUCKETS);
    for _ in 0..HASH_BUCKETS {
      buckets.push(RwLock::new(HashMap::new()));
    }
    Bucketed { buckets }
  }

  fn bucket_for(&self, key: &str) -> &RwLock<HashMap<String, V>> {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    &self.buckets[hasher.finish() as usize % HASH_BUCKETS]
  }

  fn get(&self, key: &str) -> Option<V> {
    self.bucket_for(key).read().unwrap().get(key).cloned()
  }

  fn put(&self, key: String, value: V) {
    self.bucket_for(&key).write().unwrap().insert(key, value);
  }

  fn delete(&self, key: &str) {
    self.bucket_for(key).write().unwrap().remove(key);
  }

  fn all(&self) -> Vec<V> {
    self.buckets.iter()
      .flat_map(|b| b.read().unwrap().values().cloned().collect::<Vec<_>>())
      .collect()
  }

  /// insert iff `key` is absent, or present-but-stale per `is_stale`.
  /// Returns true if this call performed the insert.
  fn put_if_vacant(&self, key: String, value: V, is_stale: impl Fn(&V) -> bool) -> bool {
    let bucket = self.bucket_for(&key);
    let mut guard = bucket.write().unwrap();
    let vacant = match guard.get(&key) {
      None => true,
      Some(existing) => is_stale(existing),
    };
    if vacant {
      guard.insert(key, value);
    }
    vacant
  }
}

pub struct MemoryCoordinationStore {
  services: Bucketed<ServiceRow>,
  assignments: Bucketed<AssignmentRecord>,
  locks: Bucketed<LockRow>,
  schemas: Bucketed<SchemaRow>,
}

impl MemoryCoordinationStore {
  pub fn new() -> Self {
    MemoryCoordinationStore {
      services: Bucketed::new(),
      assignments: Bucketed::new(),
      locks: Bucketed::new(),
      schemas: Bucketed::new(),
    }
  }
}

impl Default for MemoryCoordinationStore {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
  async fn put_service(&self, row: ServiceRow) -> ServerResult<()> {
    self.services.put(row.id.clone(), row);
    Ok(())
  }

  async fn get_service(&self, id: &str) -> ServerResult<Option<ServiceRow>> {
    Ok(self.services.get(id))
  }

  async fn delete_service(&self, id: &str) -> ServerResult<()> {
    self.services.delete(id);
    Ok(())
  }

  async fn list_services(&self) -> ServerResult<Vec<ServiceRow>> {
    Ok(self.services.all())
  }

  async fn put_service_if_vacant(&self, row: ServiceRow) -> ServerResult<bool> {
    let now = self.now();
    let id = row.id.clone();
    Ok(self.services.put_if_vacant(id, row, |existing| !existing.is_healthy_at(now)))
  }

  async fn put_assignment(&self, record: AssignmentRecord) -> ServerResult<()> {
    self.assignments.put(record.id().to_string(), record);
    Ok(())
  }

  async fn get_assignment(&self, id: &str) -> ServerResult<Option<AssignmentRecord>> {
    Ok(self.assignments.get(id))
  }

  async fn delete_assignment(&self, id: &str) -> ServerResult<()> {
    self.assignments.delete(id);
    Ok(())
  }

  async fn list_assignments(&self) -> ServerResult<Vec<AssignmentRecord>> {
    Ok(self.assignments.all())
  }

  async fn put_lock(&self, row: LockRow) -> ServerResult<()> {
    self.locks.put(row.id.clone(), row);
    Ok(())
  }

  async fn get_lock(&self, id: &str) -> ServerResult<Option<LockRow>> {
    Ok(self.locks.get(id))
  }

  async fn delete_lock(&self, id: &str) -> ServerResult<()> {
    self.locks.delete(id);
    Ok(())
  }

  async fn put_lock_if_vacant(&self, row: LockRow) -> ServerResult<bool> {
    let now = self.now();
    let id = row.id.clone();
    Ok(self.locks.put_if_vacant(id, row, |existing| !existing.is_healthy_at(now)))
  }

  async fn put_schema(&self, row: SchemaRow) -> ServerResult<()> {
    self.schemas.put(row.id.clone(), row);
    Ok(())
  }

  async fn get_schema(&self, id: &str) -> ServerResult<Option<SchemaRow>> {
    Ok(self.schemas.get(id))
  }

  async fn list_schemas(&self) -> ServerResult<Vec<SchemaRow>> {
    Ok(self.schemas.all())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use crate::types::ServiceRole;

  fn service(id: &str, ttl: f64) -> ServiceRow {
    ServiceRow {
      id: id.to_string(),
      role: ServiceRole::TroughSyncMaster,
      node: "host-a".to_string(),
      segment: None,
      first_heartbeat: Utc::now(),
      last_heartbeat: Utc::now(),
      ttl,
      available_bytes: None,
      load: None,
    }
  }

  #[tokio::test]
  async fn put_service_if_vacant_only_wins_once() {
    let store = MemoryCoordinationStore::new();
    let a = store.put_service_if_vacant(service("trough-sync-master", 30.0)).await.unwrap();
    let b = store.put_service_if_vacant(service("trough-sync-master", 30.0)).await.unwrap();
    assert!(a);
    assert!(!b);
  }

  #[tokio::test]
  async fn expired_service_can_be_reclaimed() {
    let store = MemoryCoordinationStore::new();
    let mut stale = service("trough-sync-master", 30.0);
    stale.last_heartbeat = Utc::now() - chrono::Duration::seconds(60);
    store.put_service(stale).await.unwrap();

    let won = store.put_service_if_vacant(service("trough-sync-master", 30.0)).await.unwrap();
    assert!(won);
  }

  #[tokio::test]
  async fn list_and_delete_round_trip() {
    let store = MemoryCoordinationStore::new();
    store.put_service(service("a", 30.0)).await.unwrap();
    store.put_service(service("b", 30.0)).await.unwrap();
    assert_eq!(store.list_services().await.unwrap().len(), 2);

    store.delete_service("a").await.unwrap();
    assert_eq!(store.list_services().await.unwrap().len(), 1);
  }
}
