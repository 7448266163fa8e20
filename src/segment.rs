// A per-segment facade, stateless except identity. §4.3.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::coordination::CoordinationStore;
use crate::errors::{ServerError, ServerResult};
use crate::hashing::minimum_assignments;
use crate::lock::Lock;
use crate::types::{AssignmentRecord, AssignmentRow, LockRow, ServiceRole, ServiceRow};

pub struct Segment {
  pub id: String,
  pub size: u64,
  local_data: PathBuf,
  store: Arc<dyn CoordinationStore>,
}

impl Segment {
  pub fn new(id: impl Into<String>, size: u64, local_data: PathBuf, store: Arc<dyn CoordinationStore>) -> Self {
    Segment { id: id.into(), size, local_data, store }
  }

  pub fn remote_path(&self, hdfs_root: &str) -> String {
    format!("{}/{}.sqlite", hdfs_root.trim_end_matches('/'), self.id)
  }

  pub fn host_key(&self, node: &str) -> String {
    AssignmentRow::host_key(node, &self.id)
  }

  pub fn minimum_assignments(&self, floor: u32) -> ServerResult<u32> {
    minimum_assignments(&self.id, self.size, floor)
  }

  pub async fn all_copies(&self) -> ServerResult<Vec<AssignmentRow>> {
    let records = self.store.list_assignments().await?;
    Ok(records.into_iter()
      .filter_map(|r| r.as_placement().cloned())
      .filter(|row| row.segment == self.id)
      .collect())
  }

  pub async fn readable_copies(&self) -> ServerResult<Vec<ServiceRow>> {
    let now = self.store.now();
    let rows = self.store.list_services().await?;
    Ok(rows.into_iter()
      .filter(|row| row.role == ServiceRole::TroughRead)
      .filter(|row| row.segment.as_deref() == Some(self.id.as_str()))
      .filter(|row| row.is_healthy_at(now))
      .collect())
  }

  pub async fn is_assigned_to_host(&self, host: &str) -> ServerResult<bool> {
    Ok(self.all_copies().await?.iter().any(|row| row.node == host))
  }

  pub async fn acquire_write_lock(&self, node: &str, ttl: f64) -> ServerResult<()> {
    let lock = Lock::new(self.store.clone(), node.to_string());
    lock.acquire(&LockRow::lock_id(&self.id), ttl).await
  }

  pub async fn retrieve_write_lock(&self, node: &str) -> ServerResult<Option<LockRow>> {
    let lock = Lock::new(self.store.clone(), node.to_string());
    lock.load(&LockRow::lock_id(&self.id)).await
  }

  pub fn local_path(&self) -> PathBuf {
    self.local_data.join(format!("{}.sqlite", self.id))
  }

  pub fn local_segment_exists(&self) -> bool {
    self.local_path().is_file()
  }

  /// atomically create the file at `local_path()` and execute `schema_sql`
  /// against it, overwriting any pre-existing file. Writes to a
  /// uuid-suffixed temp path and renames into place so a crash mid-DDL
  /// never leaves a half-initialized file visible at `local_path()`.
  pub fn provision_local_segment(&self, schema_sql: &str) -> ServerResult<()> {
    let local_path = self.local_path();
    let tmp_path = self.local_data.join(format!(".{}.{}.tmp", self.id, Uuid::new_v4()));

    let conn = rusqlite::Connection::open(&tmp_path)
      .map_err(|e| ServerError::provision_error(format!("opening {}: {}", tmp_path.display(), e)))?;
    conn.execute_batch(schema_sql)
      .map_err(|e| ServerError::provision_error(format!("applying schema to {}: {}", tmp_path.display(), e)))?;
    drop(conn);

    std::fs::rename(&tmp_path, &local_path)
      .map_err(|e| ServerError::provision_error(format!("renaming {} to {}: {}", tmp_path.display(), local_path.display(), e)))?;
    Ok(())
  }

  pub fn new_service_row(&self, role: ServiceRole, node: &str, ttl: f64) -> ServiceRow {
    let now = Utc::now();
    ServiceRow {
      id: ServiceRow::service_id(role, node, Some(&self.id)),
      role,
      node: node.to_string(),
      segment: Some(self.id.clone()),
      first_heartbeat: now,
      last_heartbeat: now,
      ttl,
      available_bytes: None,
      load: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::coordination::memory::MemoryCoordinationStore;

  fn segment(id: &str) -> Segment {
    Segment::new(id, 0, PathBuf::from("/tmp"), Arc::new(MemoryCoordinationStore::new()))
  }

  #[test]
  fn host_key_matches_spec_literal() {
    let s = segment("test-segment");
    assert_eq!(s.host_key("test-node"), "test-node:test-segment");
  }

  #[test]
  fn minimum_assignments_matches_spec_literal_cases() {
    assert_eq!(segment("123456").minimum_assignments(1).unwrap(), 1);
    assert_eq!(segment("228188").minimum_assignments(1).unwrap(), 2);
  }

  #[tokio::test]
  async fn provision_local_segment_is_idempotent_overwrite() {
    let dir = std::env::temp_dir().join(format!("trough-seg-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let s = Segment::new("seg1", 0, dir, Arc::new(MemoryCoordinationStore::new()));

    s.provision_local_segment("create table if not exists t (x integer)").unwrap();
    assert!(s.local_segment_exists());
    s.provision_local_segment("create table if not exists t (x integer)").unwrap();
    assert!(s.local_segment_exists());
  }
}
