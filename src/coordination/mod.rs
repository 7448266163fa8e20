// The coordination store abstraction, per spec.md §3/§5. Trough talks to a
// document database (RethinkDB in production) through the four tables
// `services`, `assignment`, `lock`, `schema`. This trait is the seam the
// production RethinkDB-backed client and the in-memory test fixture both
// implement, in the shape of tursodatabase-libsql's storage-server `Store`
// trait and pancake-db's `ServerOpLocks`.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::ServerResult;
use crate::types::{AssignmentRecord, LockRow, SchemaRow, ServiceRow};

/// everything the controllers need from the coordination store. Every method
/// that can race across hosts (lock acquisition, master election) is phrased
/// as a single conditional write so a real RethinkDB client can implement it
/// with one `insert(conflict="error")`-style call instead of read-then-write.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
  /// the store's own clock, used for TTL comparisons. Kept as a method
  /// rather than `Utc::now()` everywhere so tests can control time.
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }

  async fn put_service(&self, row: ServiceRow) -> ServerResult<()>;
  async fn get_service(&self, id: &str) -> ServerResult<Option<ServiceRow>>;
  async fn delete_service(&self, id: &str) -> ServerResult<()>;
  async fn list_services(&self) -> ServerResult<Vec<ServiceRow>>;

  /// insert `row` only if no service with the same id exists, or the
  /// existing one has expired its TTL. Returns true if this call won the
  /// insert. Used both for write-lock style leases and for master election.
  async fn put_service_if_vacant(&self, row: ServiceRow) -> ServerResult<bool>;

  async fn put_assignment(&self, record: AssignmentRecord) -> ServerResult<()>;
  async fn get_assignment(&self, id: &str) -> ServerResult<Option<AssignmentRecord>>;
  async fn delete_assignment(&self, id: &str) -> ServerResult<()>;
  async fn list_assignments(&self) -> ServerResult<Vec<AssignmentRecord>>;

  async fn put_lock(&self, row: LockRow) -> ServerResult<()>;
  async fn get_lock(&self, id: &str) -> ServerResult<Option<LockRow>>;
  async fn delete_lock(&self, id: &str) -> ServerResult<()>;

  /// insert `row` only if no lock with the same id exists, or the existing
  /// one has expired. Returns true if this call won the insert.
  async fn put_lock_if_vacant(&self, row: LockRow) -> ServerResult<bool>;

  async fn put_schema(&self, row: SchemaRow) -> ServerResult<()>;
  async fn get_schema(&self, id: &str) -> ServerResult<Option<SchemaRow>>;
  async fn list_schemas(&self) -> ServerResult<Vec<SchemaRow>>;
}
