// Named DDL blueprints applied when a writable segment is first
// provisioned. §3 `schema` table.

use std::sync::Arc;

use crate::coordination::CoordinationStore;
use crate::errors::{ServerError, ServerResult};
use crate::types::SchemaRow;

pub const DEFAULT_SCHEMA_ID: &str = "default";
const DEFAULT_SCHEMA_SQL: &str = "create table if not exists t (id integer primary key)";

pub struct SchemaRegistry {
  store: Arc<dyn CoordinationStore>,
}

impl SchemaRegistry {
  pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
    SchemaRegistry { store }
  }

  /// seeds the `"default"` blueprint if it's not already present, so a
  /// fresh fleet can provision writable segments without an operator
  /// first populating the `schema` table by hand.
  pub async fn seed_default(&self) -> ServerResult<()> {
    if self.store.get_schema(DEFAULT_SCHEMA_ID).await?.is_none() {
      self.store.put_schema(SchemaRow {
        id: DEFAULT_SCHEMA_ID.to_string(),
        sql: DEFAULT_SCHEMA_SQL.to_string(),
      }).await?;
    }
    Ok(())
  }

  pub async fn sql_for(&self, schema_id: &str) -> ServerResult<String> {
    self.store.get_schema(schema_id).await?
      .map(|row| row.sql)
      .ok_or_else(|| ServerError::does_not_exist("schema", schema_id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::coordination::memory::MemoryCoordinationStore;

  #[tokio::test]
  async fn seed_default_is_idempotent() {
    let registry = SchemaRegistry::new(Arc::new(MemoryCoordinationStore::new()));
    registry.seed_default().await.unwrap();
    registry.seed_default().await.unwrap();
    assert_eq!(registry.sql_for(DEFAULT_SCHEMA_ID).await.unwrap(), DEFAULT_SCHEMA_SQL);
  }

  #[tokio::test]
  async fn unknown_schema_is_does_not_exist() {
    let registry = SchemaRegistry::new(Arc::new(MemoryCoordinationStore::new()));
    let err = registry.sql_for("nope").await.unwrap_err();
    assert_eq!(err.kind, crate::errors::ServerErrorKind::DoesNotExist);
  }
}
