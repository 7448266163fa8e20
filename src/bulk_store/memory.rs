// In-process BulkStore fixture, used by tests in place of a real WebHDFS
// namenode.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use chrono::Utc;

use crate::bulk_store::BulkStore;
use crate::errors::{ServerError, ServerResult};
use crate::types::FileStat;

pub struct MemoryBulkStore {
  files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBulkStore {
  pub fn new() -> Self {
    MemoryBulkStore { files: RwLock::new(HashMap::new()) }
  }

  pub fn put(&self, remote_path: &str, contents: Vec<u8>) {
    self.files.write().unwrap().insert(remote_path.to_string(), contents);
  }
}

impl Default for MemoryBulkStore {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait::async_trait]
impl BulkStore for MemoryBulkStore {
  async fn ls(&self, remote_dir: &str) -> ServerResult<Vec<FileStat>> {
    let prefix = format!("{}/", remote_dir.trim_end_matches('/'));
    let guard = self.files.read().unwrap();
    Ok(guard.iter()
      .filter(|(path, _)| path.starts_with(&prefix) && !path[prefix.len()..].contains('/'))
      .map(|(path, contents)| FileStat {
        path: path.clone(),
        length: contents.len() as u64,
        mtime: Utc::now(),
      })
      .collect())
  }

  async fn copy_to_local(&self, remote_path: &str, local_path: &Path) -> ServerResult<u64> {
    let contents = self.files.read().unwrap().get(remote_path).cloned()
      .ok_or_else(|| ServerError::does_not_exist("remote file", remote_path))?;
    std::fs::write(local_path, &contents)
      .map_err(|e| ServerError::provision_error(format!("writing {}: {}", local_path.display(), e)))?;
    Ok(contents.len() as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn ls_only_lists_direct_children() {
    let store = MemoryBulkStore::new();
    store.put("/trough/segments/a.sqlite", vec![1, 2, 3]);
    store.put("/trough/segments/nested/b.sqlite", vec![4]);

    let listed = store.ls("/trough/segments").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, "/trough/segments/a.sqlite");
    assert_eq!(listed[0].length, 3);
  }

  #[tokio::test]
  async fn copy_to_local_writes_file() {
    let dir = tempfile_dir();
    let store = MemoryBulkStore::new();
    store.put("/trough/segments/a.sqlite", vec![9, 9, 9]);

    let local = dir.join("a.sqlite");
    let written = store.copy_to_local("/trough/segments/a.sqlite", &local).await.unwrap();
    assert_eq!(written, 3);
    assert_eq!(std::fs::read(&local).unwrap(), vec![9, 9, 9]);
  }

  fn tempfile_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("trough-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }
}
