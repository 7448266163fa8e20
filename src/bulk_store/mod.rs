// The bulk store abstraction, per spec.md §3/§6. Segment files live in a
// durable bulk store (HDFS in production, addressed over WebHDFS since no
// Rust-native HDFS client exists); this trait is the seam between that and
// the in-memory fixture used in tests, following the same
// swappable-backend-trait shape as `coordination::CoordinationStore`.

pub mod memory;
pub mod webhdfs;

use async_trait::async_trait;

use crate::errors::ServerResult;
use crate::types::FileStat;

#[async_trait]
pub trait BulkStore: Send + Sync {
  /// list files directly under `remote_dir`, non-recursively.
  async fn ls(&self, remote_dir: &str) -> ServerResult<Vec<FileStat>>;

  /// copy the file at `remote_path` to `local_path`, overwriting. Callers
  /// are expected to provision into a temp path and rename, so a failure
  /// partway through never leaves a corrupt file at `local_path` itself.
  async fn copy_to_local(&self, remote_path: &str, local_path: &std::path::Path) -> ServerResult<u64>;
}
