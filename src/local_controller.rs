// Per-node loop: heartbeat, pull assigned segments, serve. §4.6.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use hyper::body::Bytes;
use tokio::time::{sleep_until, Instant};
use warp::{Filter, Rejection, Reply};

use crate::bulk_store::BulkStore;
use crate::coordination::CoordinationStore;
use crate::errors::{server_result_into_warp, ServerError, ServerResult};
use crate::host_registry::{HeartbeatOpts, HostRegistry};
use crate::opt::Opt;
use crate::schema::SchemaRegistry;
use crate::segment::Segment;
use crate::types::ServiceRole;

#[derive(Clone)]
pub struct LocalSyncController {
  opt: Opt,
  store: Arc<dyn CoordinationStore>,
  bulk_store: Arc<dyn BulkStore>,
}

impl LocalSyncController {
  pub fn new(opt: Opt, store: Arc<dyn CoordinationStore>, bulk_store: Arc<dyn BulkStore>) -> Self {
    LocalSyncController { opt, store, bulk_store }
  }

  fn registry(&self) -> HostRegistry {
    HostRegistry::new(self.store.clone())
  }

  fn segment(&self, segment_id: &str, size: u64) -> Segment {
    Segment::new(segment_id, size, self.opt.local_data.clone(), self.store.clone())
  }

  /// emits this node's own `trough-sync-local` presence row. `segment` is
  /// `None` here; per-segment `trough-read` rows are heartbeated
  /// separately in `sync_segments`.
  pub async fn heartbeat(&self) -> ServerResult<()> {
    let ttl = self.opt.election_cycle * 3.0;
    self.registry().heartbeat(ServiceRole::TroughSyncLocal, &self.opt.hostname, ttl, HeartbeatOpts::none()).await?;
    Ok(())
  }

  /// copies a segment in from the bulk store, consuming the whole result
  /// stream; the first element carrying a non-empty error is fatal.
  pub async fn copy_segment_from_hdfs(&self, segment: &Segment) -> ServerResult<()> {
    let remote_path = segment.remote_path(&self.opt.hdfs_path);
    self.bulk_store.copy_to_local(&remote_path, &segment.local_path()).await
      .map(|_| ())
      .map_err(|e| ServerError::copy_error(format!("copying {}: {}", remote_path, e)))
  }

  /// one tick: pull assigned segments that are missing or stale locally,
  /// with bounded concurrency, then advertise presence.
  pub async fn sync_segments(&self) -> ServerResult<()> {
    let registry = self.registry();
    let segments = registry.segments_for_host(&self.opt.hostname, self.opt.local_data.clone()).await?;

    let remote_listing = match self.bulk_store.ls(&self.opt.hdfs_path).await {
      Ok(entries) => entries,
      Err(e) => {
        log::error!("listing {} failed: {}", self.opt.hdfs_path, e);
        Vec::new()
      }
    };

    let to_copy: Vec<Segment> = segments.into_iter()
      .filter(|segment| {
        let remote_stat = remote_listing.iter().find(|f| f.path.ends_with(&format!("{}.sqlite", segment.id)));
        let local_path = segment.local_path();
        match (remote_stat, local_path.metadata()) {
          (Some(_), Err(_)) => true, // missing locally
          (Some(stat), Ok(meta)) => {
            let local_mtime: Option<chrono::DateTime<chrono::Utc>> = meta.modified().ok()
              .map(|t| t.into());
            local_mtime.map_or(true, |lm| stat.mtime > lm)
          }
          (None, _) => false,
        }
      })
      .collect();

    let copy_concurrency = self.opt.copy_concurrency;
    let results: Vec<(String, ServerResult<()>)> = stream::iter(to_copy)
      .map(|segment| async move {
        let result = self.copy_segment_from_hdfs(&segment).await;
        (segment.id.clone(), result)
      })
      .buffer_unordered(copy_concurrency)
      .collect()
      .await;

    let mut materialized = Vec::new();
    for (segment_id, result) in results {
      match result {
        Ok(()) => materialized.push(segment_id),
        Err(e) => log::error!("copying segment {} failed this tick (skipping): {}", segment_id, e),
      }
    }

    let available_bytes = available_bytes(&self.opt.local_data);
    registry.heartbeat(
      ServiceRole::TroughNodes,
      &self.opt.hostname,
      self.opt.election_cycle * 3.0,
      HeartbeatOpts { segment: None, available_bytes: Some(available_bytes), load: None },
    ).await?;

    let read_rows: Vec<(String, f64, HeartbeatOpts)> = materialized.into_iter()
      .map(|segment_id| (
        self.opt.hostname.clone(),
        self.opt.election_cycle * 3.0,
        HeartbeatOpts { segment: Some(segment_id), available_bytes: None, load: None },
      ))
      .collect();
    if !read_rows.is_empty() {
      registry.bulk_heartbeat(ServiceRole::TroughRead, read_rows).await?;
    }

    Ok(())
  }

  /// materializes an empty SQLite file for `segment_id`, applying the
  /// named schema blueprint (default `"default"`). Idempotent if a valid
  /// local file already exists.
  pub async fn provision_writable_segment(&self, segment_id: &str, schema_id: Option<&str>) -> ServerResult<()> {
    let segment = self.segment(segment_id, 0);
    if segment.local_segment_exists() {
      return Ok(());
    }
    let schema_registry = SchemaRegistry::new(self.store.clone());
    let schema_id = schema_id.unwrap_or(crate::schema::DEFAULT_SCHEMA_ID);
    let sql = schema_registry.sql_for(schema_id).await?;
    segment.provision_local_segment(&sql)
  }

  /// runs the heartbeat and sync loops concurrently, forever.
  pub async fn run_forever(&self) -> ServerResult<()> {
    let interval = Duration::from_secs_f64(self.opt.run_interval);

    let heartbeat_loop = async {
      let mut last_t = Instant::now();
      loop {
        let planned_t = last_t + interval;
        if Instant::now() < planned_t {
          sleep_until(planned_t).await;
        }
        last_t = Instant::now();
        if let Err(e) = self.heartbeat().await {
          log::error!("heartbeat failed: {}", e);
        }
      }
    };

    let sync_loop = async {
      let mut last_t = Instant::now();
      loop {
        let planned_t = last_t + interval;
        if Instant::now() < planned_t {
          sleep_until(planned_t).await;
        }
        last_t = Instant::now();
        let tick_deadline = last_t + interval;
        if let Err(e) = crate::retry::with_backoff(tick_deadline, || self.sync_segments()).await {
          log::error!("sync_segments failed this tick: {}", e);
        }
      }
    };

    futures::future::join(heartbeat_loop, sync_loop).await;
    Ok(())
  }

  /// `POST /` with body = segment id. §6 HTTP surface.
  pub fn warp_filter(self) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let controller = self;
    warp::post()
      .and(warp::path::end())
      .and(warp::filters::body::bytes())
      .and_then(move |body: Bytes| {
        let controller = controller.clone();
        async move {
          let segment_id = String::from_utf8_lossy(&body).to_string();
          let result = controller.provision_writable_segment(&segment_id, None).await;
          server_result_into_warp::<()>(result)
        }
      })
  }
}

/// the standard library has no portable free-disk-space query, so this
/// reports a fixed capacity per healthy node rather than a real
/// filesystem statistic; see DESIGN.md.
const ASSUMED_NODE_CAPACITY_BYTES: u64 = 1024 * 1024 * 1024 * 1024; // 1 TiB

fn available_bytes(dir: &std::path::Path) -> u64 {
  if std::fs::metadata(dir).is_ok() {
    ASSUMED_NODE_CAPACITY_BYTES
  } else {
    0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bulk_store::memory::MemoryBulkStore;
  use crate::coordination::memory::MemoryCoordinationStore;
  use std::path::PathBuf;

  fn opt(dir: PathBuf) -> Opt {
    Opt {
      rethinkdb_hosts: "localhost:28015".to_string(),
      hostname: "host-a".to_string(),
      local_data: dir,
      election_cycle: 0.05,
      hdfs_path: "/trough/segments".to_string(),
      hdfs_host: "localhost".to_string(),
      hdfs_port: 9870,
      read_port: 6111,
      write_port: 6222,
      sync_local_port: 6112,
      minimum_assignments: 1,
      run_interval: 0.05,
      copy_concurrency: 20,
      log_level: log::LevelFilter::Info,
    }
  }

  #[tokio::test]
  async fn provision_writable_segment_is_idempotent() {
    let dir = std::env::temp_dir().join(format!("trough-local-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let store = Arc::new(MemoryCoordinationStore::new());
    SchemaRegistry::new(store.clone()).seed_default().await.unwrap();
    let bulk = Arc::new(MemoryBulkStore::new());

    let controller = LocalSyncController::new(opt(dir), store, bulk);
    controller.provision_writable_segment("seg1", None).await.unwrap();
    controller.provision_writable_segment("seg1", None).await.unwrap();
  }

  #[tokio::test]
  async fn heartbeat_advertises_sync_local_presence() {
    let dir = std::env::temp_dir().join(format!("trough-local-test-{}", uuid::Uuid::new_v4()));
    let store = Arc::new(MemoryCoordinationStore::new());
    let bulk = Arc::new(MemoryBulkStore::new());
    let controller = LocalSyncController::new(opt(dir), store.clone(), bulk);

    controller.heartbeat().await.unwrap();
    let rows = store.list_services().await.unwrap();
    assert!(rows.iter().any(|r| r.role == ServiceRole::TroughSyncLocal && r.node == "host-a"));
  }
}
