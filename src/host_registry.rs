// Aggregates heartbeats and assignment writes. §4.2.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::coordination::CoordinationStore;
use crate::errors::ServerResult;
use crate::segment::Segment;
use crate::types::{AssignmentRecord, AssignmentRow, HostLoad, ServiceRole, ServiceRow};

pub struct HeartbeatOpts {
  pub segment: Option<String>,
  pub available_bytes: Option<u64>,
  pub load: Option<f64>,
}

impl HeartbeatOpts {
  pub fn none() -> Self {
    HeartbeatOpts { segment: None, available_bytes: None, load: None }
  }
}

pub struct HostRegistry {
  store: Arc<dyn CoordinationStore>,
  /// batched assignment writes, keyed by `"<hostname>:<segment_id>"`.
  /// `None` marks a pending deletion.
  batch: Mutex<HashMap<String, Option<AssignmentRow>>>,
}

impl HostRegistry {
  pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
    HostRegistry { store, batch: Mutex::new(HashMap::new()) }
  }

  /// upserts a `services` row. On first heartbeat for `id`,
  /// `first_heartbeat == last_heartbeat`; on refresh, only
  /// `last_heartbeat` and the optional fields advance.
  pub async fn heartbeat(&self, role: ServiceRole, node: &str, ttl: f64, opts: HeartbeatOpts) -> ServerResult<ServiceRow> {
    let id = ServiceRow::service_id(role, node, opts.segment.as_deref());
    let now = self.store.now();
    let existing = self.store.get_service(&id).await?;

    let row = match existing {
      Some(mut row) => {
        row.last_heartbeat = now;
        row.ttl = ttl;
        if opts.available_bytes.is_some() {
          row.available_bytes = opts.available_bytes;
        }
        if opts.load.is_some() {
          row.load = opts.load;
        }
        row
      }
      None => ServiceRow {
        id: id.clone(),
        role,
        node: node.to_string(),
        segment: opts.segment,
        first_heartbeat: now,
        last_heartbeat: now,
        ttl,
        available_bytes: opts.available_bytes,
        load: opts.load,
      },
    };

    self.store.put_service(row.clone()).await?;
    Ok(row)
  }

  /// batched form of `heartbeat`; equivalent to N calls, atomic per row.
  pub async fn bulk_heartbeat(&self, role: ServiceRole, rows: Vec<(String, f64, HeartbeatOpts)>) -> ServerResult<Vec<ServiceRow>> {
    let mut out = Vec::with_capacity(rows.len());
    for (node, ttl, opts) in rows {
      out.push(self.heartbeat(role, &node, ttl, opts).await?);
    }
    Ok(out)
  }

  pub async fn get_hosts(&self) -> ServerResult<Vec<ServiceRow>> {
    let now = self.store.now();
    let rows = self.store.list_services().await?;
    Ok(rows.into_iter()
      .filter(|row| row.role == ServiceRole::TroughNodes)
      .filter(|row| row.is_healthy_at(now))
      .collect())
  }

  pub async fn hosts_exist(&self) -> ServerResult<bool> {
    Ok(!self.get_hosts().await?.is_empty())
  }

  /// enqueues an assignment row into the in-memory batch; does not touch
  /// the coordination store until `commit_assignments`.
  pub async fn assign(&self, hostname: &str, segment: &Segment, remote_path: &str, hash_ring: u64) {
    let key = AssignmentRow::host_key(hostname, &segment.id);
    let row = AssignmentRow {
      id: key.clone(),
      hash_ring,
      node: hostname.to_string(),
      segment: segment.id.clone(),
      bytes: segment.size,
      remote_path: remote_path.to_string(),
    };
    self.batch.lock().await.insert(key, Some(row));
  }

  /// enqueues a deletion of `hostname:segment.id` into the batch.
  pub async fn unassign_key(&self, hostname: &str, segment_id: &str) {
    let key = AssignmentRow::host_key(hostname, segment_id);
    self.batch.lock().await.insert(key, None);
  }

  /// atomically inserts (or replaces) all batched rows, then clears the
  /// batch. On failure, the batch is preserved so the next tick can retry;
  /// per §5 this is not a cross-row transaction, so a crash mid-batch is
  /// tolerated by re-planning on the next tick.
  pub async fn commit_assignments(&self) -> ServerResult<()> {
    let mut guard = self.batch.lock().await;
    let pending: Vec<(String, Option<AssignmentRow>)> = guard.drain().collect();

    for (key, entry) in &pending {
      let result = match entry {
        Some(row) => self.store.put_assignment(AssignmentRecord::Placement(row.clone())).await,
        None => self.store.delete_assignment(key).await,
      };
      if let Err(e) = result {
        // preserve the whole batch (including already-applied entries,
        // which are idempotent to reapply) for the next tick's retry.
        for (k, v) in pending {
          guard.insert(k, v);
        }
        return Err(e);
      }
    }
    Ok(())
  }

  pub async fn unassign(&self, row: &AssignmentRow) -> ServerResult<()> {
    self.store.delete_assignment(&row.id).await
  }

  pub async fn segments_for_host(&self, host: &str, local_data: std::path::PathBuf) -> ServerResult<Vec<Segment>> {
    let records = self.store.list_assignments().await?;
    Ok(records.into_iter()
      .filter_map(|r| r.as_placement().cloned())
      .filter(|row| row.node == host)
      .map(|row| Segment::new(row.segment, row.bytes, local_data.clone(), self.store.clone()))
      .collect())
  }

  /// per healthy host, `{node, assigned_bytes, available_bytes}`; load is
  /// derived lazily by the caller via `HostLoad::load()`.
  pub async fn host_load(&self) -> ServerResult<Vec<HostLoad>> {
    let hosts = self.get_hosts().await?;
    let records = self.store.list_assignments().await?;

    let mut assigned: HashMap<String, u64> = HashMap::new();
    for row in records.into_iter().filter_map(|r| r.as_placement().cloned()) {
      *assigned.entry(row.node).or_insert(0) += row.bytes;
    }

    Ok(hosts.into_iter()
      .map(|host| HostLoad {
        assigned_bytes: *assigned.get(&host.node).unwrap_or(&0),
        available_bytes: host.available_bytes.unwrap_or(0),
        node: host.node,
      })
      .collect())
  }

  /// see SPEC_FULL.md / DESIGN.md for the derivation: imbalance between
  /// the most- and least-loaded host, plus the load a single
  /// `max_segment_bytes`-sized move would add to the least-loaded host.
  /// 0 when moving the largest segment wouldn't close a meaningful gap.
  pub fn min_acceptable_load_ratio(host_loads: &[HostLoad], max_segment_bytes: u64) -> f64 {
    if host_loads.len() < 2 {
      return 0.0;
    }
    let max_load = host_loads.iter().map(|h| h.load()).fold(f64::MIN, f64::max);
    let min_load = host_loads.iter().map(|h| h.load()).fold(f64::MAX, f64::min);

    let least_loaded_available = host_loads.iter()
      .min_by(|a, b| a.load().partial_cmp(&b.load()).unwrap())
      .map(|h| h.available_bytes)
      .unwrap_or(0);
    let bump = if least_loaded_available == 0 {
      0.0
    } else {
      max_segment_bytes as f64 / least_loaded_available as f64
    };

    let imbalance = max_load - min_load;
    if imbalance < bump {
      0.0
    } else {
      imbalance + bump
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::coordination::memory::MemoryCoordinationStore;

  fn registry() -> HostRegistry {
    HostRegistry::new(Arc::new(MemoryCoordinationStore::new()))
  }

  #[tokio::test]
  async fn heartbeat_then_expiry_empties_get_hosts() {
    let reg = registry();
    reg.heartbeat(ServiceRole::TroughNodes, "h", 0.3, HeartbeatOpts::none()).await.unwrap();
    assert!(reg.hosts_exist().await.unwrap());

    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    assert!(!reg.hosts_exist().await.unwrap());
  }

  #[tokio::test]
  async fn assign_then_commit_produces_expected_id() {
    let store = Arc::new(MemoryCoordinationStore::new());
    let reg = HostRegistry::new(store.clone());
    let segment = Segment::new("test-segment", 100, std::path::PathBuf::from("/tmp"), store.clone());

    reg.assign("test-pool", &segment, "/fake/path", 0).await;
    reg.commit_assignments().await.unwrap();

    let copies = segment.all_copies().await.unwrap();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].id, "test-pool:test-segment");
  }

  #[test]
  fn min_acceptable_load_ratio_matches_spec_literal_case() {
    let mib = 1024 * 1024;
    let kib128 = 131_072;
    let loads = vec![
      HostLoad { node: "a".to_string(), assigned_bytes: 5 * kib128, available_bytes: mib },
      HostLoad { node: "b".to_string(), assigned_bytes: 3 * kib128, available_bytes: mib },
    ];
    let ratio = HostRegistry::min_acceptable_load_ratio(&loads, kib128);
    assert!((ratio - 0.375).abs() < 1e-9, "got {}", ratio);
  }

  #[test]
  fn min_acceptable_load_ratio_is_zero_when_balanced() {
    let mib = 1024 * 1024;
    let loads = vec![
      HostLoad { node: "a".to_string(), assigned_bytes: 500_000, available_bytes: mib },
      HostLoad { node: "b".to_string(), assigned_bytes: 500_000, available_bytes: mib },
    ];
    assert_eq!(HostRegistry::min_acceptable_load_ratio(&loads, 1024), 0.0);
  }
}
