// Election, fleet scan, assignment planning, writable provisioning. §4.5.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{sleep, sleep_until, Instant};

use crate::bulk_store::BulkStore;
use crate::coordination::CoordinationStore;
use crate::errors::{ServerError, ServerResult};
use crate::hash_ring::HashRing;
use crate::host_registry::{HeartbeatOpts, HostRegistry};
use crate::opt::Opt;
use crate::types::{AssignmentRecord, AssignmentRow, ServiceRole, ServiceRow, RING_ASSIGNMENTS_ID};

/// multiplier on `election_cycle` that sets the master's lease TTL; must be
/// comfortably above 1 so a master's own poll cadence never races its own
/// expiry (see SPEC_FULL.md's note on the source's leader-freshness bug).
const ELECTION_TTL_MULTIPLE: f64 = 3.0;

pub struct MasterSyncController {
  opt: Opt,
  store: Arc<dyn CoordinationStore>,
  bulk_store: Arc<dyn BulkStore>,
  registry: HostRegistry,
}

impl MasterSyncController {
  pub fn new(opt: Opt, store: Arc<dyn CoordinationStore>, bulk_store: Arc<dyn BulkStore>) -> Self {
    let registry = HostRegistry::new(store.clone());
    MasterSyncController { opt, store, bulk_store, registry }
  }

  /// conditional upsert keyed on role: claims the `trough-sync-master` row
  /// if no healthy incumbent exists, refreshes it if the incumbent is self,
  /// otherwise fails. Returns true iff self now holds the role.
  pub async fn hold_election(&self) -> ServerResult<bool> {
    let id = ServiceRole::TroughSyncMaster.as_str().to_string();
    let now = self.store.now();
    let ttl = self.opt.election_cycle * ELECTION_TTL_MULTIPLE;

    match self.store.get_service(&id).await? {
      Some(incumbent) if incumbent.is_healthy_at(now) => Ok(incumbent.node == self.opt.hostname),
      _ => {
        let row = ServiceRow {
          id,
          role: ServiceRole::TroughSyncMaster,
          node: self.opt.hostname.clone(),
          segment: None,
          first_heartbeat: now,
          last_heartbeat: now,
          ttl,
          available_bytes: None,
          load: None,
        };
        self.store.put_service_if_vacant(row).await
      }
    }
  }

  pub async fn wait_to_become_leader(&self) -> ServerResult<()> {
    loop {
      if self.hold_election().await? {
        return Ok(());
      }
      sleep(Duration::from_secs_f64(self.opt.election_cycle)).await;
    }
  }

  pub async fn wait_for_hosts(&self) -> ServerResult<()> {
    loop {
      if self.registry.hosts_exist().await? {
        return Ok(());
      }
      sleep(Duration::from_secs_f64(self.opt.election_cycle)).await;
    }
  }

  /// lazily enumerates the bulk store's segment root as a stream of
  /// per-item results, per §9's note that the bulk-store listing should
  /// surface failures as a stream rather than fail the whole call.
  pub fn get_segment_file_list(&self) -> impl futures::Stream<Item = ServerResult<crate::types::FileStat>> + '_ {
    async_stream::stream! {
      match self.bulk_store.ls(&self.opt.hdfs_path).await {
        Ok(files) => {
          for file in files {
            yield Ok(file);
          }
        }
        Err(e) => yield Err(e),
      }
    }
  }

  /// plans and commits assignments for one tick, per §4.5 steps 1-4.
  pub async fn assign_segments(&self) -> ServerResult<()> {
    let hosts = self.registry.get_hosts().await?;
    let host_names: Vec<String> = hosts.iter().map(|h| h.node.clone()).collect();
    if host_names.is_empty() {
      return Ok(());
    }
    let ring = HashRing::build(&host_names)?;

    let current_snapshot = match self.store.get_assignment(RING_ASSIGNMENTS_ID).await? {
      Some(AssignmentRecord::Ring(snapshot)) => Some(snapshot),
      _ => None,
    };
    if current_snapshot.as_ref().map_or(true, |s| ring.changed_since(s)) {
      self.store.put_assignment(AssignmentRecord::Ring(ring.snapshot())).await?;
    }

    let file_results: Vec<ServerResult<crate::types::FileStat>> =
      self.get_segment_file_list().collect().await;
    let files: Vec<crate::types::FileStat> = file_results.into_iter()
      .filter_map(|r| match r {
        Ok(file) => Some(file),
        Err(e) => {
          log::error!("listing {} failed: {}", self.opt.hdfs_path, e);
          None
        }
      })
      .collect();
    let existing_records = self.store.list_assignments().await?;
    let existing: Vec<_> = existing_records.iter().filter_map(|r| r.as_placement()).collect();

    for file in &files {
      let segment_id = segment_id_from_path(&file.path);
      let k = crate::hashing::minimum_assignments(&segment_id, file.length, self.opt.minimum_assignments)? as usize;
      let wanted_hosts = ring.place(&segment_id, k)?;

      let current_hosts: Vec<&str> = existing.iter()
        .filter(|row| row.segment == segment_id)
        .map(|row| row.node.as_str())
        .collect();

      for host in &wanted_hosts {
        if !current_hosts.contains(&host.as_str()) {
          let segment = crate::segment::Segment::new(segment_id.clone(), file.length, self.opt.local_data.clone(), self.store.clone());
          self.registry.assign(host, &segment, &file.path, 0).await;
        }
      }
      for host in &current_hosts {
        if !wanted_hosts.iter().any(|h| h == host) {
          self.registry.unassign_key(host, &segment_id).await;
        }
      }
    }

    self.rebalance(&files).await?;
    self.registry.commit_assignments().await
  }

  /// bounded best-effort rebalancing pass: while imbalance exceeds
  /// `min_acceptable_load_ratio`, move the largest segment on the
  /// most-loaded host to the least-loaded host, batched alongside the
  /// rest of this tick's assignment writes.
  ///
  /// Host loads and placements are tracked in a local working copy rather
  /// than re-read from the store each iteration, since moves planned
  /// earlier in this same tick are only queued in the registry's batch
  /// and wouldn't otherwise be visible until `commit_assignments`.
  async fn rebalance(&self, files: &[crate::types::FileStat]) -> ServerResult<()> {
    const MAX_ITERATIONS: usize = 8;
    let max_segment_bytes = files.iter().map(|f| f.length).max().unwrap_or(0);

    let mut host_loads = self.registry.host_load().await?;
    if host_loads.len() < 2 {
      return Ok(());
    }
    let mut placements: Vec<AssignmentRow> = self.store.list_assignments().await?
      .into_iter()
      .filter_map(|r| r.as_placement().cloned())
      .collect();

    for _ in 0..MAX_ITERATIONS {
      let threshold = HostRegistry::min_acceptable_load_ratio(&host_loads, max_segment_bytes);
      if threshold <= 0.0 {
        return Ok(());
      }

      let most_idx = host_loads.iter().enumerate()
        .max_by(|(_, a), (_, b)| a.load().partial_cmp(&b.load()).unwrap())
        .map(|(i, _)| i);
      let least_idx = host_loads.iter().enumerate()
        .min_by(|(_, a), (_, b)| a.load().partial_cmp(&b.load()).unwrap())
        .map(|(i, _)| i);
      let (most_idx, least_idx) = match (most_idx, least_idx) {
        (Some(m), Some(l)) if m != l => (m, l),
        _ => return Ok(()),
      };
      let (most_node, least_node) = (host_loads[most_idx].node.clone(), host_loads[least_idx].node.clone());

      let biggest_pos = placements.iter().enumerate()
        .filter(|(_, row)| row.node == most_node)
        .max_by_key(|(_, row)| row.bytes)
        .map(|(i, _)| i);
      let row = match biggest_pos {
        Some(i) => placements[i].clone(),
        None => return Ok(()),
      };

      self.registry.unassign_key(&row.node, &row.segment).await;
      let segment = crate::segment::Segment::new(row.segment.clone(), row.bytes, self.opt.local_data.clone(), self.store.clone());
      self.registry.assign(&least_node, &segment, &row.remote_path, 0).await;

      host_loads[most_idx].assigned_bytes -= row.bytes;
      host_loads[least_idx].assigned_bytes += row.bytes;
      if let Some(pos) = placements.iter().position(|r| r.id == row.id) {
        placements[pos].node = least_node.clone();
        placements[pos].id = AssignmentRow::host_key(&least_node, &row.segment);
      }
    }
    Ok(())
  }

  /// returns the URL of a host now materializing `segment_id` for writes.
  pub async fn provision_writable_segment(&self, segment_id: &str) -> ServerResult<String> {
    let segment = crate::segment::Segment::new(segment_id, 0, self.opt.local_data.clone(), self.store.clone());

    if let Some(lock) = segment.retrieve_write_lock(&self.opt.hostname).await? {
      return Ok(self.opt.write_url(&lock.node, segment_id));
    }

    let mut readers = segment.readable_copies().await?;
    readers.sort_by_key(|row| row.last_heartbeat);
    if let Some(reader) = readers.into_iter().next() {
      self.instruct_materialize(&reader.node, segment_id).await?;
      return Ok(self.opt.write_url(&reader.node, segment_id));
    }

    let mut hosts = self.registry.get_hosts().await?;
    hosts.sort_by_key(|row| row.last_heartbeat);
    if let Some(host) = hosts.into_iter().next() {
      self.instruct_materialize(&host.node, segment_id).await?;
      return Ok(self.opt.write_url(&host.node, segment_id));
    }

    Err(ServerError::does_not_exist("host to materialize segment", segment_id))
  }

  async fn instruct_materialize(&self, node: &str, segment_id: &str) -> ServerResult<()> {
    let url = self.opt.sync_local_url(node);
    reqwest::Client::new()
      .post(&url)
      .body(segment_id.to_string())
      .send()
      .await
      .map_err(|e| ServerError::copy_error(format!("POST {} failed: {}", url, e)))?;
    Ok(())
  }

  /// the main election/assignment loop. Never returns; re-contests the
  /// election whenever it's lost.
  pub async fn run_forever(&self) -> ServerResult<()> {
    let interval = Duration::from_secs_f64(self.opt.run_interval);
    loop {
      self.wait_to_become_leader().await?;
      self.wait_for_hosts().await?;

      let mut last_t = Instant::now();
      loop {
        let planned_t = last_t + interval;
        if Instant::now() < planned_t {
          sleep_until(planned_t).await;
        }
        last_t = Instant::now();

        if !self.hold_election().await.unwrap_or(false) {
          log::warn!("lost election, stepping down until next cycle");
          break;
        }

        let tick_deadline = last_t + interval;
        if let Err(e) = crate::retry::with_backoff(tick_deadline, || self.assign_segments()).await {
          log::error!("assign_segments failed this tick: {}", e);
        }
      }
    }
  }
}

fn segment_id_from_path(path: &str) -> String {
  let file_name = path.rsplit('/').next().unwrap_or(path);
  file_name.strip_suffix(".sqlite").unwrap_or(file_name).to_string()
}
