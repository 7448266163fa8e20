// Consistent-hash ring placement, per spec.md §4.4. Ring positions are
// integers in [0, RING_SIZE); each healthy host maps to VIRTUAL_NODES
// positions by hashing (node, i). A segment's primary is the host owning
// the first position at or clockwise of hash(segment.id) mod RING_SIZE;
// replicas are the next distinct hosts walking clockwise.

use crate::errors::ServerResult;
use crate::hashing::murmur3_hash64;
use crate::types::RingSnapshot;

pub const RING_SIZE: u64 = 1 << 32;
pub const VIRTUAL_NODES: u32 = 64;

pub struct HashRing {
  // sorted by ring position
  positions: Vec<(u64, String)>,
}

impl HashRing {
  pub fn build(hosts: &[String]) -> ServerResult<HashRing> {
    let mut positions = Vec::with_capacity(hosts.len() * VIRTUAL_NODES as usize);
    for host in hosts {
      for i in 0..VIRTUAL_NODES {
        let key = format!("{}:{}", host, i);
        let pos = murmur3_hash64(key.as_bytes())? % RING_SIZE;
        positions.push((pos, host.clone()));
      }
    }
    positions.sort_by_key(|(pos, _)| *pos);
    Ok(HashRing { positions })
  }

  pub fn is_empty(&self) -> bool {
    self.positions.is_empty()
  }

  /// place `segment_id` onto `k` distinct hosts, walking clockwise from the
  /// segment's ring position. Returns fewer than `k` hosts if fewer than
  /// `k` distinct hosts are on the ring.
  pub fn place(&self, segment_id: &str, k: usize) -> ServerResult<Vec<String>> {
    if self.positions.is_empty() || k == 0 {
      return Ok(Vec::new());
    }
    let target = murmur3_hash64(segment_id.as_bytes())? % RING_SIZE;
    let start = self.positions.partition_point(|(pos, _)| *pos < target);

    let mut chosen = Vec::with_capacity(k);
    let n = self.positions.len();
    for offset in 0..n {
      let idx = (start + offset) % n;
      let host = &self.positions[idx].1;
      if !chosen.contains(host) {
        chosen.push(host.clone());
      }
      if chosen.len() == k {
        break;
      }
    }
    Ok(chosen)
  }

  pub fn snapshot(&self) -> RingSnapshot {
    RingSnapshot::new(self.positions.clone())
  }

  /// the set of hosts this ring differs from the given snapshot on,
  /// i.e. hosts added or removed since the snapshot was taken. Used by the
  /// master to notice ring churn and replan.
  pub fn changed_since(&self, snapshot: &RingSnapshot) -> bool {
    let mut current: Vec<&String> = self.positions.iter().map(|(_, h)| h).collect();
    current.sort();
    current.dedup();
    let mut previous: Vec<&String> = snapshot.ring.iter().map(|(_, h)| h).collect();
    previous.sort();
    previous.dedup();
    current != previous
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn place_returns_k_distinct_hosts() {
    let hosts: Vec<String> = (0..5).map(|i| format!("host-{}", i)).collect();
    let ring = HashRing::build(&hosts).unwrap();
    let placed = ring.place("some-segment", 3).unwrap();
    assert_eq!(placed.len(), 3);
    let mut dedup = placed.clone();
    dedup.sort();
    dedup.dedup();
    assert_eq!(dedup.len(), 3);
  }

  #[test]
  fn place_is_deterministic() {
    let hosts: Vec<String> = (0..5).map(|i| format!("host-{}", i)).collect();
    let ring = HashRing::build(&hosts).unwrap();
    let a = ring.place("some-segment", 2).unwrap();
    let b = ring.place("some-segment", 2).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn removing_a_host_only_moves_its_shards() {
    let hosts: Vec<String> = (0..6).map(|i| format!("host-{}", i)).collect();
    let full_ring = HashRing::build(&hosts).unwrap();

    let segment_ids: Vec<String> = (0..200).map(|i| format!("segment-{}", i)).collect();
    let before: Vec<Vec<String>> = segment_ids.iter()
      .map(|s| full_ring.place(s, 1).unwrap())
      .collect();

    let remaining: Vec<String> = hosts[1..].to_vec();
    let reduced_ring = HashRing::build(&remaining).unwrap();
    let after: Vec<Vec<String>> = segment_ids.iter()
      .map(|s| reduced_ring.place(s, 1).unwrap())
      .collect();

    for (idx, (b, a)) in before.iter().zip(after.iter()).enumerate() {
      if b[0] != hosts[0] {
        assert_eq!(b, a, "segment {} moved despite its host staying", segment_ids[idx]);
      }
    }
  }

  #[test]
  fn changed_since_detects_membership_changes() {
    let hosts: Vec<String> = (0..3).map(|i| format!("host-{}", i)).collect();
    let ring = HashRing::build(&hosts).unwrap();
    let snapshot = ring.snapshot();
    assert!(!ring.changed_since(&snapshot));

    let more_hosts: Vec<String> = (0..4).map(|i| format!("host-{}", i)).collect();
    let bigger_ring = HashRing::build(&more_hosts).unwrap();
    assert!(bigger_ring.changed_since(&snapshot));
  }
}
