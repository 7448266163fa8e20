use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ServerError, ServerResult};

pub const RING_ASSIGNMENTS_ID: &str = "ring-assignments";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceRole {
  #[serde(rename = "trough-nodes")]
  TroughNodes,
  #[serde(rename = "trough-read")]
  TroughRead,
  #[serde(rename = "trough-write")]
  TroughWrite,
  #[serde(rename = "trough-sync-master")]
  TroughSyncMaster,
  #[serde(rename = "trough-sync-local")]
  TroughSyncLocal,
}

impl Display for ServiceRole {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl ServiceRole {
  pub fn as_str(&self) -> &'static str {
    match self {
      ServiceRole::TroughNodes => "trough-nodes",
      ServiceRole::TroughRead => "trough-read",
      ServiceRole::TroughWrite => "trough-write",
      ServiceRole::TroughSyncMaster => "trough-sync-master",
      ServiceRole::TroughSyncLocal => "trough-sync-local",
    }
  }
}

impl FromStr for ServiceRole {
  type Err = ServerError;

  fn from_str(s: &str) -> ServerResult<Self> {
    match s {
      "trough-nodes" => Ok(ServiceRole::TroughNodes),
      "trough-read" => Ok(ServiceRole::TroughRead),
      "trough-write" => Ok(ServiceRole::TroughWrite),
      "trough-sync-master" => Ok(ServiceRole::TroughSyncMaster),
      "trough-sync-local" => Ok(ServiceRole::TroughSyncLocal),
      other => Err(ServerError::invalid(format!("unrecognized service role {}", other))),
    }
  }
}

/// an ephemeral presence/heartbeat record, one per (role, node[, segment]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRow {
  pub id: String,
  pub role: ServiceRole,
  pub node: String,
  pub segment: Option<String>,
  pub first_heartbeat: DateTime<Utc>,
  pub last_heartbeat: DateTime<Utc>,
  pub ttl: f64,
  pub available_bytes: Option<u64>,
  pub load: Option<f64>,
}

impl ServiceRow {
  pub fn service_id(role: ServiceRole, node: &str, segment: Option<&str>) -> String {
    match segment {
      Some(s) => format!("{}:{}:{}", role.as_str(), node, s),
      None => format!("{}:{}", role.as_str(), node),
    }
  }

  pub fn is_healthy_at(&self, now: DateTime<Utc>) -> bool {
    let age_seconds = (now - self.last_heartbeat).num_milliseconds() as f64 / 1000.0;
    age_seconds < self.ttl
  }
}

/// a durable (host, segment) placement record, or the singleton ring snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AssignmentRecord {
  Placement(AssignmentRow),
  Ring(RingSnapshot),
}

impl AssignmentRecord {
  pub fn id(&self) -> &str {
    match self {
      AssignmentRecord::Placement(row) => &row.id,
      AssignmentRecord::Ring(ring) => &ring.id,
    }
  }

  pub fn as_placement(&self) -> Option<&AssignmentRow> {
    match self {
      AssignmentRecord::Placement(row) => Some(row),
      AssignmentRecord::Ring(_) => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRow {
  pub id: String,
  pub hash_ring: u64,
  pub node: String,
  pub segment: String,
  pub bytes: u64,
  pub remote_path: String,
}

impl AssignmentRow {
  pub fn host_key(node: &str, segment_id: &str) -> String {
    format!("{}:{}", node, segment_id)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingSnapshot {
  pub id: String,
  /// (ring position, node) pairs, sorted by ring position
  pub ring: Vec<(u64, String)>,
}

impl RingSnapshot {
  pub fn new(ring: Vec<(u64, String)>) -> Self {
    RingSnapshot { id: RING_ASSIGNMENTS_ID.to_string(), ring }
  }
}

/// an exclusive write lease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRow {
  pub id: String,
  pub node: String,
  pub segment: String,
  pub acquired_on: DateTime<Utc>,
  pub ttl: f64,
}

impl LockRow {
  pub fn lock_id(segment_id: &str) -> String {
    format!("write:lock:{}", segment_id)
  }

  pub fn is_healthy_at(&self, now: DateTime<Utc>) -> bool {
    let age_seconds = (now - self.acquired_on).num_milliseconds() as f64 / 1000.0;
    age_seconds < self.ttl
  }
}

/// a named DDL blueprint applied when a writable segment is first provisioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRow {
  pub id: String,
  pub sql: String,
}

/// one entry returned by the bulk store's `ls`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStat {
  pub path: String,
  pub length: u64,
  pub mtime: DateTime<Utc>,
}

/// per-host load accounting, used for balancing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostLoad {
  pub node: String,
  pub assigned_bytes: u64,
  pub available_bytes: u64,
}

impl HostLoad {
  pub fn load(&self) -> f64 {
    if self.available_bytes == 0 {
      0.0
    } else {
      self.assigned_bytes as f64 / self.available_bytes as f64
    }
  }
}
