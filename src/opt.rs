use std::path::PathBuf;

use log::LevelFilter;
use structopt::StructOpt;

use crate::errors::{ServerError, ServerResult};

const MIN_DIR_LEN: usize = 2;

/// Process configuration. Every field recognized here doubles as an
/// environment variable (`env = "..."`) and a `--long-flag`, so a fleet can
/// be driven entirely by env vars in a container image.
#[derive(Clone, Debug, StructOpt)]
#[structopt(name = "trough-sync")]
pub struct Opt {
  /// coordination-store endpoints, comma-separated
  #[structopt(long, env = "RETHINKDB_HOSTS", default_value = "localhost:28015")]
  pub rethinkdb_hosts: String,

  /// this node's advertised name
  #[structopt(long, env = "HOSTNAME")]
  pub hostname: String,

  /// directory for materialized .sqlite segment files
  #[structopt(long, env = "LOCAL_DATA")]
  pub local_data: PathBuf,

  /// seconds between elections; also the polling granularity for waits
  #[structopt(long, env = "ELECTION_CYCLE", default_value = "10")]
  pub election_cycle: f64,

  /// bulk store (HDFS) root path holding segment files
  #[structopt(long, env = "HDFS_PATH", default_value = "/trough/segments")]
  pub hdfs_path: String,

  /// bulk store (HDFS) WebHDFS host
  #[structopt(long, env = "HDFS_HOST", default_value = "localhost")]
  pub hdfs_host: String,

  /// bulk store (HDFS) WebHDFS port
  #[structopt(long, env = "HDFS_PORT", default_value = "9870")]
  pub hdfs_port: u16,

  /// port advertised in read URLs
  #[structopt(long, env = "READ_PORT", default_value = "6111")]
  pub read_port: u16,

  /// port advertised in write URLs
  #[structopt(long, env = "WRITE_PORT", default_value = "6222")]
  pub write_port: u16,

  /// port this node's sync-local materialize endpoint listens on
  #[structopt(long, env = "SYNC_LOCAL_PORT", default_value = "6112")]
  pub sync_local_port: u16,

  /// floor for replica count, regardless of what minimum_assignments() picks
  #[structopt(long, env = "MINIMUM_ASSIGNMENTS", default_value = "1")]
  pub minimum_assignments: u32,

  /// seconds between controller ticks (sync_loop_timing)
  #[structopt(long, env = "RUN_INTERVAL", default_value = "10")]
  pub run_interval: f64,

  /// max concurrent bulk-store copies per tick
  #[structopt(long, env = "COPY_CONCURRENCY", default_value = "20")]
  pub copy_concurrency: usize,

  #[structopt(long, env = "LOG_LEVEL", default_value = "INFO")]
  pub log_level: LevelFilter,
}

impl Opt {
  pub fn validate(&self) -> ServerResult<()> {
    if self.hostname.trim().is_empty() {
      return Err(ServerError::config("HOSTNAME must not be empty"));
    }
    let dir_str = self.local_data
      .to_str()
      .ok_or_else(|| ServerError::config("LOCAL_DATA was not a valid utf-8 path"))?;
    if dir_str.len() < MIN_DIR_LEN {
      return Err(ServerError::config(
        "suspiciously short LOCAL_DATA; please choose a more specific path",
      ));
    }
    if self.election_cycle <= 0.0 {
      return Err(ServerError::config("ELECTION_CYCLE must be positive"));
    }
    if self.run_interval <= 0.0 {
      return Err(ServerError::config("RUN_INTERVAL must be positive"));
    }
    if self.minimum_assignments < 1 {
      return Err(ServerError::config("MINIMUM_ASSIGNMENTS must be at least 1"));
    }
    Ok(())
  }

  pub fn write_url(&self, host: &str, segment_id: &str) -> String {
    format!("http://{}:{}/?segment={}", host, self.write_port, segment_id)
  }

  pub fn sync_local_url(&self, host: &str) -> String {
    format!("http://{}:{}/", host, self.sync_local_port)
  }
}
