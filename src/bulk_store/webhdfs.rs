// WebHDFS-backed BulkStore. Talks to the namenode's REST API directly
// (LISTSTATUS, OPEN) rather than pulling in a JVM client, since WebHDFS is
// plain HTTP+JSON and reqwest already covers it end to end.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::bulk_store::BulkStore;
use crate::errors::{ServerError, ServerResult};
use crate::types::FileStat;

pub struct WebHdfsBulkStore {
  client: reqwest::Client,
  base_url: String,
}

impl WebHdfsBulkStore {
  pub fn new(host: &str, port: u16) -> Self {
    WebHdfsBulkStore {
      client: reqwest::Client::new(),
      base_url: format!("http://{}:{}/webhdfs/v1", host, port),
    }
  }

  fn list_url(&self, remote_dir: &str) -> String {
    format!("{}{}?op=LISTSTATUS", self.base_url, remote_dir)
  }

  fn open_url(&self, remote_path: &str) -> String {
    format!("{}{}?op=OPEN", self.base_url, remote_path)
  }
}

#[derive(Deserialize)]
struct ListStatusResponse {
  #[serde(rename = "FileStatuses")]
  file_statuses: FileStatuses,
}

#[derive(Deserialize)]
struct FileStatuses {
  #[serde(rename = "FileStatus")]
  file_status: Vec<FileStatus>,
}

#[derive(Deserialize)]
struct FileStatus {
  #[serde(rename = "pathSuffix")]
  path_suffix: String,
  length: u64,
  #[serde(rename = "modificationTime")]
  modification_time: i64,
  #[serde(rename = "type")]
  entry_type: String,
}

#[async_trait::async_trait]
impl BulkStore for WebHdfsBulkStore {
  async fn ls(&self, remote_dir: &str) -> ServerResult<Vec<FileStat>> {
    let url = self.list_url(remote_dir);
    let resp = self.client.get(&url).send().await
      .map_err(|e| ServerError::copy_error(format!("LISTSTATUS {} failed: {}", remote_dir, e)))?;
    if !resp.status().is_success() {
      return Err(ServerError::copy_error(format!("LISTSTATUS {} returned {}", remote_dir, resp.status())));
    }
    let parsed: ListStatusResponse = resp.json().await
      .map_err(|e| ServerError::copy_error(format!("malformed LISTSTATUS response: {}", e)))?;

    let mtime_of = |millis: i64| -> DateTime<Utc> {
      Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
    };

    Ok(parsed.file_statuses.file_status.into_iter()
      .filter(|entry| entry.entry_type == "FILE")
      .map(|entry| FileStat {
        path: format!("{}/{}", remote_dir.trim_end_matches('/'), entry.path_suffix),
        length: entry.length,
        mtime: mtime_of(entry.modification_time),
      })
      .collect())
  }

  async fn copy_to_local(&self, remote_path: &str, local_path: &Path) -> ServerResult<u64> {
    let url = self.open_url(remote_path);
    let mut resp = self.client.get(&url).send().await
      .map_err(|e| ServerError::copy_error(format!("OPEN {} failed: {}", remote_path, e)))?;
    if !resp.status().is_success() {
      return Err(ServerError::copy_error(format!("OPEN {} returned {}", remote_path, resp.status())));
    }

    let tmp_path = local_path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    let mut file = File::create(&tmp_path).await
      .map_err(|e| ServerError::provision_error(format!("creating {}: {}", tmp_path.display(), e)))?;

    let mut written: u64 = 0;
    while let Some(chunk) = resp.chunk().await
      .map_err(|e| ServerError::copy_error(format!("reading {}: {}", remote_path, e)))? {
      file.write_all(&chunk).await
        .map_err(|e| ServerError::provision_error(format!("writing {}: {}", tmp_path.display(), e)))?;
      written += chunk.len() as u64;
    }
    file.flush().await
      .map_err(|e| ServerError::provision_error(format!("flushing {}: {}", tmp_path.display(), e)))?;
    drop(file);

    tokio::fs::rename(&tmp_path, local_path).await
      .map_err(|e| ServerError::provision_error(format!("renaming {} to {}: {}", tmp_path.display(), local_path.display(), e)))?;

    Ok(written)
  }
}
