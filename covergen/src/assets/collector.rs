//! Asset garbage collector.
//!
//! Reconciles `<asset_root>/<job_id>/` directories against the job store:
//! directories of expired terminal jobs and old directories without any job
//! record are deleted. The store itself is never modified.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::database::repositories::JobRepository;
use crate::database::time::cutoff_ms;
use crate::domain::JobId;
use crate::scheduler::PeriodicTask;
use crate::{Error, Result};

const MIB: f64 = 1024.0 * 1024.0;
const MAX_RETENTION_HOURS: u64 = 24 * 365 * 100;

/// Configuration for [`AssetCollector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Terminal jobs and orphan directories older than this are reclaimed.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    /// Interval between background runs in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_retention_hours() -> u64 {
    24
}

fn default_interval_secs() -> u64 {
    3600
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl CollectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention_hours(mut self, hours: u64) -> Self {
        self.retention_hours = hours;
        self
    }

    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn retention(&self) -> chrono::Duration {
        // Capped at a century so `now - retention` cannot overflow.
        chrono::Duration::hours(self.retention_hours.min(MAX_RETENTION_HOURS) as i64)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Outcome of one collector run.
///
/// Under dry-run nothing is deleted but every count (and `freed_bytes`, as
/// reclaimable bytes) is what a real run would report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted_count: u64,
    pub orphaned_count: u64,
    pub freed_bytes: u64,
    /// Entries whose names are not job identifiers.
    pub skipped_count: u64,
    /// Directories that could not be inspected or removed.
    pub error_count: u64,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reclaim {
    Expired,
    Orphaned,
}

impl Reclaim {
    fn label(self) -> &'static str {
        match self {
            Self::Expired => "expired job",
            Self::Orphaned => "orphaned",
        }
    }
}

/// Deletes asset directories of expired and record-less jobs.
pub struct AssetCollector {
    repo: Arc<dyn JobRepository>,
    root: PathBuf,
    config: CollectorConfig,
}

impl AssetCollector {
    pub fn new(repo: Arc<dyn JobRepository>, root: impl Into<PathBuf>, config: CollectorConfig) -> Self {
        Self {
            repo,
            root: root.into(),
            config,
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Run once with the configured retention.
    pub async fn run(&self, dry_run: bool) -> Result<CleanupReport> {
        self.run_with_retention(self.config.retention(), dry_run).await
    }

    /// Run once with an explicit retention window.
    pub async fn run_with_retention(
        &self,
        retention: chrono::Duration,
        dry_run: bool,
    ) -> Result<CleanupReport> {
        let mut report = CleanupReport {
            dry_run,
            ..CleanupReport::default()
        };

        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                warn!("Asset root is not a directory: {}", self.root.display());
                return Ok(report);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Asset root does not exist: {}", self.root.display());
                return Ok(report);
            }
            Err(e) => return Err(Error::io_path("reading", &self.root, e)),
        }

        let now = Utc::now();
        let cutoff = now - retention;
        let expired: HashSet<String> = self
            .repo
            .list_expired(cutoff_ms(now, retention))
            .await?
            .into_iter()
            .map(|job| job.id)
            .collect();
        let known = self.repo.list_ids().await?;

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| Error::io_path("reading", &self.root, e))?;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read asset root entry: {}", e);
                    report.error_count += 1;
                    break;
                }
            };

            let path = entry.path();
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    error!("Failed to stat {}: {}", path.display(), e);
                    report.error_count += 1;
                    continue;
                }
            };
            if !meta.is_dir() {
                continue;
            }

            let name = entry.file_name();
            let Some(job_id) = name.to_str().and_then(|n| JobId::parse(n).ok()) else {
                warn!("Skipping asset directory with invalid job id: {:?}", name);
                report.skipped_count += 1;
                continue;
            };
            let key = job_id.to_string();

            let reason = if expired.contains(&key) {
                Reclaim::Expired
            } else if !known.contains(&key) {
                let modified = match meta.modified() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to read mtime of {}: {}", path.display(), e);
                        report.error_count += 1;
                        continue;
                    }
                };
                if DateTime::<Utc>::from(modified) >= cutoff {
                    debug!("Orphan candidate {} is newer than retention, keeping", key);
                    continue;
                }
                // A submission may have created the record since the listing.
                match self.repo.get(&key).await {
                    Err(Error::NotFound { .. }) => Reclaim::Orphaned,
                    Ok(_) => {
                        debug!("Job {} appeared during the scan, keeping its directory", key);
                        continue;
                    }
                    Err(e) => {
                        error!("Failed to re-check job {}: {}", key, e);
                        report.error_count += 1;
                        continue;
                    }
                }
            } else {
                continue;
            };

            match self.reclaim(&path, reason, dry_run).await {
                Ok(bytes) => {
                    match reason {
                        Reclaim::Expired => report.deleted_count += 1,
                        Reclaim::Orphaned => report.orphaned_count += 1,
                    }
                    report.freed_bytes += bytes;
                }
                Err(e) => {
                    error!("Failed to delete {} directory {}: {}", reason.label(), path.display(), e);
                    report.error_count += 1;
                }
            }
        }

        info!(
            dry_run,
            "Cleanup complete: deleted={}, orphaned={}, freed={:.2} MB, skipped={}, errors={}",
            report.deleted_count,
            report.orphaned_count,
            report.freed_bytes as f64 / MIB,
            report.skipped_count,
            report.error_count
        );
        Ok(report)
    }

    async fn reclaim(&self, path: &Path, reason: Reclaim, dry_run: bool) -> Result<u64> {
        let size = dir_size(path.to_path_buf()).await?;
        if dry_run {
            info!(
                "[DRY RUN] Would delete {} directory: {} ({:.2} MB)",
                reason.label(),
                path.display(),
                size as f64 / MIB
            );
            return Ok(size);
        }

        info!(
            "Deleting {} directory: {} ({:.2} MB)",
            reason.label(),
            path.display(),
            size as f64 / MIB
        );
        tokio::fs::remove_dir_all(path)
            .await
            .map_err(|e| Error::io_path("removing", path, e))?;
        Ok(size)
    }
}

/// Total size of regular files below `path`.
async fn dir_size(path: PathBuf) -> Result<u64> {
    tokio::task::spawn_blocking(move || {
        let mut total = 0u64;
        for entry in WalkDir::new(&path) {
            let entry = entry.map_err(|e| Error::Other(format!("walking {}: {}", path.display(), e)))?;
            if entry.file_type().is_file() {
                let meta = entry
                    .metadata()
                    .map_err(|e| Error::Other(format!("stat {}: {}", entry.path().display(), e)))?;
                total += meta.len();
            }
        }
        Ok(total)
    })
    .await
    .map_err(|e| Error::Other(format!("directory size task failed: {}", e)))?
}

#[async_trait]
impl PeriodicTask for AssetCollector {
    fn name(&self) -> &'static str {
        "Asset collector"
    }

    async fn tick(&self) -> Result<()> {
        self.run(false).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CollectorConfig::default();
        assert_eq!(config.retention_hours, 24);
        assert_eq!(config.interval(), Duration::from_secs(3600));
        assert_eq!(config.retention(), chrono::Duration::hours(24));
    }

    #[tokio::test]
    async fn test_dir_size_counts_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        std::fs::write(tmp.path().join("a/one.bin"), vec![0u8; 100]).unwrap();
        std::fs::write(tmp.path().join("a/b/two.bin"), vec![0u8; 28]).unwrap();
        assert_eq!(dir_size(tmp.path().to_path_buf()).await.unwrap(), 128);
    }
}
