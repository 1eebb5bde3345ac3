//! Shared fixtures for the integration tests.
//!
//! Every test gets its own SQLite file and asset root in a temporary
//! directory, and runs the pipeline against [`FakeRunner`] instead of the
//! external tools.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use covergen::assets::AssetLayout;
use covergen::database::models::{CoverJobDbModel, JobStage, JobStatus, JobUpdate, NewCoverJob};
use covergen::database::repositories::{JobRepository, SqlxJobRepository};
use covergen::database::{DbPool, init_pool_at_path, run_migrations};
use covergen::domain::JobId;
use covergen::runner::{NormalizedSong, SeparatedStems, StageRunner};
use covergen::{Error, Result};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

pub const MIX_BYTES: &[u8] = b"RIFF-final-mix";

/// Stage runner that writes placeholder files and can be told to fail,
/// skip an output or block at a given stage.
pub struct FakeRunner {
    duration_secs: f64,
    fail_at: Option<JobStage>,
    omit_output_at: Option<JobStage>,
    block_at: Option<JobStage>,
    /// Notified when the runner reaches `block_at`.
    pub entered: Notify,
    release: Semaphore,
    calls: Mutex<Vec<String>>,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self {
            duration_secs: 180.0,
            fail_at: None,
            omit_output_at: None,
            block_at: None,
            entered: Notify::new(),
            release: Semaphore::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn failing_at(mut self, stage: JobStage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    pub fn omitting_output_at(mut self, stage: JobStage) -> Self {
        self.omit_output_at = Some(stage);
        self
    }

    pub fn blocking_at(mut self, stage: JobStage) -> Self {
        self.block_at = Some(stage);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls equal to `call`.
    pub fn call_count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == call).count()
    }

    /// Let `n` blocked stages continue.
    pub fn release(&self, n: usize) {
        self.release.add_permits(n);
    }

    async fn step(&self, stage: JobStage, call: String) -> Result<()> {
        self.calls.lock().push(call);
        if self.block_at == Some(stage) {
            self.entered.notify_one();
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
        }
        if self.fail_at == Some(stage) {
            return Err(Error::stage_failed(
                stage.as_str(),
                "exit=1. stdout= stderr=simulated failure",
            ));
        }
        Ok(())
    }

    async fn produce(&self, stage: JobStage, path: &Path, bytes: &[u8]) -> Result<()> {
        if self.omit_output_at == Some(stage) {
            return Ok(());
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl StageRunner for FakeRunner {
    async fn normalize(&self, _input: &Path, output: &Path) -> Result<NormalizedSong> {
        self.step(JobStage::Preprocess, "preprocess".to_string()).await?;
        self.produce(JobStage::Preprocess, output, b"normalized").await?;
        Ok(NormalizedSong {
            path: output.to_path_buf(),
            duration_secs: self.duration_secs,
        })
    }

    async fn separate(
        &self,
        _song: &Path,
        vocal_out: &Path,
        inst_out: &Path,
    ) -> Result<SeparatedStems> {
        self.step(JobStage::Separate, "separate".to_string()).await?;
        self.produce(JobStage::Separate, vocal_out, b"vocal").await?;
        self.produce(JobStage::Separate, inst_out, b"instrumental").await?;
        Ok(SeparatedStems {
            vocal: vocal_out.to_path_buf(),
            instrumental: inst_out.to_path_buf(),
        })
    }

    async fn convert(
        &self,
        _reference: &Path,
        _vocal: &Path,
        output: &Path,
        model_id: &str,
        pitch_shift: i32,
    ) -> Result<PathBuf> {
        self.step(JobStage::Infer, format!("infer:{}:{}", model_id, pitch_shift))
            .await?;
        self.produce(JobStage::Infer, output, b"converted").await?;
        Ok(output.to_path_buf())
    }

    async fn mix(&self, _vocal: &Path, _instrumental: &Path, output: &Path) -> Result<PathBuf> {
        self.step(JobStage::Mix, "mix".to_string()).await?;
        self.produce(JobStage::Mix, output, MIX_BYTES).await?;
        Ok(output.to_path_buf())
    }
}

/// Repository wrapper that records every applied update.
pub struct RecordingRepository {
    inner: SqlxJobRepository,
    updates: Mutex<Vec<JobUpdate>>,
}

impl RecordingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self {
            inner: SqlxJobRepository::new(pool),
            updates: Mutex::new(Vec::new()),
        }
    }

    /// `(stage, progress)` of every applied update that set a progress.
    pub fn progress_trail(&self) -> Vec<(JobStage, i64)> {
        self.updates
            .lock()
            .iter()
            .filter_map(|u| Some((u.stage?, u.progress?)))
            .collect()
    }
}

#[async_trait]
impl JobRepository for RecordingRepository {
    async fn create(&self, job: &NewCoverJob) -> Result<CoverJobDbModel> {
        self.inner.create(job).await
    }

    async fn get(&self, id: &str) -> Result<CoverJobDbModel> {
        self.inner.get(id).await
    }

    async fn update(&self, id: &str, update: &JobUpdate) -> Result<CoverJobDbModel> {
        let job = self.inner.update(id, update).await?;
        self.updates.lock().push(update.clone());
        Ok(job)
    }

    async fn update_active(&self, id: &str, update: &JobUpdate) -> Result<Option<CoverJobDbModel>> {
        let job = self.inner.update_active(id, update).await?;
        if job.is_some() {
            self.updates.lock().push(update.clone());
        }
        Ok(job)
    }

    async fn cancel(&self, id: &str) -> Result<Option<CoverJobDbModel>> {
        self.inner.cancel(id).await
    }

    async fn list_expired(&self, cutoff_ms: i64) -> Result<Vec<CoverJobDbModel>> {
        self.inner.list_expired(cutoff_ms).await
    }

    async fn list_ids(&self) -> Result<HashSet<String>> {
        self.inner.list_ids().await
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<CoverJobDbModel>> {
        self.inner.list_by_status(status).await
    }

    async fn count_by_status(&self) -> Result<BTreeMap<String, i64>> {
        self.inner.count_by_status().await
    }
}

/// Temporary database and asset root.
pub struct TestEnv {
    pub dir: TempDir,
    pub pool: DbPool,
    pub repo: Arc<RecordingRepository>,
    pub layout: AssetLayout,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let pool = init_pool_at_path(&dir.path().join("covergen.db"))
            .await
            .expect("Failed to create test pool");
        run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let layout = AssetLayout::new(dir.path().join("assets"));
        Self {
            repo: Arc::new(RecordingRepository::new(pool.clone())),
            dir,
            pool,
            layout,
        }
    }

    pub fn asset_root(&self) -> PathBuf {
        self.layout.root().to_path_buf()
    }

    pub fn job_repo(&self) -> Arc<dyn JobRepository> {
        self.repo.clone()
    }

    /// Create a queued job with input files on disk.
    pub async fn create_job(&self) -> JobId {
        self.create_job_with(|job| job).await
    }

    pub async fn create_job_with(&self, customize: impl FnOnce(NewCoverJob) -> NewCoverJob) -> JobId {
        let id = JobId::new();
        self.layout.create_job_dirs(&id).await.expect("Failed to create job dirs");
        let voice = self.layout.reference_voice_path(&id, ".wav");
        let song = self.layout.song_path(&id, ".wav");
        std::fs::write(&voice, b"voice").unwrap();
        std::fs::write(&song, b"song").unwrap();

        let job = customize(NewCoverJob::new(
            id.to_string(),
            voice.to_string_lossy(),
            song.to_string_lossy(),
        ));
        self.repo.create(&job).await.expect("Failed to create job");
        id
    }

    pub async fn job(&self, id: &JobId) -> CoverJobDbModel {
        self.repo.get(&id.to_string()).await.expect("job exists")
    }

    /// Move a job's creation time back by `age`.
    pub async fn backdate(&self, id: &JobId, age: chrono::Duration) {
        let created_at = (chrono::Utc::now() - age).timestamp_millis();
        sqlx::query("UPDATE cover_jobs SET created_at = ? WHERE id = ?")
            .bind(created_at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .expect("Failed to backdate job");
    }

    /// Poll until the job reaches a terminal status.
    pub async fn wait_terminal(&self, id: &JobId) -> CoverJobDbModel {
        let key = id.to_string();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let job = self.repo.get(&key).await.expect("job exists");
                if JobStatus::parse(&job.status).is_some_and(|s| s.is_terminal()) {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job did not finish in time")
    }
}

/// Poll `check` until it returns true or panic after 10 seconds.
pub async fn wait_until<F: FnMut() -> bool>(mut check: F) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
