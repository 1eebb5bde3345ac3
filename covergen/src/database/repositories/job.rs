//! Cover job repository.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::database::models::{CoverJobDbModel, JobStage, JobStatus, JobUpdate, NewCoverJob};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::{Error, Result};

const ENTITY: &str = "CoverJob";

/// Cover job repository trait.
///
/// The store applies whatever fields it is given; stage ordering is the
/// executor's business.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a job in `(queued, queued, 0)`. `Conflict` if the id exists.
    async fn create(&self, job: &NewCoverJob) -> Result<CoverJobDbModel>;
    async fn get(&self, id: &str) -> Result<CoverJobDbModel>;
    /// Apply the `Some` fields of `update`, clamp progress, bump `updated_at`.
    async fn update(&self, id: &str, update: &JobUpdate) -> Result<CoverJobDbModel>;
    /// Like [`JobRepository::update`], but only while the job is not canceled.
    ///
    /// Returns `Ok(None)` when the row exists but is canceled.
    async fn update_active(&self, id: &str, update: &JobUpdate)
    -> Result<Option<CoverJobDbModel>>;
    /// Force `(canceled, finalize, 100)` while the job is queued or running.
    ///
    /// Returns `Ok(None)` when the job already reached a terminal status.
    async fn cancel(&self, id: &str) -> Result<Option<CoverJobDbModel>>;
    /// Terminal jobs created strictly before `cutoff_ms`.
    async fn list_expired(&self, cutoff_ms: i64) -> Result<Vec<CoverJobDbModel>>;
    async fn list_ids(&self) -> Result<HashSet<String>>;
    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<CoverJobDbModel>>;
    async fn count_by_status(&self) -> Result<BTreeMap<String, i64>>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn apply_update(
        &self,
        id: &str,
        update: &JobUpdate,
        guard: Guard,
    ) -> Result<Option<CoverJobDbModel>> {
        let pool = &self.pool;
        retry_on_sqlite_busy("update_cover_job", || async move {
            let mut tx = pool.begin().await?;

            let mut query = build_update(id, update, guard, now_ms());
            let result = query.build().execute(&mut *tx).await?;

            let row = sqlx::query_as::<_, CoverJobDbModel>("SELECT * FROM cover_jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.commit().await?;

            match row {
                None => Err(Error::not_found(ENTITY, id)),
                Some(_) if result.rows_affected() == 0 => Ok(None),
                Some(job) => Ok(Some(job)),
            }
        })
        .await
    }
}

/// Row condition an update is applied under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Always,
    NotCanceled,
    Unfinished,
}

/// Build `UPDATE cover_jobs SET ...` for the provided fields.
fn build_update<'a>(
    id: &'a str,
    update: &JobUpdate,
    guard: Guard,
    now: i64,
) -> QueryBuilder<'a, Sqlite> {
    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE cover_jobs SET updated_at = ");
    qb.push_bind(now);

    if let Some(status) = update.status {
        qb.push(", status = ").push_bind(status.as_str());
    }
    if let Some(stage) = update.stage {
        qb.push(", stage = ").push_bind(stage.as_str());
    }
    if let Some(progress) = update.progress {
        qb.push(", progress = ").push_bind(progress.clamp(0, 100));
    }
    if let Some(task_id) = &update.task_id {
        qb.push(", task_id = ").push_bind(task_id.clone());
    }
    if let Some(path) = &update.output_vocal_path {
        qb.push(", output_vocal_path = ").push_bind(path.clone());
    }
    if let Some(path) = &update.output_inst_path {
        qb.push(", output_inst_path = ").push_bind(path.clone());
    }
    if let Some(path) = &update.output_mix_path {
        qb.push(", output_mix_path = ").push_bind(path.clone());
    }
    if let Some(message) = &update.error_message {
        qb.push(", error_message = ").push_bind(message.clone());
    }

    qb.push(" WHERE id = ").push_bind(id);
    match guard {
        Guard::Always => {}
        Guard::NotCanceled => {
            qb.push(" AND status != ").push_bind(JobStatus::Canceled.as_str());
        }
        Guard::Unfinished => {
            qb.push(" AND status IN (")
                .push_bind(JobStatus::Queued.as_str())
                .push(", ")
                .push_bind(JobStatus::Running.as_str())
                .push(")");
        }
    }
    qb
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn create(&self, job: &NewCoverJob) -> Result<CoverJobDbModel> {
        let pool = &self.pool;
        // Only the INSERT is retried; re-running it after a commit would
        // report a conflict for the row we just wrote.
        retry_on_sqlite_busy("create_cover_job", || async move {
            let now = now_ms();
            let inserted = sqlx::query(
                r#"
                INSERT INTO cover_jobs (
                    id, owner_id, status, stage, progress, model_id, pitch_shift,
                    input_voice_path, input_song_path, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&job.id)
            .bind(&job.owner_id)
            .bind(JobStatus::Queued.as_str())
            .bind(JobStage::Queued.as_str())
            .bind(job.effective_model_id())
            .bind(i64::from(job.pitch_shift))
            .bind(&job.input_voice_path)
            .bind(&job.input_song_path)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await;

            match inserted {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(Error::conflict(format!(
                    "cover job {} already exists",
                    job.id
                ))),
                Err(e) => Err(e.into()),
            }
        })
        .await?;

        self.get(&job.id).await
    }

    async fn get(&self, id: &str) -> Result<CoverJobDbModel> {
        sqlx::query_as::<_, CoverJobDbModel>("SELECT * FROM cover_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(ENTITY, id))
    }

    async fn update(&self, id: &str, update: &JobUpdate) -> Result<CoverJobDbModel> {
        self.apply_update(id, update, Guard::Always)
            .await?
            .ok_or_else(|| Error::not_found(ENTITY, id))
    }

    async fn update_active(
        &self,
        id: &str,
        update: &JobUpdate,
    ) -> Result<Option<CoverJobDbModel>> {
        self.apply_update(id, update, Guard::NotCanceled).await
    }

    async fn cancel(&self, id: &str) -> Result<Option<CoverJobDbModel>> {
        self.apply_update(id, &JobUpdate::canceled(), Guard::Unfinished)
            .await
    }

    async fn list_expired(&self, cutoff_ms: i64) -> Result<Vec<CoverJobDbModel>> {
        let jobs = sqlx::query_as::<_, CoverJobDbModel>(
            r#"
            SELECT * FROM cover_jobs
            WHERE status IN (?, ?, ?) AND created_at < ?
            ORDER BY created_at
            "#,
        )
        .bind(JobStatus::Succeeded.as_str())
        .bind(JobStatus::Failed.as_str())
        .bind(JobStatus::Canceled.as_str())
        .bind(cutoff_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn list_ids(&self) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM cover_jobs")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<CoverJobDbModel>> {
        let jobs = sqlx::query_as::<_, CoverJobDbModel>(
            "SELECT * FROM cover_jobs WHERE status = ? ORDER BY created_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn count_by_status(&self) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM cover_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{init_pool_at_path, run_migrations};
    use tempfile::TempDir;

    async fn setup_repo() -> (TempDir, SqlxJobRepository) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_pool_at_path(&dir.path().join("jobs.db")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (dir, SqlxJobRepository::new(pool))
    }

    fn new_job(id: &str) -> NewCoverJob {
        NewCoverJob::new(id, "/a/input/reference_voice.wav", "/a/input/song.wav")
    }

    #[tokio::test]
    async fn test_create_initial_state() {
        let (_dir, repo) = setup_repo().await;
        let job = repo
            .create(&new_job("job-1").with_pitch_shift(-3))
            .await
            .unwrap();

        assert_eq!(job.status, "queued");
        assert_eq!(job.stage, "queued");
        assert_eq!(job.progress, 0);
        assert_eq!(job.model_id, "default");
        assert_eq!(job.pitch_shift, -3);
        assert!(job.task_id.is_none());
        assert!(job.output_mix_path.is_none());
        assert!(job.error_message.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[tokio::test]
    async fn test_create_duplicate_is_conflict() {
        let (_dir, repo) = setup_repo().await;
        repo.create(&new_job("dup")).await.unwrap();
        let err = repo.create(&new_job("dup")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_under_write_lock_returns_row() {
        let (_dir, repo) = setup_repo().await;

        let mut writer = repo.pool.acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *writer)
            .await
            .unwrap();
        let release = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            sqlx::query("COMMIT").execute(&mut *writer).await.unwrap();
        });

        let job = repo.create(&new_job("contended")).await.unwrap();
        release.await.unwrap();

        assert_eq!(job.id, "contended");
        assert_eq!(job.status, "queued");
        assert_eq!(repo.list_ids().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, repo) = setup_repo().await;
        assert!(matches!(
            repo.get("nope").await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            repo.update("nope", &JobUpdate::new().with_progress(3)).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_applies_only_given_fields_and_clamps() {
        let (_dir, repo) = setup_repo().await;
        repo.create(&new_job("j")).await.unwrap();

        let job = repo
            .update("j", &JobUpdate::progress(JobStage::Separate, 35).with_task_id("t-1"))
            .await
            .unwrap();
        assert_eq!(job.status, "running");
        assert_eq!(job.stage, "separate");
        assert_eq!(job.progress, 35);
        assert_eq!(job.task_id.as_deref(), Some("t-1"));

        let job = repo
            .update("j", &JobUpdate::new().with_progress(250))
            .await
            .unwrap();
        assert_eq!(job.progress, 100);
        assert_eq!(job.stage, "separate");
        assert_eq!(job.task_id.as_deref(), Some("t-1"));

        let job = repo
            .update("j", &JobUpdate::new().with_progress(-4))
            .await
            .unwrap();
        assert_eq!(job.progress, 0);
        assert!(job.updated_at >= job.created_at);
    }

    #[tokio::test]
    async fn test_error_message_can_be_cleared() {
        let (_dir, repo) = setup_repo().await;
        repo.create(&new_job("j")).await.unwrap();

        let job = repo.update("j", &JobUpdate::failed("boom")).await.unwrap();
        assert_eq!(job.error_message.as_deref(), Some("boom"));

        let job = repo
            .update("j", &JobUpdate::new().with_error_message(None))
            .await
            .unwrap();
        assert!(job.error_message.is_none());
    }

    #[tokio::test]
    async fn test_update_active_skips_canceled_jobs() {
        let (_dir, repo) = setup_repo().await;
        repo.create(&new_job("j")).await.unwrap();

        let job = repo
            .update_active("j", &JobUpdate::progress(JobStage::Preprocess, 5))
            .await
            .unwrap();
        assert!(job.is_some());

        repo.update("j", &JobUpdate::canceled()).await.unwrap();
        let job = repo
            .update_active("j", &JobUpdate::progress(JobStage::Separate, 35))
            .await
            .unwrap();
        assert!(job.is_none());

        let stored = repo.get("j").await.unwrap();
        assert_eq!(stored.status, "canceled");
        assert_eq!(stored.stage, "finalize");
        assert_eq!(stored.progress, 100);

        assert!(matches!(
            repo.update_active("missing", &JobUpdate::canceled()).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_only_unfinished_jobs() {
        let (_dir, repo) = setup_repo().await;
        repo.create(&new_job("queued")).await.unwrap();
        repo.create(&new_job("done")).await.unwrap();
        repo.update("done", &JobUpdate::failed("boom")).await.unwrap();

        let job = repo.cancel("queued").await.unwrap().unwrap();
        assert_eq!(job.status, "canceled");
        assert_eq!(job.stage, "finalize");
        assert_eq!(job.progress, 100);

        assert!(repo.cancel("done").await.unwrap().is_none());
        assert_eq!(repo.get("done").await.unwrap().status, "failed");
    }

    #[tokio::test]
    async fn test_listing_queries() {
        let (_dir, repo) = setup_repo().await;
        for id in ["a", "b", "c"] {
            repo.create(&new_job(id)).await.unwrap();
        }
        repo.update("a", &JobUpdate::failed("x")).await.unwrap();
        repo.update("b", &JobUpdate::progress(JobStage::Infer, 70))
            .await
            .unwrap();

        let ids = repo.list_ids().await.unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("c"));

        let future_cutoff = now_ms() + 60_000;
        let expired = repo.list_expired(future_cutoff).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "a");
        assert!(repo.list_expired(0).await.unwrap().is_empty());

        let running = repo.list_by_status(JobStatus::Running).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "b");

        let counts = repo.count_by_status().await.unwrap();
        assert_eq!(counts.get("failed"), Some(&1));
        assert_eq!(counts.get("running"), Some(&1));
        assert_eq!(counts.get("queued"), Some(&1));
        assert_eq!(counts.get("succeeded"), None);
    }
}
