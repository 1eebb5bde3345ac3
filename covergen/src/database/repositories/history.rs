//! Cover history repository.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::database::models::{CoverHistoryDbModel, NewHistoryEntry};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// One page of history, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub items: Vec<CoverHistoryDbModel>,
    /// Rows matching the filter, ignoring paging.
    pub total: i64,
}

/// Cover history repository trait.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn record(&self, entry: &NewHistoryEntry) -> Result<CoverHistoryDbModel>;
    /// List entries of `owner`, or of everyone when `owner` is `None`.
    async fn list(&self, owner: Option<&str>, limit: i64, offset: i64) -> Result<HistoryPage>;
}

/// SQLx implementation of HistoryRepository.
pub struct SqlxHistoryRepository {
    pool: SqlitePool,
}

impl SqlxHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn push_owner_filter<'a>(qb: &mut QueryBuilder<'a, Sqlite>, owner: Option<&'a str>) {
    if let Some(owner) = owner {
        qb.push(" WHERE owner_id = ").push_bind(owner);
    }
}

#[async_trait]
impl HistoryRepository for SqlxHistoryRepository {
    async fn record(&self, entry: &NewHistoryEntry) -> Result<CoverHistoryDbModel> {
        let pool = &self.pool;
        let row_id = retry_on_sqlite_busy("record_cover_history", || async move {
            let result = sqlx::query(
                r#"
                INSERT INTO cover_history (job_id, owner_id, status, error_message, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.job_id)
            .bind(&entry.owner_id)
            .bind(entry.status.as_str())
            .bind(&entry.error_message)
            .bind(now_ms())
            .execute(pool)
            .await?;
            Ok(result.last_insert_rowid())
        })
        .await?;

        sqlx::query_as::<_, CoverHistoryDbModel>("SELECT * FROM cover_history WHERE id = ?")
            .bind(row_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| Error::not_found("CoverHistory", row_id.to_string()))
    }

    async fn list(&self, owner: Option<&str>, limit: i64, offset: i64) -> Result<HistoryPage> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM cover_history");
        push_owner_filter(&mut qb, owner);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit.max(0))
            .push(" OFFSET ")
            .push_bind(offset.max(0));
        let items = qb
            .build_query_as::<CoverHistoryDbModel>()
            .fetch_all(&self.pool)
            .await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM cover_history");
        push_owner_filter(&mut qb, owner);
        let total: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;

        Ok(HistoryPage { items, total })
    }
}
