//! Retry helpers for database writes.
//!
//! Several workers report progress concurrently; SQLite may answer a write
//! with `SQLITE_BUSY`/`SQLITE_LOCKED` even with a busy timeout configured.

use rand::random;
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

const MAX_RETRIES: u32 = 8;
const BASE_DELAY_MS: u64 = 10;
const MAX_DELAY_MS: u64 = 1000;

fn is_busy(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    if let sqlx::Error::Database(db_err) = sqlx_err {
        let code = db_err.code().map(Cow::into_owned);
        if matches!(code.as_deref(), Some("5") | Some("6")) {
            return true;
        }
    }

    let msg = sqlx_err.to_string().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

fn backoff(attempt: u32) -> Duration {
    let exp = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(10)).min(MAX_DELAY_MS);
    let jitter = random::<u64>() % (exp / 4 + 1);
    Duration::from_millis((exp + jitter).min(MAX_DELAY_MS))
}

/// Run `op`, retrying with jittered exponential backoff while SQLite reports busy.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(err) if is_busy(&err) && attempt < MAX_RETRIES => {
                let delay = backoff(attempt);
                attempt += 1;
                debug!(
                    "SQLite busy during {}, retrying in {:?} (attempt {}/{})",
                    op_name, delay, attempt, MAX_RETRIES
                );
                sleep(delay).await;
            }
            other => return other,
        }
    }
}
