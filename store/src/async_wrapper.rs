//! Async bridge for the synchronous SQLite driver.
//!
//! SQLite calls block, so they run on Tokio's blocking pool via
//! `spawn_blocking` with a connection checked out of the r2d2 pool.

use super::DbError;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

/// Execute sync database operation in async context using spawn_blocking
///
/// # Example
/// ```rust,no_run
/// # use intake_store::async_wrapper::with_connection;
/// # use intake_store::initialize_pool;
/// # async fn example() -> intake_store::Result<()> {
/// let pool = initialize_pool(std::path::Path::new("intake.db"), 4)?;
///
/// let count: i64 = with_connection(&pool, |conn| {
///     let count: i64 =
///         conn.query_row("SELECT COUNT(*) FROM form_instances", [], |row| row.get(0))?;
///     Ok::<_, intake_store::DbError>(count)
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_connection<F, T, E>(pool: &Pool<SqliteConnectionManager>, f: F) -> Result<T, E>
where
    F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<DbError> + Send + 'static,
{
    let pool = pool.clone();

    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DbError::Pool(format!("Failed to get connection: {e}")))?;

        f(&mut conn)
    })
    .await
    .map_err(|e| DbError::Transaction(format!("Task join error: {e}")))?
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::connection::initialize_pool;

    #[tokio::test(flavor = "multi_thread")]
    async fn runs_closure_on_pooled_connection() {
        let dir = tempfile::tempdir().unwrap();
        let pool = initialize_pool(&dir.path().join("intake.db"), 2).unwrap();

        let answer: i64 = with_connection(&pool, |conn| {
            Ok::<_, DbError>(conn.query_row("SELECT 6 * 7", [], |row| row.get(0))?)
        })
        .await
        .unwrap();
        assert_eq!(answer, 42);
    }
}
