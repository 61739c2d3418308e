//! Connection pooling and pragma configuration

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use super::{DbError, Result};

/// How long a writer waits for the database lock before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize a connection pool with per-connection pragmas.
///
/// Every pooled connection runs in WAL mode with foreign keys enforced,
/// `synchronous = NORMAL` and a [`BUSY_TIMEOUT`], so concurrent
/// `BEGIN IMMEDIATE` transactions queue instead of failing.
pub fn initialize_pool(db_path: &Path, pool_size: u32) -> Result<Pool<SqliteConnectionManager>> {
    if pool_size == 0 {
        return Err(DbError::Pool("pool size must be at least 1".to_string()));
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(apply_pragmas);
    let pool = Pool::builder()
        .max_size(pool_size)
        .build(manager)
        .map_err(|e| DbError::Pool(format!("Failed to build pool: {e}")))?;

    let conn = pool
        .get()
        .map_err(|e| DbError::Pool(format!("Failed to get connection: {e}")))?;
    verify_pragmas(&conn)?;

    tracing::debug!(path = %db_path.display(), pool_size, "sqlite pool initialized");
    Ok(pool)
}

/// Apply pragmas to a freshly opened connection.
fn apply_pragmas(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // journal_mode answers with the resulting mode, so it has to be read back.
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// Verify critical pragmas are applied
fn verify_pragmas(conn: &Connection) -> Result<()> {
    let journal_mode: String = conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;
    if !journal_mode.eq_ignore_ascii_case("wal") {
        return Err(DbError::Pool(format!(
            "expected WAL journal mode, got {journal_mode}"
        )));
    }

    let foreign_keys: i64 = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
    if foreign_keys != 1 {
        return Err(DbError::Pool("foreign keys are not enforced".to_string()));
    }
    Ok(())
}
