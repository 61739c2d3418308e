//! Schema versioning and migrations
//!
//! Migrations are forward-only and tracked in `PRAGMA user_version`. Each step
//! runs in its own IMMEDIATE transaction together with the version bump.

use super::{DbError, Result};
use rusqlite::{Connection, TransactionBehavior};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

const V1_SQL: &str = include_str!("../migrations/0001_initial.sql");

/// Apply all migrations to bring DB to current version
pub fn migrate_to_latest(conn: &mut Connection) -> Result<()> {
    let current = schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    if current < 1 {
        apply(conn, 1, V1_SQL)?;
    }
    Ok(())
}

/// Get current schema version
pub fn schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn apply(conn: &mut Connection, version: i32, sql: &str) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(sql)
        .map_err(|e| DbError::Migration(format!("v{version}: {e}")))?;
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()?;
    tracing::info!(version, "applied schema migration");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_latest_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);

        migrate_to_latest(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('form_templates', 'form_instances', 'form_responses', 'audit_log')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn migration_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to_latest(&mut conn).unwrap();
        migrate_to_latest(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn newer_database_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        let err = migrate_to_latest(&mut conn).unwrap_err();
        assert!(matches!(err, DbError::Migration(_)), "{err}");
    }

    #[test]
    fn audit_log_rejects_updates() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to_latest(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO audit_log (entity_type, entity_id, action, actor_type, created_at)
             VALUES ('form_instance', 'i-1', 'created', 'OWNER', '2026-01-15T12:00:00.000Z')",
            [],
        )
        .unwrap();

        let update = conn.execute("UPDATE audit_log SET action = 'edited'", []);
        assert!(update.is_err());
        let delete = conn.execute("DELETE FROM audit_log", []);
        assert!(delete.is_err());
    }
}
