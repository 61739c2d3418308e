//! ACID transaction helpers

use super::DbError;
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Execute operation within ACID transaction
///
/// Commits when `operation` returns `Ok`. On `Err` the transaction is dropped
/// and SQLite rolls it back, so nothing the closure wrote persists.
///
/// The error type is the caller's, as long as storage errors convert into it.
///
/// # Example
/// ```rust,no_run
/// # use intake_store::transactions::execute_in_transaction;
/// # use rusqlite::{Connection, TransactionBehavior};
/// # fn example(conn: &mut Connection) -> intake_store::Result<()> {
/// execute_in_transaction(conn, TransactionBehavior::Immediate, |tx| {
///     tx.execute("UPDATE form_instances SET status = 'IN_PROGRESS' WHERE id = ?1", ["i-1"])?;
///     Ok::<_, intake_store::DbError>(())
/// })?;
/// # Ok(())
/// # }
/// ```
pub fn execute_in_transaction<F, T, E>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    operation: F,
) -> Result<T, E>
where
    F: FnOnce(&Transaction) -> Result<T, E>,
    E: From<DbError>,
{
    let tx = conn
        .transaction_with_behavior(behavior)
        .map_err(DbError::from)?;

    let result = operation(&tx)?;
    tx.commit().map_err(DbError::from)?;
    Ok(result)
}
