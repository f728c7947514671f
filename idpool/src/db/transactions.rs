//! Transaction helpers
//!
//! - `execute_in_transaction()`: all-or-nothing wrapper, commit on `Ok`
//! - `execute_then_rollback()`: run the same closure but always roll back
//!   (dry runs)

use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Execute operation within a transaction
///
/// Commits when the closure returns `Ok`. On `Err` the transaction is
/// dropped, which rolls it back.
///
/// # Example
/// ```rust,no_run
/// # use booster_idpool::db::execute_in_transaction;
/// # use rusqlite::{Connection, TransactionBehavior};
/// # fn example(conn: &mut Connection) -> booster_idpool::Result<()> {
/// execute_in_transaction(conn, TransactionBehavior::Immediate, |tx| {
///     tx.execute("INSERT INTO test (value) VALUES (?1)", [42])?;
///     Ok::<_, booster_idpool::IdPoolError>(())
/// })?;
/// # Ok(())
/// # }
/// ```
pub fn execute_in_transaction<F, T, E>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    operation: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(&Transaction) -> std::result::Result<T, E>,
    E: From<rusqlite::Error>,
{
    let tx = conn.transaction_with_behavior(behavior)?;
    let result = operation(&tx)?;
    tx.commit()?;
    Ok(result)
}

/// Execute operation within a transaction that is always rolled back.
///
/// Takes the same locks as a real run, so a dry run observes exactly what a
/// committed run would.
pub fn execute_then_rollback<F, T, E>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    operation: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(&Transaction) -> std::result::Result<T, E>,
    E: From<rusqlite::Error>,
{
    let tx = conn.transaction_with_behavior(behavior)?;
    let result = operation(&tx)?;
    tx.rollback()?;
    Ok(result)
}
