//! All-or-nothing units of work.
//!
//! Every multi-table mutation in the engine goes through [`run_in_transaction`].
//! The work closure receives a `&Transaction`, which cannot begin another
//! transaction, so nesting is ruled out by the borrow checker rather than at runtime.

use rusqlite::{Connection, Transaction, TransactionBehavior};

use super::DbPool;
use crate::error::Result;

/// Run `work` inside an IMMEDIATE transaction.
///
/// Commits when `work` returns `Ok`, rolls back when it returns `Err`. A panic
/// inside `work` unwinds through the transaction's drop, which also rolls back.
///
/// IMMEDIATE takes SQLite's write lock on `BEGIN`, so a unit that reads before it
/// writes cannot be interleaved with another writer between the read and the write.
/// On a row-locking store the equivalent is `SELECT ... FOR UPDATE` on the rows read.
pub fn run_in_transaction<T, F>(conn: &mut Connection, work: F) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    match work(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback() {
                tracing::error!("Rollback failed after '{}': {}", e, rollback_err);
            }
            Err(e)
        }
    }
}

/// Check a connection out of the pool, run `work` in a transaction on it, and
/// return the connection to the pool whatever the outcome.
pub fn run_in_pooled_transaction<T, F>(pool: &DbPool, work: F) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    let mut conn = pool.get()?;
    run_in_transaction(&mut conn, work)
}
