mod from_row;
mod schema;
mod transaction;
pub mod queries;

pub use schema::init_db;
pub use transaction::{run_in_transaction, run_in_pooled_transaction};

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::escrow::EscrowPolicy;
use crate::payments::PaymentGateway;
use crate::refunds::RefundPolicy;

pub type DbPool = Pool<SqliteConnectionManager>;

/// How long a unit of work waits for another unit's write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Injected at startup; tests swap in a stub.
    pub gateway: Arc<dyn PaymentGateway>,
    pub escrow: EscrowPolicy,
    pub refunds: RefundPolicy,
    pub booking_horizon_months: u32,
    /// Secret for `x-signature` verification. `None` disables the check.
    pub webhook_secret: Option<String>,
    /// Base URL for checkout back-links and the webhook notification URL.
    pub base_url: String,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")
    });
    Pool::builder().max_size(10).build(manager)
}
