// 🗄️ Store seam - Account Store + Cycle Marker Store
//
// The engine only needs these operations. The shipped implementation is
// db::SqliteStore, which keeps accounts and the cycle marker in one database
// so a bulk reset and its marker commit in a single transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entities::Account;
use crate::error::Result;

/// Counters reported by the "status" migration action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStats {
    pub has_default_balance_column: bool,
    pub has_system_settings_table: bool,
    pub total_users: u64,
    pub users_with_default_balance: u64,
    pub users_without_default_balance: u64,
}

/// Storage operations used by the reset engine
///
/// Every bulk operation is restricted to live accounts
/// (`deleted = 0 OR deleted IS NULL`) and is atomic.
pub trait BalanceStore: Send + Sync {
    /// balance := default_balance for every live account with a default,
    /// and record `now` as the cycle marker, as one unit of work.
    /// Returns the number of accounts updated and the marker as recorded
    /// by this unit of work.
    fn reset_all_balances(&self, now: DateTime<Utc>) -> Result<(usize, DateTime<Utc>)>;

    /// balance := default_balance for one live account; returns the new balance
    fn reset_one_balance(&self, account_id: &str) -> Result<Decimal>;

    /// default_balance := value for every live account
    fn set_all_default_balances(&self, value: Decimal) -> Result<usize>;

    /// default_balance := balance for every live account
    fn copy_current_to_default(&self) -> Result<usize>;

    /// Cycle marker (None = never reset)
    fn last_reset(&self) -> Result<Option<DateTime<Utc>>>;

    /// Advance the cycle marker; never moves it backwards
    fn set_last_reset(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>>;

    /// Live accounts, sorted by id
    fn live_accounts(&self) -> Result<Vec<Account>>;

    /// Counters for the migration status report
    fn migration_stats(&self) -> Result<MigrationStats>;
}
