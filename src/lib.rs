// Balance Reset Engine - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod admin;      // Administrative override surface (status, force reset, migrations)
pub mod clock;
pub mod config;     // BALANCE_RESET_DAY / INIT_BALANCE
pub mod db;         // SQLite store + audit trail
pub mod decision;   // Pure due check
pub mod entities;
pub mod error;
pub mod executor;   // Bulk + single-account reset
pub mod scheduler;  // Hourly background loop
pub mod store;      // BalanceStore seam

// Re-export commonly used types
pub use admin::{
    AdminService, DefaultMigration, MigrationAction, MigrationReport, MigrationStatus,
    ResetReport, ResetStatus, AVAILABLE_ACTIONS,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigSource, EnvConfig, ResetConfig};
pub use db::{
    Event, SqliteStore,
    setup_database, load_accounts_csv, insert_account, insert_accounts, find_account,
    get_live_accounts, get_events_for_entity, insert_event,
};
pub use decision::{evaluate, should_reset, Decision};
pub use entities::{parse_amount, Account};
pub use error::{ResetError, Result};
pub use executor::{CycleOutcome, ResetExecutor, ResetOutcome};
pub use scheduler::{Scheduler, SchedulerStatus, StartOutcome, StopOutcome, CHECK_INTERVAL};
pub use store::{BalanceStore, MigrationStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the `tracing` subscriber used by both binaries (RUST_LOG, default `info`)
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
