// ⏰ Reset Scheduler - hourly due check, owned start/stop
//
// start : one due check right away (catches a process that was down on the
//         reset day), then one per CHECK_INTERVAL
// tick  : re-read config → decision engine → bulk reset through the executor
// errors: logged per tick, the loop keeps going
//
// Each tick runs on its own task; a slow store delays only that tick's
// outcome, not the cadence. stop cancels future ticks, not one in flight.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::ConfigSource;
use crate::executor::{CycleOutcome, ResetExecutor};

/// Interval between due checks
pub const CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Result of a `start` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Loop spawned
    Started { reset_day: u32 },
    /// Loop was already running; nothing changed
    AlreadyRunning,
    /// Auto-reset disabled by configuration; nothing spawned
    Disabled,
}

/// Result of a `stop` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Snapshot reported by status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub reset_day: u32,
    pub is_running: bool,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owned scheduler state. Several instances may coexist in tests; in a
/// multi-instance deployment only one process should call `start`
pub struct Scheduler {
    executor: ResetExecutor,
    config: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    running: Mutex<Option<RunningLoop>>,
}

impl Scheduler {
    pub fn new(
        executor: ResetExecutor,
        config: Arc<dyn ConfigSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            config,
            clock,
            interval: CHECK_INTERVAL,
            running: Mutex::new(None),
        }
    }

    /// Override the check cadence
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Spawn the background loop (needs a tokio runtime)
    pub fn start(&self) -> StartOutcome {
        let mut slot = self.slot();

        if let Some(running) = slot.as_ref() {
            if !running.handle.is_finished() {
                info!("scheduler already initialized, skipping");
                return StartOutcome::AlreadyRunning;
            }
        }

        let config = self.config.reset_config();
        if !config.enabled() {
            info!("auto-reset disabled (BALANCE_RESET_DAY=0, invalid or not set)");
            return StartOutcome::Disabled;
        }

        let reset_day = config.reset_day();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.executor.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.clock),
            self.interval,
            cancel.clone(),
        ));

        *slot = Some(RunningLoop { cancel, handle });
        info!(reset_day, interval_secs = self.interval.as_secs(), "scheduler started");
        StartOutcome::Started { reset_day }
    }

    /// Cancel future ticks (idempotent)
    pub fn stop(&self) -> StopOutcome {
        match self.slot().take() {
            Some(running) => {
                running.cancel.cancel();
                info!("scheduler stopped");
                StopOutcome::Stopped
            }
            None => StopOutcome::NotRunning,
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot()
            .as_ref()
            .map(|running| !running.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn status(&self) -> SchedulerStatus {
        let config = self.config.reset_config();
        SchedulerStatus {
            enabled: config.enabled(),
            reset_day: config.reset_day(),
            is_running: self.is_running(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<RunningLoop>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(running) = self.slot().take() {
            running.cancel.cancel();
        }
    }
}

async fn run_loop(
    executor: ResetExecutor,
    config: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("scheduler loop cancelled");
                break;
            }
            // First tick completes immediately: startup check.
            _ = ticker.tick() => {
                tokio::spawn(run_tick(
                    executor.clone(),
                    Arc::clone(&config),
                    Arc::clone(&clock),
                ));
            }
        }
    }
}

/// One due-check/execute cycle; errors are logged, never propagated
async fn run_tick(executor: ResetExecutor, config: Arc<dyn ConfigSource>, clock: Arc<dyn Clock>) {
    let config = config.reset_config();
    let now = clock.now();

    let result =
        tokio::task::spawn_blocking(move || executor.check_and_reset(&config, now)).await;

    match result {
        Ok(Ok(CycleOutcome::Reset(outcome))) => {
            info!(
                affected = outcome.affected,
                reset_at = %outcome.reset_at.to_rfc3339(),
                "scheduled reset completed"
            );
        }
        Ok(Ok(CycleOutcome::Skipped { decision, .. })) => {
            debug!(reason = %decision.describe(), "no reset due");
        }
        Ok(Err(e)) => {
            error!(error = %e, "auto-reset check failed, retrying next tick");
        }
        Err(e) => {
            warn!(error = %e, "auto-reset tick aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::ResetConfig;
    use crate::db::{find_account, insert_accounts, SqliteStore};
    use crate::entities::Account;
    use crate::error::{ResetError, Result};
    use crate::store::{BalanceStore, MigrationStats};
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::RwLock;

    const FAST: Duration = Duration::from_millis(20);

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 3, 0, 0).unwrap()
    }

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .with_connection(|conn| {
                insert_accounts(
                    conn,
                    &[Account::new("acc", "Account", dec!(1)).with_default(Some(dec!(10)))],
                )
            })
            .unwrap();
        store
    }

    fn scheduler(store: Arc<dyn BalanceStore>, config: Arc<dyn ConfigSource>, clock: FixedClock) -> Scheduler {
        Scheduler::new(ResetExecutor::new(store), config, Arc::new(clock)).with_interval(FAST)
    }

    /// Poll until `check` holds or two seconds pass
    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    /// Config that tests can change while the loop runs
    struct SharedConfig(RwLock<ResetConfig>);

    impl SharedConfig {
        fn set(&self, config: ResetConfig) {
            *self.0.write().unwrap() = config;
        }
    }

    impl ConfigSource for SharedConfig {
        fn reset_config(&self) -> ResetConfig {
            self.0.read().unwrap().clone()
        }
    }

    /// Store whose first `failures` bulk resets fail
    struct FlakyStore {
        inner: SqliteStore,
        failures: AtomicUsize,
    }

    impl BalanceStore for FlakyStore {
        fn reset_all_balances(&self, now: DateTime<Utc>) -> Result<(usize, DateTime<Utc>)> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ResetError::Storage(rusqlite::Error::InvalidQuery));
            }
            self.inner.reset_all_balances(now)
        }
        fn reset_one_balance(&self, account_id: &str) -> Result<Decimal> {
            self.inner.reset_one_balance(account_id)
        }
        fn set_all_default_balances(&self, value: Decimal) -> Result<usize> {
            self.inner.set_all_default_balances(value)
        }
        fn copy_current_to_default(&self) -> Result<usize> {
            self.inner.copy_current_to_default()
        }
        fn last_reset(&self) -> Result<Option<DateTime<Utc>>> {
            self.inner.last_reset()
        }
        fn set_last_reset(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
            self.inner.set_last_reset(now)
        }
        fn live_accounts(&self) -> Result<Vec<Account>> {
            self.inner.live_accounts()
        }
        fn migration_stats(&self) -> Result<MigrationStats> {
            self.inner.migration_stats()
        }
    }

    #[tokio::test]
    async fn test_start_runs_immediate_check() {
        let store = seeded_store();
        let clock = FixedClock::new(at(5, 1));
        let scheduler = scheduler(
            Arc::new(store.clone()),
            Arc::new(ResetConfig::with_reset_day(1)),
            clock,
        );

        assert_eq!(scheduler.start(), StartOutcome::Started { reset_day: 1 });
        assert!(eventually(|| store.last_reset().unwrap() == Some(at(5, 1))).await);

        let account = store.with_connection(|conn| find_account(conn, "acc")).unwrap().unwrap();
        assert_eq!(account.balance, dec!(10));

        scheduler.stop();
    }

    #[tokio::test]
    async fn test_double_start_and_stop_are_noops() {
        let scheduler = scheduler(
            Arc::new(seeded_store()),
            Arc::new(ResetConfig::with_reset_day(20)),
            FixedClock::new(at(5, 1)),
        );

        assert_eq!(scheduler.stop(), StopOutcome::NotRunning);
        assert!(matches!(scheduler.start(), StartOutcome::Started { .. }));
        assert_eq!(scheduler.start(), StartOutcome::AlreadyRunning);
        assert!(scheduler.is_running());

        assert_eq!(scheduler.stop(), StopOutcome::Stopped);
        assert_eq!(scheduler.stop(), StopOutcome::NotRunning);
        assert!(!scheduler.is_running());

        // Restart after stop is allowed
        assert!(matches!(scheduler.start(), StartOutcome::Started { .. }));
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_disabled_config_does_not_start() {
        let config = Arc::new(SharedConfig(RwLock::new(ResetConfig::disabled())));
        let scheduler = scheduler(Arc::new(seeded_store()), config.clone(), FixedClock::new(at(5, 1)));

        assert_eq!(scheduler.start(), StartOutcome::Disabled);
        assert!(!scheduler.status().is_running);
        assert!(!scheduler.status().enabled);

        // Enabled check is re-evaluated on the next call
        config.set(ResetConfig::with_reset_day(3));
        assert_eq!(scheduler.start(), StartOutcome::Started { reset_day: 3 });
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_tick_rereads_configuration() {
        let store = seeded_store();
        let config = Arc::new(SharedConfig(RwLock::new(ResetConfig::with_reset_day(2))));
        let scheduler = scheduler(Arc::new(store.clone()), config.clone(), FixedClock::new(at(5, 9)));

        scheduler.start();
        tokio::time::sleep(FAST * 3).await;
        assert_eq!(store.last_reset().unwrap(), None);

        config.set(ResetConfig::with_reset_day(9));
        assert!(eventually(|| store.last_reset().unwrap() == Some(at(5, 9))).await);
        assert_eq!(scheduler.status().reset_day, 9);

        scheduler.stop();
    }

    #[tokio::test]
    async fn test_failed_tick_does_not_stop_loop() {
        let inner = seeded_store();
        let flaky = FlakyStore {
            inner: inner.clone(),
            failures: AtomicUsize::new(2),
        };
        let scheduler = scheduler(
            Arc::new(flaky),
            Arc::new(ResetConfig::with_reset_day(1)),
            FixedClock::new(at(6, 1)),
        );

        scheduler.start();
        assert!(eventually(|| inner.last_reset().unwrap() == Some(at(6, 1))).await);
        assert!(scheduler.is_running());

        scheduler.stop();
    }

    #[tokio::test]
    async fn test_stopped_loop_does_not_tick() {
        let store = seeded_store();
        let clock = FixedClock::new(at(5, 2));
        let scheduler = scheduler(
            Arc::new(store.clone()),
            Arc::new(ResetConfig::with_reset_day(1)),
            clock.clone(),
        );

        scheduler.start();
        // Land between ticks so no tick is spawned-but-not-yet-run at stop
        tokio::time::sleep(FAST * 2 + FAST / 2).await;
        assert_eq!(scheduler.stop(), StopOutcome::Stopped);

        clock.set(at(6, 1));
        tokio::time::sleep(FAST * 5).await;
        assert_eq!(store.last_reset().unwrap(), None);
    }

    #[tokio::test]
    async fn test_one_reset_per_month_across_ticks() {
        let store = seeded_store();
        let scheduler = scheduler(
            Arc::new(store.clone()),
            Arc::new(ResetConfig::with_reset_day(1)),
            FixedClock::new(at(7, 1)),
        );

        scheduler.start();
        assert!(eventually(|| store.last_reset().unwrap().is_some()).await);

        store
            .with_connection(|conn| {
                conn.execute("UPDATE accounts SET balance = '2.0000'", [])?;
                Ok(())
            })
            .unwrap();
        tokio::time::sleep(FAST * 5).await;

        let account = store.with_connection(|conn| find_account(conn, "acc")).unwrap().unwrap();
        assert_eq!(account.balance, dec!(2), "later ticks in the same month must not reset");

        scheduler.stop();
    }
}
