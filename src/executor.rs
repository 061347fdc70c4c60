// 🔁 Reset Executor - the only code path that mutates balances for a reset
//
// Bulk reset  : every live account → default balance, cycle marker advanced
//               in the same store transaction
// Single reset: one live account → default balance, cycle marker untouched
//
// Both the scheduler loop and the admin surface go through here, so the
// due-check + reset + marker sequence exists exactly once.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::config::ResetConfig;
use crate::decision::{evaluate, Decision};
use crate::error::Result;
use crate::store::BalanceStore;

/// Result of a completed bulk reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOutcome {
    /// Accounts whose balance was set to their default
    pub affected: usize,

    /// Cycle marker after the reset
    pub reset_at: DateTime<Utc>,
}

/// What a due-check-then-execute cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Reset was due and ran
    Reset(ResetOutcome),

    /// Reset was not due; nothing was mutated
    Skipped {
        decision: Decision,
        last_reset: Option<DateTime<Utc>>,
    },
}

/// Performs resets against a BalanceStore
#[derive(Clone)]
pub struct ResetExecutor {
    store: Arc<dyn BalanceStore>,
}

impl ResetExecutor {
    pub fn new(store: Arc<dyn BalanceStore>) -> Self {
        ResetExecutor { store }
    }

    /// Underlying store (read paths of the admin surface)
    pub fn store(&self) -> &Arc<dyn BalanceStore> {
        &self.store
    }

    /// Unconditional bulk reset
    pub fn reset_all(&self, now: DateTime<Utc>) -> Result<ResetOutcome> {
        let (affected, reset_at) = self.store.reset_all_balances(now)?;

        info!(affected, reset_at = %reset_at.to_rfc3339(), "balances reset to default");
        Ok(ResetOutcome { affected, reset_at })
    }

    /// Due check against the stored marker, then reset when due
    pub fn check_and_reset(&self, config: &ResetConfig, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let last_reset = self.store.last_reset()?;
        let decision = evaluate(now, config.reset_day(), config.enabled(), last_reset);

        if !decision.is_due() {
            return Ok(CycleOutcome::Skipped { decision, last_reset });
        }

        info!(reset_day = config.reset_day(), "reset day reached, resetting all balances");
        self.reset_all(now).map(CycleOutcome::Reset)
    }

    /// Reset a single live account; the cycle marker is not touched
    pub fn reset_one(&self, account_id: &str) -> Result<Decimal> {
        let new_balance = self.store.reset_one_balance(account_id)?;
        info!(account_id, new_balance = %new_balance, "account balance reset to default");
        Ok(new_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{find_account, insert_accounts, SqliteStore};
    use crate::entities::Account;
    use crate::error::ResetError;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn setup() -> (SqliteStore, ResetExecutor) {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .with_connection(|conn| {
                insert_accounts(
                    conn,
                    &[
                        Account::new("a1", "One", dec!(3)).with_default(Some(dec!(30))),
                        Account::new("a2", "Two", dec!(4)).with_default(Some(dec!(40))),
                        Account::new("gone", "Gone", dec!(5))
                            .with_default(Some(dec!(50)))
                            .soft_deleted(),
                    ],
                )
            })
            .unwrap();
        let executor = ResetExecutor::new(Arc::new(store.clone()));
        (store, executor)
    }

    fn balance(store: &SqliteStore, id: &str) -> Decimal {
        store
            .with_connection(|conn| find_account(conn, id))
            .unwrap()
            .unwrap()
            .balance
    }

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 1, 0, 0).unwrap()
    }

    #[test]
    fn test_scenario_a_reset_on_first_of_month() {
        let (store, executor) = setup();
        let config = ResetConfig::with_reset_day(1);

        let outcome = executor.check_and_reset(&config, at(4, 1)).unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Reset(ResetOutcome { affected: 2, reset_at: at(4, 1) })
        );
        assert_eq!(balance(&store, "a1"), dec!(30));
        assert_eq!(balance(&store, "a2"), dec!(40));
        assert_eq!(balance(&store, "gone"), dec!(5));
        assert_eq!(store.last_reset().unwrap(), Some(at(4, 1)));
    }

    #[test]
    fn test_second_check_same_month_is_skipped() {
        let (store, executor) = setup();
        let config = ResetConfig::with_reset_day(1);

        executor.check_and_reset(&config, at(4, 1)).unwrap();
        store.with_connection(|conn| {
            conn.execute("UPDATE accounts SET balance = '1.0000' WHERE id = 'a1'", [])?;
            Ok(())
        })
        .unwrap();

        let outcome = executor.check_and_reset(&config, at(4, 1)).unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::Skipped { decision: Decision::AlreadyResetThisMonth { .. }, .. }
        ));
        assert_eq!(balance(&store, "a1"), dec!(1), "no second reset this month");
    }

    #[test]
    fn test_scenario_b_skipped_mid_month() {
        let (store, executor) = setup();
        store.set_last_reset(at(4, 1)).unwrap();

        let outcome = executor
            .check_and_reset(&ResetConfig::with_reset_day(1), at(4, 15))
            .unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Skipped {
                decision: Decision::NotResetDay { today: 15, reset_day: 1 },
                last_reset: Some(at(4, 1)),
            }
        );
        assert_eq!(balance(&store, "a1"), dec!(3));
    }

    #[test]
    fn test_disabled_config_never_resets() {
        let (store, executor) = setup();

        let outcome = executor.check_and_reset(&ResetConfig::disabled(), at(4, 1)).unwrap();

        assert!(matches!(outcome, CycleOutcome::Skipped { decision: Decision::Disabled, .. }));
        assert_eq!(store.last_reset().unwrap(), None);
    }

    #[test]
    fn test_reset_all_twice_is_idempotent_and_monotonic() {
        let (store, executor) = setup();

        let first = executor.reset_all(at(4, 15)).unwrap();
        let balances = store.live_accounts().unwrap();
        let second = executor.reset_all(at(4, 2)).unwrap();

        assert_eq!(store.live_accounts().unwrap(), balances);
        assert!(second.reset_at >= first.reset_at);
        assert_eq!(second.reset_at, at(4, 15));
    }

    #[test]
    fn test_concurrent_resets_on_due_day() {
        let (store, executor) = setup();
        let config = ResetConfig::with_reset_day(1);
        let now = at(4, 1);

        let results: Vec<Result<CycleOutcome>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| executor.check_and_reset(&config, now)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut performed = 0;
        for result in results {
            match result.unwrap() {
                CycleOutcome::Reset(outcome) => {
                    performed += 1;
                    assert_eq!(outcome.reset_at, now);
                }
                CycleOutcome::Skipped { decision, .. } => {
                    assert!(matches!(decision, Decision::AlreadyResetThisMonth { .. }));
                }
            }
        }

        assert!(performed >= 1);
        assert_eq!(balance(&store, "a1"), dec!(30));
        assert_eq!(balance(&store, "a2"), dec!(40));
        assert_eq!(balance(&store, "gone"), dec!(5));
        assert_eq!(store.last_reset().unwrap(), Some(now));
    }

    #[test]
    fn test_reset_one() {
        let (store, executor) = setup();

        assert_eq!(executor.reset_one("a2").unwrap(), dec!(40));
        assert_eq!(balance(&store, "a1"), dec!(3));
        assert_eq!(store.last_reset().unwrap(), None);

        let err = executor.reset_one("gone").unwrap_err();
        assert!(matches!(err, ResetError::NotFound(_)));
    }
}
