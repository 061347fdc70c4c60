// 🛠️ Administrative Override Surface
//
// On-demand operations for the API/CLI layer:
//   status            → reset day, last reset, due-now, scheduler state (read-only)
//   perform_reset     → force (skip due check) or conditional (same check as the loop)
//   reset_one         → single account, marker untouched
//   default migration → copy current / INIT_BALANCE / caller value into default_balance
//
// Nothing here re-implements the due check or the reset: it all goes through
// decision::evaluate and ResetExecutor.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::config::ConfigSource;
use crate::decision::evaluate;
use crate::entities::{parse_amount, Account};
use crate::error::{ResetError, Result};
use crate::executor::{CycleOutcome, ResetExecutor};
use crate::scheduler::{Scheduler, SchedulerStatus};
use crate::store::{BalanceStore, MigrationStats};

// ============================================================================
// REPORTS
// ============================================================================

/// Status query response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetStatus {
    pub reset_day: u32,
    pub last_reset: Option<DateTime<Utc>>,
    pub should_reset_today: bool,
    pub scheduler: SchedulerStatus,
}

/// Response of a force / conditional reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetReport {
    pub performed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_date: Option<DateTime<Utc>>,
    /// Why nothing happened (conditional path only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub reset_day: u32,
    pub last_reset: Option<DateTime<Utc>>,
}

// ============================================================================
// MIGRATIONS
// ============================================================================

pub const AVAILABLE_ACTIONS: [&str; 4] = [
    "status",
    "set_default_from_current",
    "set_default_from_init",
    "set_default_value",
];

/// Mutating default-balance migrations (mutually exclusive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultMigration {
    /// default_balance := balance
    FromCurrent,
    /// default_balance := INIT_BALANCE
    FromInit,
    /// default_balance := caller-supplied value
    Value(Decimal),
}

impl DefaultMigration {
    pub fn action_name(&self) -> &'static str {
        match self {
            DefaultMigration::FromCurrent => "set_default_from_current",
            DefaultMigration::FromInit => "set_default_from_init",
            DefaultMigration::Value(_) => "set_default_value",
        }
    }
}

/// Any action accepted by the migrate endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationAction {
    Status,
    Apply(DefaultMigration),
}

impl MigrationAction {
    /// Parse an action name plus optional JSON value.
    /// `set_default_value` requires a JSON number; anything else is InvalidInput.
    pub fn parse(action: &str, value: Option<&serde_json::Value>) -> Result<Self> {
        match action {
            "status" => Ok(MigrationAction::Status),
            "set_default_from_current" => Ok(MigrationAction::Apply(DefaultMigration::FromCurrent)),
            "set_default_from_init" => Ok(MigrationAction::Apply(DefaultMigration::FromInit)),
            "set_default_value" => match value {
                Some(serde_json::Value::Number(number)) => Ok(MigrationAction::Apply(
                    DefaultMigration::Value(parse_amount(&number.to_string())?),
                )),
                _ => Err(ResetError::invalid("Value must be a number")),
            },
            other => Err(ResetError::invalid(format!(
                "Unknown action {:?}. Available actions: {}",
                other,
                AVAILABLE_ACTIONS.join(", ")
            ))),
        }
    }
}

/// Result of a mutating migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub action: String,
    pub users_affected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_balance: Option<Decimal>,
    /// Accounts after the migration (set_default_from_current only)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub users: Vec<Account>,
}

/// Environment values echoed by the status action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationEnvironment {
    pub init_balance: String,
    pub balance_reset_day: Option<String>,
}

/// Result of the "status" migration action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub migration_status: MigrationStats,
    pub environment: MigrationEnvironment,
}

// ============================================================================
// ADMIN SERVICE
// ============================================================================

/// Administrative entry points shared by the CLI and the HTTP server
#[derive(Clone)]
pub struct AdminService {
    executor: ResetExecutor,
    config: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    scheduler: Option<Arc<Scheduler>>,
}

impl AdminService {
    pub fn new(executor: ResetExecutor, config: Arc<dyn ConfigSource>, clock: Arc<dyn Clock>) -> Self {
        AdminService {
            executor,
            config,
            clock,
            scheduler: None,
        }
    }

    /// Attach the scheduler whose state status queries report
    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        match &self.scheduler {
            Some(scheduler) => scheduler.status(),
            None => {
                let config = self.config.reset_config();
                SchedulerStatus {
                    enabled: config.enabled(),
                    reset_day: config.reset_day(),
                    is_running: false,
                }
            }
        }
    }

    /// Read-only status report
    pub fn status(&self) -> Result<ResetStatus> {
        let config = self.config.reset_config();
        let last_reset = self.executor.store().last_reset()?;
        let decision = evaluate(self.clock.now(), config.reset_day(), config.enabled(), last_reset);

        Ok(ResetStatus {
            reset_day: config.reset_day(),
            last_reset,
            should_reset_today: decision.is_due(),
            scheduler: self.scheduler_status(),
        })
    }

    /// Due check at an arbitrary instant
    pub fn is_reset_due(&self, now: DateTime<Utc>) -> Result<bool> {
        let config = self.config.reset_config();
        let last_reset = self.executor.store().last_reset()?;
        Ok(evaluate(now, config.reset_day(), config.enabled(), last_reset).is_due())
    }

    /// Force (`force = true`) or conditional bulk reset
    pub fn perform_reset(&self, force: bool) -> Result<ResetReport> {
        let config = self.config.reset_config();
        let now = self.clock.now();

        let outcome = if force {
            info!("forced reset requested");
            self.executor.reset_all(now)?
        } else {
            match self.executor.check_and_reset(&config, now)? {
                CycleOutcome::Reset(outcome) => outcome,
                CycleOutcome::Skipped { decision, last_reset } => {
                    let last = last_reset
                        .map(|ts| ts.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string());
                    return Ok(ResetReport {
                        performed: false,
                        message: format!(
                            "Reset not needed. Reset day is {}, last reset was {}",
                            config.reset_day(),
                            last
                        ),
                        affected_count: None,
                        reset_date: None,
                        reason: Some(decision.describe()),
                        reset_day: config.reset_day(),
                        last_reset,
                    });
                }
            }
        };

        Ok(ResetReport {
            performed: true,
            message: format!(
                "Reset balances for {} users to their default values",
                outcome.affected
            ),
            affected_count: Some(outcome.affected),
            reset_date: Some(outcome.reset_at),
            reason: None,
            reset_day: config.reset_day(),
            last_reset: Some(outcome.reset_at),
        })
    }

    /// Reset one account; NotFound for unknown / soft-deleted ids
    pub fn reset_one(&self, account_id: &str) -> Result<Decimal> {
        self.executor.reset_one(account_id)
    }

    /// Apply one default-balance migration; never touches the cycle marker
    pub fn apply_default_migration(&self, kind: DefaultMigration) -> Result<MigrationReport> {
        let store = self.executor.store();

        let report = match &kind {
            DefaultMigration::FromCurrent => {
                let affected = store.copy_current_to_default()?;
                MigrationReport {
                    action: kind.action_name().to_string(),
                    users_affected: affected,
                    default_balance: None,
                    users: store.live_accounts()?,
                }
            }
            DefaultMigration::FromInit => {
                let value = self.config.reset_config().init_balance_value()?;
                let affected = store.set_all_default_balances(value)?;
                MigrationReport {
                    action: kind.action_name().to_string(),
                    users_affected: affected,
                    default_balance: Some(value),
                    users: Vec::new(),
                }
            }
            DefaultMigration::Value(value) => {
                let affected = store.set_all_default_balances(*value)?;
                MigrationReport {
                    action: kind.action_name().to_string(),
                    users_affected: affected,
                    default_balance: Some(*value),
                    users: Vec::new(),
                }
            }
        };

        info!(action = %report.action, affected = report.users_affected, "default balance migration applied");
        Ok(report)
    }

    /// Migration counters plus the effective environment
    pub fn migration_status(&self) -> Result<MigrationStatus> {
        let config = self.config.reset_config();
        Ok(MigrationStatus {
            migration_status: self.executor.store().migration_stats()?,
            environment: MigrationEnvironment {
                init_balance: config.init_balance_raw,
                balance_reset_day: config.reset_day_text,
            },
        })
    }

    /// Live accounts for listing
    pub fn accounts(&self) -> Result<Vec<Account>> {
        self.executor.store().live_accounts()
    }
}
