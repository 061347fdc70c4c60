// 🗓️ Reset Decision Engine - "Is a reset due right now?"
//
// Rules, checked in order:
//   1. auto-reset disabled               → not due
//   2. today's day-of-month != reset day → not due
//   3. last reset in this (year, month)  → not due (one reset per calendar month)
//   4. otherwise                         → due
//
// Pure: callers supply `last_reset`, nothing here touches storage.
// A reset day beyond the month length (31 in April) simply never matches.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a due check, with the reason when not due
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Decision {
    /// Reset should run now
    Due,

    /// BALANCE_RESET_DAY is 0, negative, invalid or unset
    Disabled,

    /// Today is not the configured day
    NotResetDay { today: u32, reset_day: u32 },

    /// Cycle marker already falls in the current month
    AlreadyResetThisMonth { last_reset: DateTime<Utc> },
}

impl Decision {
    pub fn is_due(&self) -> bool {
        matches!(self, Decision::Due)
    }

    /// Human-readable explanation
    pub fn describe(&self) -> String {
        match self {
            Decision::Due => "reset is due".to_string(),
            Decision::Disabled => "auto-reset is disabled".to_string(),
            Decision::NotResetDay { today, reset_day } => {
                format!("today is day {}, reset day is {}", today, reset_day)
            }
            Decision::AlreadyResetThisMonth { last_reset } => {
                format!("already reset this month at {}", last_reset.to_rfc3339())
            }
        }
    }
}

/// Evaluate the due check and keep the reason
pub fn evaluate(
    now: DateTime<Utc>,
    reset_day: u32,
    enabled: bool,
    last_reset: Option<DateTime<Utc>>,
) -> Decision {
    if !enabled {
        return Decision::Disabled;
    }

    let today = now.day();
    if today != reset_day {
        return Decision::NotResetDay { today, reset_day };
    }

    if let Some(last) = last_reset {
        if same_month(last, now) {
            return Decision::AlreadyResetThisMonth { last_reset: last };
        }
    }

    Decision::Due
}

/// `true` when a reset is due now
pub fn should_reset(
    now: DateTime<Utc>,
    reset_day: u32,
    enabled: bool,
    last_reset: Option<DateTime<Utc>>,
) -> bool {
    evaluate(now, reset_day, enabled, last_reset).is_due()
}

/// Same calendar (year, month)
fn same_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

// ============================================================================
// TESTS
// ============================================================================
