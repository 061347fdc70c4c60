// 💳 Account Entity - Balance + reset target
//
// "Balance is a VALUE (reset every cycle), Account id is IDENTITY (never changes)"
//
// Problem solved:
// - Each account carries its own reset target (default_balance)
// - default_balance = None means "not yet configured" → skipped by bulk resets
// - Soft-deleted accounts stay in the table but are never touched by bulk work
// - Amounts are fixed-point decimals with 4 fractional digits

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ResetError, Result};

/// Fractional digits kept for every stored amount (DECIMAL(16,4))
pub const AMOUNT_SCALE: u32 = 4;

// ============================================================================
// AMOUNTS
// ============================================================================

/// Round an amount to the storage precision
pub fn normalize_amount(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(AMOUNT_SCALE);
    rounded
}

/// Parse a caller-supplied amount ("12.5", " 100 ", "1e3")
///
/// Anything that is not a finite number is InvalidInput.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ResetError::invalid("Value must be a number"));
    }

    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map(normalize_amount)
        .map_err(|_| ResetError::invalid(format!("Value must be a number, got {:?}", raw)))
}

// ============================================================================
// ACCOUNT ENTITY
// ============================================================================

/// Account row as seen by the reset engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable identity - NEVER changes
    pub id: String,

    /// Display name
    pub name: String,

    /// Current balance
    pub balance: Decimal,

    /// Value the balance is reset to (None = not yet configured)
    #[serde(default)]
    pub default_balance: Option<Decimal>,

    /// Soft delete flag
    #[serde(default)]
    pub deleted: bool,
}

impl Account {
    /// Create a live account whose default equals its opening balance
    pub fn new(id: impl Into<String>, name: impl Into<String>, balance: Decimal) -> Self {
        let balance = normalize_amount(balance);
        Account {
            id: id.into(),
            name: name.into(),
            balance,
            default_balance: Some(balance),
            deleted: false,
        }
    }

    /// Builder: override the reset target
    pub fn with_default(mut self, default_balance: Option<Decimal>) -> Self {
        self.default_balance = default_balance.map(normalize_amount);
        self
    }

    /// Builder: mark as soft-deleted
    pub fn soft_deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    /// Live accounts are the only ones bulk operations touch
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    /// Has a positive default balance (counts as "configured" in migration status)
    pub fn has_default(&self) -> bool {
        matches!(self.default_balance, Some(d) if d > Decimal::ZERO)
    }

    /// Check whether a reset would change anything
    pub fn is_at_default(&self) -> bool {
        self.default_balance == Some(self.balance)
    }
}

// ============================================================================
// TESTS
// ============================================================================
