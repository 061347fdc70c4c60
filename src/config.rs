// ⚙️ Configuration - reset day + global default balance
//
// BALANCE_RESET_DAY : 1-31 → day of month the cycle fires
//                     0 / negative / non-numeric / absent → auto-reset disabled
// INIT_BALANCE      : constant used by the "set_default_from_init" migration
//
// Configuration is NOT snapshotted: the scheduler asks its ConfigSource again
// on every tick, so changing the environment takes effect on the next check.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;

use crate::entities::parse_amount;
use crate::error::Result;

pub const RESET_DAY_VAR: &str = "BALANCE_RESET_DAY";
pub const INIT_BALANCE_VAR: &str = "INIT_BALANCE";

const DEFAULT_INIT_BALANCE: &str = "0";

// ============================================================================
// RESET CONFIG
// ============================================================================

/// Effective reset configuration at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetConfig {
    /// Configured day, before clamping (None = unset or unparseable)
    pub reset_day_raw: Option<i64>,

    /// BALANCE_RESET_DAY text as found in the environment
    #[serde(default)]
    pub reset_day_text: Option<String>,

    /// Raw INIT_BALANCE text (validated lazily by the migration that uses it)
    pub init_balance_raw: String,
}

impl ResetConfig {
    /// Config for a fixed reset day and a zero init balance
    pub fn with_reset_day(day: i64) -> Self {
        ResetConfig {
            reset_day_raw: Some(day),
            reset_day_text: Some(day.to_string()),
            init_balance_raw: DEFAULT_INIT_BALANCE.to_string(),
        }
    }

    /// Auto-reset is disabled
    pub fn disabled() -> Self {
        Self::with_reset_day(0)
    }

    /// Builder: set INIT_BALANCE text
    pub fn init_balance(mut self, raw: impl Into<String>) -> Self {
        self.init_balance_raw = raw.into();
        self
    }

    /// Build from raw environment values (None = variable unset)
    pub fn from_values(reset_day: Option<&str>, init_balance: Option<&str>) -> Self {
        ResetConfig {
            reset_day_raw: reset_day.and_then(parse_leading_int),
            reset_day_text: reset_day.map(str::to_string),
            init_balance_raw: init_balance.unwrap_or(DEFAULT_INIT_BALANCE).to_string(),
        }
    }

    /// Read the current process environment
    pub fn from_env() -> Self {
        let reset_day = env::var(RESET_DAY_VAR).ok();
        let init_balance = env::var(INIT_BALANCE_VAR).ok();
        Self::from_values(reset_day.as_deref(), init_balance.as_deref())
    }

    /// Auto-reset is enabled iff the configured day is > 0
    pub fn enabled(&self) -> bool {
        matches!(self.reset_day_raw, Some(day) if day > 0)
    }

    /// Configured day clamped to [1, 31]
    pub fn reset_day(&self) -> u32 {
        self.reset_day_raw.unwrap_or(1).clamp(1, 31) as u32
    }

    /// INIT_BALANCE as a decimal (InvalidInput when non-numeric)
    pub fn init_balance_value(&self) -> Result<Decimal> {
        parse_amount(&self.init_balance_raw)
    }
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self::from_values(None, None)
    }
}

/// Integer prefix of a string: "15" → 15, " 7th" → 7, "abc" → None
///
/// Values beyond i64 saturate, so a huge day stays enabled (and clamps to 31).
fn parse_leading_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let end = digits
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    let value = digits[..end].bytes().fold(0i64, |acc, b| {
        acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
    });
    Some(if negative { -value } else { value })
}

// ============================================================================
// CONFIG SOURCES
// ============================================================================

/// Where the scheduler and admin surface read configuration from
pub trait ConfigSource: Send + Sync {
    fn reset_config(&self) -> ResetConfig;
}

/// Re-reads the process environment on every call
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfig;

impl ConfigSource for EnvConfig {
    fn reset_config(&self) -> ResetConfig {
        ResetConfig::from_env()
    }
}

/// Fixed configuration
impl ConfigSource for ResetConfig {
    fn reset_config(&self) -> ResetConfig {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unset_reset_day_disables() {
        let config = ResetConfig::from_values(None, None);
        assert!(!config.enabled());
        assert_eq!(config.reset_day_raw, None);
        assert_eq!(config.reset_day_text, None);
        assert_eq!(config.init_balance_value().unwrap(), Decimal::ZERO);

        assert_eq!(ResetConfig::default(), config);
    }

    #[test]
    fn test_zero_disables() {
        let config = ResetConfig::from_values(Some("0"), None);
        assert!(!config.enabled());
        // Clamped day is still reported
        assert_eq!(config.reset_day(), 1);
    }

    #[test]
    fn test_negative_disables() {
        let config = ResetConfig::from_values(Some("-5"), None);
        assert!(!config.enabled());
        assert_eq!(config.reset_day(), 1);
    }

    #[test]
    fn test_reset_day_clamped() {
        assert_eq!(ResetConfig::with_reset_day(45).reset_day(), 31);
        assert_eq!(ResetConfig::with_reset_day(31).reset_day(), 31);
        assert_eq!(ResetConfig::with_reset_day(15).reset_day(), 15);
        assert!(ResetConfig::with_reset_day(45).enabled());
    }

    #[test]
    fn test_non_numeric_reset_day_disables() {
        let config = ResetConfig::from_values(Some("monthly"), None);
        assert_eq!(config.reset_day_raw, None);
        assert!(!config.enabled());
    }

    #[test]
    fn test_leading_integer_is_used() {
        assert_eq!(parse_leading_int("15abc"), Some(15));
        assert_eq!(parse_leading_int("  7"), Some(7));
        assert_eq!(parse_leading_int("-2"), Some(-2));
        assert_eq!(parse_leading_int("x1"), None);
        assert_eq!(parse_leading_int(""), None);
        assert_eq!(parse_leading_int("-"), None);
        assert_eq!(parse_leading_int("+9"), Some(9));
    }

    #[test]
    fn test_huge_reset_day_saturates_and_stays_enabled() {
        assert_eq!(parse_leading_int("99999999999999999999"), Some(i64::MAX));

        let config = ResetConfig::from_values(Some("99999999999999999999"), None);
        assert!(config.enabled());
        assert_eq!(config.reset_day(), 31);
        assert_eq!(config.reset_day_text.as_deref(), Some("99999999999999999999"));
    }

    #[test]
    fn test_init_balance_parsing() {
        let config = ResetConfig::with_reset_day(1).init_balance("250.5");
        assert_eq!(config.init_balance_value().unwrap(), dec!(250.5));

        let bad = ResetConfig::with_reset_day(1).init_balance("lots");
        assert!(bad.init_balance_value().is_err());
    }

    #[test]
    fn test_fixed_config_source() {
        let source = ResetConfig::with_reset_day(12);
        assert_eq!(source.reset_config().reset_day(), 12);
    }
}
