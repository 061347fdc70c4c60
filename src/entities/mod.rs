// Entity Models
// Account is the only entity this engine mutates.
//
// Each account has:
// - Stable identity (id) that NEVER changes
// - A current balance that is reset to its default balance every cycle
// - A soft-delete flag that removes it from every bulk operation

pub mod account;

pub use account::{parse_amount, normalize_amount, Account, AMOUNT_SCALE};
