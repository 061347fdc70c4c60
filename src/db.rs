use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::entities::{normalize_amount, parse_amount, Account};
use crate::error::{ResetError, Result};
use crate::store::{BalanceStore, MigrationStats};

/// system_settings key holding the cycle marker
pub const LAST_RESET_KEY: &str = "last_balance_reset";

/// Live-account filter shared by every bulk statement
const LIVE: &str = "(deleted = 0 OR deleted IS NULL)";

/// Actor recorded on audit events written by the engine
const ENGINE_ACTOR: &str = "balance_reset_engine";

/// Event for audit trail ("Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases answer "memory")
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!(journal_mode = %mode, "database journal mode");

    // ==========================================================================
    // Accounts Table (amounts stored as TEXT, 4 fractional digits)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            balance TEXT NOT NULL DEFAULT '0.0000',
            default_balance TEXT,
            deleted INTEGER DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // System Settings (cycle marker lives here)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS system_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_accounts_deleted ON accounts(deleted)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// VALUE ENCODING
// ============================================================================

fn encode_amount(value: Decimal) -> String {
    normalize_amount(value).to_string()
}

fn decode_amount(text: &str) -> Result<Decimal> {
    Decimal::from_str(text.trim())
        .map(normalize_amount)
        .map_err(|_| ResetError::Corrupt(format!("amount {:?}", text)))
}

fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ResetError::Corrupt(format!("timestamp {:?}", text)))
}

// ============================================================================
// ACCOUNTS
// ============================================================================

/// CSV row for seeding accounts: id,name,balance,default_balance
#[derive(Debug, Deserialize)]
struct AccountRecord {
    id: String,
    name: String,
    balance: String,
    #[serde(default)]
    default_balance: Option<String>,
}

impl AccountRecord {
    fn into_account(self) -> Result<Account> {
        let balance = parse_amount(&self.balance)?;
        let default_balance = match self.default_balance.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_amount(raw)?),
        };
        Ok(Account::new(self.id, self.name, balance).with_default(default_balance))
    }
}

pub fn load_accounts_csv(csv_path: &Path) -> anyhow::Result<Vec<Account>> {
    use anyhow::Context;

    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut accounts = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        let record: AccountRecord = result.context("Failed to deserialize account")?;
        let account = record
            .into_account()
            .with_context(|| format!("Invalid amount on data row {}", line + 1))?;
        accounts.push(account);
    }

    Ok(accounts)
}

/// Insert one account (fails on duplicate id)
pub fn insert_account(conn: &Connection, account: &Account) -> Result<()> {
    conn.execute(
        "INSERT INTO accounts (id, name, balance, default_balance, deleted)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            account.id,
            account.name,
            encode_amount(account.balance),
            account.default_balance.map(encode_amount),
            account.deleted,
        ],
    )?;
    Ok(())
}

/// Insert accounts, skipping ids that already exist; returns inserted count
pub fn insert_accounts(conn: &Connection, accounts: &[Account]) -> Result<usize> {
    let mut inserted = 0;
    let mut duplicates = 0;

    for account in accounts {
        match insert_account(conn, account) {
            Ok(()) => inserted += 1,
            Err(ResetError::Storage(rusqlite::Error::SqliteFailure(err, _)))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                duplicates += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info!(inserted, duplicates, "accounts imported");
    Ok(inserted)
}

/// Look up an account by id, including soft-deleted ones
pub fn find_account(conn: &Connection, id: &str) -> Result<Option<Account>> {
    let raw = conn
        .query_row(
            "SELECT id, name, balance, default_balance, deleted FROM accounts WHERE id = ?1",
            [id],
            raw_account,
        )
        .optional()?;

    raw.map(account_from_raw).transpose()
}

type RawAccount = (String, String, String, Option<String>, Option<bool>);

fn account_from_raw(raw: RawAccount) -> Result<Account> {
    let (id, name, balance, default_balance, deleted) = raw;
    Ok(Account {
        id,
        name,
        balance: decode_amount(&balance)?,
        default_balance: default_balance.as_deref().map(decode_amount).transpose()?,
        deleted: deleted.unwrap_or(false),
    })
}

fn raw_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAccount> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

pub fn get_live_accounts(conn: &Connection) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, name, balance, default_balance, deleted
         FROM accounts
         WHERE {LIVE}
         ORDER BY id"
    ))?;

    let rows = stmt
        .query_map([], raw_account)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(account_from_raw).collect()
}

// ============================================================================
// CYCLE MARKER
// ============================================================================

pub fn get_last_reset(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM system_settings WHERE key = ?1",
            [LAST_RESET_KEY],
            |row| row.get(0),
        )
        .optional()?;

    value.as_deref().map(decode_timestamp).transpose()
}

/// Record `now` as the cycle marker unless a later one is already stored.
/// Returns the marker value after the write.
pub fn advance_last_reset(conn: &Connection, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let recorded = match get_last_reset(conn)? {
        Some(previous) if previous > now => previous,
        _ => now,
    };

    conn.execute(
        "INSERT INTO system_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![
            LAST_RESET_KEY,
            encode_timestamp(recorded),
            encode_timestamp(Utc::now())
        ],
    )?;

    Ok(recorded)
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)
        .map_err(|e| ResetError::Corrupt(format!("event payload: {}", e)))?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            encode_timestamp(event.timestamp),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let rows = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(event_id, timestamp, event_type, entity_type, entity_id, data, actor)| {
            Ok(Event {
                event_id,
                timestamp: decode_timestamp(&timestamp)?,
                event_type,
                entity_type,
                entity_id,
                data: serde_json::from_str(&data)
                    .map_err(|e| ResetError::Corrupt(format!("event payload: {}", e)))?,
                actor,
            })
        })
        .collect()
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// BalanceStore over one shared SQLite connection
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Wrap an existing connection and make sure the schema exists
    pub fn new(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Run a closure against the raw connection (imports, diagnostics)
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock();
        f(&*conn)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied
        // transaction behind (rusqlite rolls back on drop).
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BalanceStore for SqliteStore {
    fn reset_all_balances(&self, now: DateTime<Utc>) -> Result<(usize, DateTime<Utc>)> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let affected = tx.execute(
            &format!(
                "UPDATE accounts SET balance = default_balance
                 WHERE {LIVE} AND default_balance IS NOT NULL"
            ),
            [],
        )?;
        let recorded = advance_last_reset(&tx, now)?;

        insert_event(
            &tx,
            &Event::new(
                "balances_reset",
                "cycle",
                LAST_RESET_KEY,
                serde_json::json!({
                    "accounts_affected": affected,
                    "reset_at": encode_timestamp(recorded),
                }),
                ENGINE_ACTOR,
            ),
        )?;

        tx.commit()?;
        debug!(affected, "bulk reset committed");
        Ok((affected, recorded))
    }

    fn reset_one_balance(&self, account_id: &str) -> Result<Decimal> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let target: Option<Option<String>> = tx
            .query_row(
                &format!("SELECT default_balance FROM accounts WHERE id = ?1 AND {LIVE}"),
                [account_id],
                |row| row.get(0),
            )
            .optional()?;

        let new_balance = match target {
            None => return Err(ResetError::NotFound(account_id.to_string())),
            Some(None) => return Err(ResetError::DefaultNotConfigured(account_id.to_string())),
            Some(Some(text)) => decode_amount(&text)?,
        };

        tx.execute(
            "UPDATE accounts SET balance = default_balance WHERE id = ?1",
            [account_id],
        )?;

        insert_event(
            &tx,
            &Event::new(
                "balance_reset",
                "account",
                account_id,
                serde_json::json!({ "new_balance": encode_amount(new_balance) }),
                ENGINE_ACTOR,
            ),
        )?;

        tx.commit()?;
        Ok(new_balance)
    }

    fn set_all_default_balances(&self, value: Decimal) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let encoded = encode_amount(value);
        let affected = tx.execute(
            &format!("UPDATE accounts SET default_balance = ?1 WHERE {LIVE}"),
            [&encoded],
        )?;

        insert_event(
            &tx,
            &Event::new(
                "default_balance_set",
                "migration",
                "default_balance",
                serde_json::json!({ "value": encoded, "accounts_affected": affected }),
                ENGINE_ACTOR,
            ),
        )?;

        tx.commit()?;
        Ok(affected)
    }

    fn copy_current_to_default(&self) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let affected = tx.execute(
            &format!("UPDATE accounts SET default_balance = balance WHERE {LIVE}"),
            [],
        )?;

        insert_event(
            &tx,
            &Event::new(
                "default_balance_from_current",
                "migration",
                "default_balance",
                serde_json::json!({ "accounts_affected": affected }),
                ENGINE_ACTOR,
            ),
        )?;

        tx.commit()?;
        Ok(affected)
    }

    fn last_reset(&self) -> Result<Option<DateTime<Utc>>> {
        get_last_reset(&self.lock())
    }

    fn set_last_reset(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let recorded = advance_last_reset(&tx, now)?;
        tx.commit()?;
        Ok(recorded)
    }

    fn live_accounts(&self) -> Result<Vec<Account>> {
        get_live_accounts(&self.lock())
    }

    fn migration_stats(&self) -> Result<MigrationStats> {
        let conn = self.lock();

        let (total, with_default, without_default): (i64, i64, i64) = conn.query_row(
            &format!(
                "SELECT
                    COUNT(*),
                    COUNT(CASE WHEN default_balance IS NOT NULL
                               AND CAST(default_balance AS REAL) > 0 THEN 1 END),
                    COUNT(CASE WHEN default_balance IS NULL
                               OR CAST(default_balance AS REAL) <= 0 THEN 1 END)
                 FROM accounts
                 WHERE {LIVE}"
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let has_column: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('accounts') WHERE name = 'default_balance'",
            [],
            |row| row.get(0),
        )?;

        let has_settings: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'system_settings'",
            [],
            |row| row.get(0),
        )?;

        Ok(MigrationStats {
            has_default_balance_column: has_column > 0,
            has_system_settings_table: has_settings > 0,
            total_users: total as u64,
            users_with_default_balance: with_default as u64,
            users_without_default_balance: without_default as u64,
        })
    }
}
