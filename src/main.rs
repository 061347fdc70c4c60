use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use balance_reset::{
    init_tracing, load_accounts_csv, insert_accounts, AdminService, EnvConfig, MigrationAction,
    ResetError, ResetExecutor, Scheduler, SqliteStore, StartOutcome, SystemClock,
};

const DB_PATH_VAR: &str = "BALANCE_DB_PATH";
const DEFAULT_DB_PATH: &str = "balances.db";

fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("status");

    let store = open_store()?;
    let admin = AdminService::new(
        ResetExecutor::new(Arc::new(store.clone())),
        Arc::new(EnvConfig),
        Arc::new(SystemClock),
    );

    match command {
        "import" => {
            let csv_path = args.get(1).context("usage: balance-reset import <accounts.csv>")?;
            run_import(&store, Path::new(csv_path))
        }
        "status" => run_status(&admin),
        "accounts" => run_accounts(&admin),
        "reset" => run_reset(&admin, args.iter().any(|a| a == "--force")),
        "reset-one" => {
            let id = args.get(1).context("usage: balance-reset reset-one <account-id>")?;
            run_reset_one(&admin, id)
        }
        "migrate" => {
            let action = args.get(1).context("usage: balance-reset migrate <action> [value]")?;
            run_migrate(&admin, action, args.get(2).map(String::as_str))
        }
        "run" => run_scheduler(store),
        other => {
            print_usage();
            bail!("unknown command: {}", other)
        }
    }
}

fn db_path() -> PathBuf {
    env::var(DB_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH))
}

fn open_store() -> Result<SqliteStore> {
    let path = db_path();
    SqliteStore::open(&path).with_context(|| format!("Failed to open database {:?}", path))
}

fn print_usage() {
    eprintln!("Usage: balance-reset <command>");
    eprintln!("  import <csv>             Load accounts (id,name,balance,default_balance)");
    eprintln!("  status                   Reset day, last reset, due now");
    eprintln!("  accounts                 List live accounts");
    eprintln!("  reset [--force]          Run the monthly reset (if due, or forced)");
    eprintln!("  reset-one <id>           Reset one account to its default");
    eprintln!("  migrate <action> [value] status | set_default_from_current |");
    eprintln!("                           set_default_from_init | set_default_value <n>");
    eprintln!("  run                      Run the hourly scheduler until Ctrl-C");
}

fn run_import(store: &SqliteStore, csv_path: &Path) -> Result<()> {
    println!("📂 Loading accounts from {:?}...", csv_path);
    let accounts = load_accounts_csv(csv_path)?;
    println!("✓ Loaded {} accounts from CSV", accounts.len());

    let inserted = store.with_connection(|conn| insert_accounts(conn, &accounts))?;
    println!("✓ Inserted: {} accounts", inserted);
    println!("✓ Skipped duplicates: {}", accounts.len() - inserted);

    Ok(())
}

fn run_status(admin: &AdminService) -> Result<()> {
    let status = admin.status()?;

    println!("🗓️  Balance Reset Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Reset day:          {}", status.reset_day);
    println!("Auto-reset enabled: {}", status.scheduler.enabled);
    match status.last_reset {
        Some(ts) => println!("Last reset:         {}", ts.to_rfc3339()),
        None => println!("Last reset:         never"),
    }
    println!("Reset due now:      {}", status.should_reset_today);

    Ok(())
}

fn run_accounts(admin: &AdminService) -> Result<()> {
    let accounts = admin.accounts()?;

    println!("{:<20} {:<24} {:>14} {:>14}", "ID", "NAME", "BALANCE", "DEFAULT");
    for account in &accounts {
        let default = account
            .default_balance
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<24} {:>14} {:>14}",
            account.id, account.name, account.balance, default
        );
    }
    println!("\n✓ {} live accounts", accounts.len());

    Ok(())
}

fn run_reset(admin: &AdminService, force: bool) -> Result<()> {
    let report = admin.perform_reset(force)?;

    if report.performed {
        println!("✅ {}", report.message);
    } else {
        println!("⏭️  {}", report.message);
        if let Some(reason) = report.reason {
            println!("   ({})", reason);
        }
    }

    Ok(())
}

fn run_reset_one(admin: &AdminService, id: &str) -> Result<()> {
    match admin.reset_one(id) {
        Ok(balance) => {
            println!("✅ Balance reset for account {}: {}", id, balance);
            Ok(())
        }
        Err(ResetError::NotFound(id)) => {
            eprintln!("❌ Account not found: {}", id);
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}

fn run_migrate(admin: &AdminService, action: &str, value: Option<&str>) -> Result<()> {
    // Numbers arrive as JSON numbers; anything else stays a string and is rejected
    let value = value.map(|raw| {
        serde_json::from_str::<serde_json::Value>(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
    });

    match MigrationAction::parse(action, value.as_ref())? {
        MigrationAction::Status => {
            let status = admin.migration_status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        MigrationAction::Apply(kind) => {
            let report = admin.apply_default_migration(kind)?;
            println!(
                "✅ {}: default_balance updated for {} accounts",
                report.action, report.users_affected
            );
        }
    }

    Ok(())
}

fn run_scheduler(store: SqliteStore) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;

    runtime.block_on(async move {
        let scheduler = Scheduler::new(
            ResetExecutor::new(Arc::new(store)),
            Arc::new(EnvConfig),
            Arc::new(SystemClock),
        );

        match scheduler.start() {
            StartOutcome::Started { reset_day } => {
                println!("⏰ Scheduler running (reset day {}). Press Ctrl+C to stop.", reset_day);
            }
            StartOutcome::Disabled => {
                println!("Auto-reset disabled (BALANCE_RESET_DAY=0 or not set). Nothing to run.");
                return Ok(());
            }
            StartOutcome::AlreadyRunning => {}
        }

        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
        scheduler.stop();
        println!("\n✅ Scheduler stopped");
        Ok(())
    })
}
