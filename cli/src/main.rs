//! capledger CLI — inspect ledger state.
//!
//! Usage:
//! ```bash
//! capledger status   ./ledger.db
//! capledger captable ./ledger.db
//! capledger balance  ./ledger.db 0xabc...
//! capledger info
//! ```

use std::env;
use std::process;
use std::sync::Arc;

use capledger_core::{LedgerError, LedgerService};
use capledger_storage::SqliteStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "status" => cmd_status(arg(&args, 2)).await,
        "captable" => cmd_captable(arg(&args, 2)).await,
        "balance" => cmd_balance(arg(&args, 2), arg(&args, 3)).await,
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("capledger {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn arg<'a>(args: &'a [String], index: usize) -> Option<&'a str> {
    args.get(index).map(String::as_str)
}

fn print_usage() {
    println!("capledger {}", env!("CARGO_PKG_VERSION"));
    println!("Event-sourced accounting for a compliance-gated equity token\n");
    println!("USAGE:");
    println!("    capledger <COMMAND> [ARGS]\n");
    println!("COMMANDS:");
    println!("    status   <db>            Show indexer cursor and ledger counters");
    println!("    captable <db>            Print the current cap table");
    println!("    balance  <db> <address>  Print one holder's balance");
    println!("    info     Show configuration defaults");
    println!("    version  Print version");
    println!("    help     Print this help");
}

fn cmd_info() {
    println!("capledger v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default blocks per query: 1000");
    println!("  Default poll interval: 5000 ms");
    println!("  Split multiplier base: 1e18 fixed-point");
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
}

async fn open(db: Option<&str>) -> Result<Arc<SqliteStore>, LedgerError> {
    let path = db.ok_or_else(|| LedgerError::InvalidInput("missing <db> argument".into()))?;
    Ok(Arc::new(SqliteStore::open(path).await?))
}

async fn cmd_status(db: Option<&str>) -> Result<(), LedgerError> {
    let store = open(db).await?;
    use capledger_core::EventStore;

    let cursor = store.cursor().await?;
    let transfers = store.all_transfers().await?.len();
    let actions = store.actions().await?.len();
    let holders = store
        .balances()
        .await?
        .iter()
        .filter(|r| r.balance.is_positive())
        .count();

    match cursor {
        Some(block) => println!("Cursor: block {block}"),
        None => println!("Cursor: not set (never indexed)"),
    }
    println!("Transfers: {transfers}");
    println!("Corporate actions: {actions}");
    println!("Holders: {holders}");
    Ok(())
}

async fn cmd_captable(db: Option<&str>) -> Result<(), LedgerError> {
    let store = open(db).await?;
    let service = LedgerService::new(store);
    let table = service.cap_table(None).await?;

    println!("Total shares: {}", table.total_shares);
    println!("Holders: {}", table.holders);
    for entry in &table.entries {
        println!("  {}  {:>6}%  {}", entry.address, entry.percent(), entry.balance);
    }
    Ok(())
}

async fn cmd_balance(db: Option<&str>, address: Option<&str>) -> Result<(), LedgerError> {
    let address =
        address.ok_or_else(|| LedgerError::InvalidInput("missing <address> argument".into()))?;
    let store = open(db).await?;
    let service = LedgerService::new(store);
    let balance = service.current_balance(address).await?;
    println!("{} {}", balance.address, balance.balance);
    Ok(())
}
