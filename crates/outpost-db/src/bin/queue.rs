//! # Operation Log Tool
//!
//! Inspects and repairs the operation log of a local database.
//!
//! ## Usage
//! ```bash
//! # Queue counts
//! cargo run -p outpost-db --bin outpost-queue -- status
//!
//! # Permanently failed operations
//! cargo run -p outpost-db --bin outpost-queue -- failed
//!
//! # Requeue or drop one failed operation
//! cargo run -p outpost-db --bin outpost-queue -- retry 42
//! cargo run -p outpost-db --bin outpost-queue -- discard 42
//!
//! # Drop every permanently failed operation
//! cargo run -p outpost-db --bin outpost-queue -- clear
//!
//! # Specify database path
//! cargo run -p outpost-db --bin outpost-queue -- --db ./data/outpost.db status
//! ```

use std::env;

use outpost_core::MAX_ATTEMPTS;
use outpost_db::{Database, DbConfig};
use tracing_subscriber::EnvFilter;

enum Command {
    Status,
    Failed,
    Retry(i64),
    Discard(i64),
    Clear,
}

fn print_help() {
    println!("Outpost operation log tool");
    println!();
    println!("Usage: outpost-queue [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  status          Show queue counts");
    println!("  failed          List permanently failed operations");
    println!("  retry <ID>      Requeue a failed operation with a fresh attempt budget");
    println!("  discard <ID>    Delete a failed operation");
    println!("  clear           Delete every permanently failed operation");
    println!();
    println!("Options:");
    println!("  -d, --db <PATH>    Database file path (default: ./outpost.db)");
    println!("  -h, --help         Show this help message");
}

fn parse_id(value: Option<&String>) -> Result<i64, Box<dyn std::error::Error>> {
    let value = value.ok_or("missing operation id")?;
    Ok(value.parse()?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(true)
        .init();

    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./outpost.db");
    let mut command = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "status" => command = Some(Command::Status),
            "failed" => command = Some(Command::Failed),
            "clear" => command = Some(Command::Clear),
            "retry" => {
                command = Some(Command::Retry(parse_id(args.get(i + 1))?));
                i += 1;
            }
            "discard" => {
                command = Some(Command::Discard(parse_id(args.get(i + 1))?));
                i += 1;
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                return Ok(());
            }
        }
        i += 1;
    }

    let Some(command) = command else {
        print_help();
        return Ok(());
    };

    let db = Database::new(DbConfig::new(&db_path)).await?;
    let operations = db.operations();

    match command {
        Command::Status => {
            let counts = operations.counts(MAX_ATTEMPTS).await?;
            println!("Database:            {}", db_path);
            println!("Pending:             {}", counts.pending);
            println!("Failed (retrying):   {}", counts.retryable_failed);
            println!("Failed (permanent):  {}", counts.permanently_failed);
            println!("Total:               {}", counts.total());
        }
        Command::Failed => {
            let failed = operations.list_failed(MAX_ATTEMPTS).await?;
            if failed.is_empty() {
                println!("No failed operations");
            }
            for op in failed {
                println!(
                    "#{:<6} {:<18} {:<22} key={} attempts={} class={} error={}",
                    op.id,
                    op.entity_type,
                    op.kind,
                    op.entity_key,
                    op.attempts,
                    op.error_class.map(|c| c.to_string()).unwrap_or_default(),
                    op.last_error.unwrap_or_default(),
                );
            }
        }
        Command::Retry(id) => {
            operations.retry_failed(id).await?;
            println!("✓ Operation #{} requeued", id);
        }
        Command::Discard(id) => {
            operations.discard(id).await?;
            println!("✓ Operation #{} discarded", id);
        }
        Command::Clear => {
            let cleared = operations.clear_failed(MAX_ATTEMPTS).await?;
            println!("✓ Cleared {} failed operations", cleared);
        }
    }

    db.close().await;
    Ok(())
}
