//! kestreldb operator tool: inspect and maintain a data directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kestreldb::storage::wal::{WalConfig, WalManager};
use kestreldb::{Database, DatabaseConfig};

/// kestreldb - page store with write-ahead logging and crash recovery
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./kestreldb_data")]
    data_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every log record without touching the data files
    DumpLog,
    /// Run crash recovery and report what it did
    Recover,
    /// Flush all pages and write a checkpoint record
    Checkpoint,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match args.command {
        Command::DumpLog => dump_log(&args.data_dir),
        Command::Recover => {
            // Recovery runs inside open.
            let db = open(&args.data_dir)?;
            if let Some(stats) = db.last_recovery() {
                println!(
                    "scanned {} records, redid {} pages, undid {} updates",
                    stats.records_scanned, stats.pages_redone, stats.pages_undone
                );
                for txn in &stats.losers {
                    println!("rolled back {}", txn);
                }
            }
            Ok(())
        }
        Command::Checkpoint => {
            let db = open(&args.data_dir)?;
            let offset = db.checkpoint().context("Failed to write checkpoint")?;
            println!("checkpoint written at offset {}", offset);
            Ok(())
        }
    }
}

fn open(data_dir: &std::path::Path) -> Result<Database> {
    Database::open(DatabaseConfig::new(data_dir))
        .with_context(|| format!("Failed to open database at {}", data_dir.display()))
}

fn dump_log(data_dir: &std::path::Path) -> Result<()> {
    let path = data_dir.join(kestreldb::database::WAL_FILE_NAME);
    if !path.exists() {
        anyhow::bail!("No log found at {}", path.display());
    }
    let wal = WalManager::open(WalConfig::new(&path)).context("Failed to open log")?;
    for record in wal.records()? {
        println!("{:>10}  {}", record.offset, record);
    }
    match wal.last_checkpoint() {
        Some(offset) => println!("last checkpoint at offset {}", offset),
        None => println!("no checkpoint"),
    }
    Ok(())
}
