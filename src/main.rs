//! rustyledger
//!
//! Builds an address -> balance ledger from a pivxd-style node and reports
//! on it.
//!
//! ```bash
//! # Walk the chain up to sync.max_height (default 387)
//! rustyledger sync
//!
//! # Only the first 10k blocks, no block/tx archive
//! rustyledger --config /etc/rustyledger.toml sync --max-height 10000 --no-archive
//!
//! # Balance report, largest first
//! rustyledger tally --output balances.csv
//!
//! # Address count and total held
//! rustyledger verify
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use rustyledger::chain_state::get_sync_height;
use rustyledger::config::{get_global_config, init_global_config, Settings, DEFAULT_CONFIG_PATH};
use rustyledger::db_handles::DbHandles;
use rustyledger::error::LedgerResult;
use rustyledger::ledger::{LedgerStore, RocksLedger};
use rustyledger::metrics::{init_metrics, serve_metrics};
use rustyledger::report::{format_coin_amount, tally, write_csv};
use rustyledger::sync::run_sync;
use rustyledger::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "rustyledger", version)]
#[command(about = "Build and inspect an address balance ledger from a UTXO chain", long_about = None)]
struct Cli {
    /// Config file (TOML); RUSTYLEDGER__SECTION__KEY env vars override it
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk the chain from genesis and build the ledger
    Sync {
        /// Highest block to process (overrides sync.max_height)
        #[arg(long)]
        max_height: Option<u64>,

        /// Skip writing block/transaction/vin/vout records
        #[arg(long, default_value_t = false)]
        no_archive: bool,
    },
    /// Write balances as CSV, largest first
    Tally {
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print ledger totals
    Verify,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_global_config(&cli.config)?;
    let mut settings = Settings::from_config(get_global_config()?)?;

    let _log_guard = init_tracing(settings.logging.clone())?;
    init_metrics()?;

    let result = match cli.command {
        Command::Sync { max_height, no_archive } => {
            if let Some(max_height) = max_height {
                settings.sync.max_height = max_height;
            }
            if no_archive {
                settings.sync.archive = false;
            }
            sync(&settings).await
        }
        Command::Tally { output } => run_tally(&settings, output),
        Command::Verify => verify(&settings),
    };

    if let Err(e) = result {
        error!(error = %e, "rustyledger failed");
        return Err(e.into());
    }
    Ok(())
}

async fn sync(settings: &Settings) -> LedgerResult<()> {
    if let Some(bind) = settings.metrics_bind {
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(bind).await {
                warn!(error = %e, "Metrics endpoint stopped");
            }
        });
    }

    let handles = DbHandles::open(&settings.db_path)?;
    let summary = run_sync(settings, &handles).await?;
    info!(
        final_height = ?summary.final_height,
        chain_height = summary.chain_height,
        blocks = summary.blocks,
        "Sync complete"
    );
    Ok(())
}

fn run_tally(settings: &Settings, output: Option<PathBuf>) -> LedgerResult<()> {
    let handles = DbHandles::open_read_only(&settings.db_path)?;
    let rows = tally(&RocksLedger::new(handles))?;

    let mut out: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };
    write_csv(&mut out, &rows)?;

    if let Some(path) = output {
        info!(rows = rows.len(), path = %path.display(), "Tally written");
    }
    Ok(())
}

fn verify(settings: &Settings) -> LedgerResult<()> {
    let handles = DbHandles::open_read_only(&settings.db_path)?;
    let sync_height = get_sync_height(&handles)?;
    let ledger = RocksLedger::new(handles);
    let balances = ledger.balances()?;
    let total: u64 = balances.iter().map(|(_, b)| *b).sum();

    println!("Ledger at {}", settings.db_path);
    match sync_height {
        Some(h) => println!("  Sync height:  {}", h),
        None => println!("  Sync height:  (none)"),
    }
    println!("  Addresses:    {}", balances.len());
    println!("  Total:        {} ({} sats)", format_coin_amount(total), total);
    Ok(())
}
