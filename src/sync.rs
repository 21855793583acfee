/// Sync Service - builds the ledger from a live node
///
/// Wires the RPC chain source, the RocksDB ledger and (optionally) the
/// archive into a `BlockProcessor`, then walks from genesis up to
/// `min(chain height, sync.max_height)`.
///
/// The UTXO index lives in memory only, so every run starts at genesis.
/// `sync_height` in `chain_state` is updated after each block so a tally
/// taken mid-run can tell how far the ledger got.

use tracing::{info, warn};

use crate::archive::RocksArchive;
use crate::chain_state::{clear_sync_height, get_chain_state, set_sync_height};
use crate::config::Settings;
use crate::db_handles::DbHandles;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::RocksLedger;
use crate::processor::{BlockProcessor, RunSummary};
use crate::rpc::RpcChainSource;

pub async fn run_sync(settings: &Settings, handles: &DbHandles) -> LedgerResult<RunSummary> {
    let state = get_chain_state(handles)?;
    info!(
        previous_sync_height = ?state.sync_height,
        ledger_is_empty = state.ledger_is_empty,
        max_height = settings.sync.max_height,
        archive = settings.sync.archive,
        "Starting ledger build"
    );

    let chain = RpcChainSource::new(&settings.rpc)?;
    let mut processor = BlockProcessor::new(chain, RocksLedger::new(handles.clone()))
        .with_unresolved_policy(settings.sync.unresolved_outputs.clone())
        .with_progress_interval(settings.sync.progress_interval);
    if settings.sync.archive {
        processor = processor.with_archive(Box::new(RocksArchive::new(handles.clone())));
    }

    processor.prepare(settings.sync.reset_ledger)?;
    if state.sync_height.is_some() {
        clear_sync_height(handles)?;
    }

    let summary = processor
        .run_with(settings.sync.max_height, |report| set_sync_height(handles, report.height))
        .await?;

    if settings.sync.verify_on_finish {
        match processor.verify_ledger() {
            Ok(totals) => info!(
                addresses = totals.addresses,
                total_sats = totals.total_sats,
                utxos = totals.utxos,
                "Ledger total matches UTXO index"
            ),
            // Skipped transactions and multi-address outputs both break the
            // equality without the ledger being wrong about what it saw
            Err(LedgerError::InvariantViolation { ledger_total, utxo_total }) => warn!(
                ledger_total = ledger_total,
                utxo_total = utxo_total,
                skipped = summary.transactions_skipped,
                unresolved_inputs = summary.unresolved_inputs,
                "Ledger total differs from UTXO index"
            ),
            Err(e) => return Err(e),
        }
    }

    Ok(summary)
}
