/// Block Processor
///
/// Walks the chain from genesis, one height at a time, and folds every
/// transaction into the address ledger:
///
/// 1. fetch phase: block hash, txid list, then each transaction record
/// 2. apply phase: for each transaction in block order
///    - resolve inputs against the UTXO index (removing what they spend)
///    - deduct every resolved spend
///    - credit every output and register it in the UTXO index
///
/// The apply phase is strictly serial. A later transaction in a block may
/// spend an output created by an earlier one, so the index must already
/// hold that output when the later transaction is resolved.
///
/// A transaction the node cannot return is skipped whole (no spends, no
/// outputs) and reported as `TxOutcome::Skipped`. Everything else that goes
/// wrong is fatal and aborts the run.

use tracing::{debug, info, warn};

use crate::archive::{ArchiveSink, BlockRecord, InputRecord, OutputRecord, TransactionRecord};
use crate::constants::is_genesis_height;
use crate::error::{ChainError, LedgerError, LedgerResult};
use crate::ledger::{apply_delta, LedgerStore};
use crate::metrics;
use crate::rpc::ChainSource;
use crate::telemetry::{truncate_hex, ProgressCounter};
use crate::types::{output_sats, Outpoint, RpcTransaction, UtxoEntry};
use crate::utxo::{MemoryUtxoIndex, UtxoIndex};

/// What to do with an output that has no resolvable address
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UnresolvedOutputPolicy {
    /// Value is not credited anywhere and the output is not indexed
    #[default]
    Untracked,
    /// Value is credited to this synthetic address, which also owns the
    /// indexed output so a later spend deducts it again
    Bucket(String),
}

/// A transaction as returned by the fetch phase
#[derive(Debug)]
pub struct FetchedTx {
    pub txid: String,
    pub result: Result<RpcTransaction, ChainError>,
}

/// Everything the apply phase needs for one height
#[derive(Debug)]
pub struct FetchedBlock {
    pub height: u64,
    pub hash: String,
    pub time: u64,
    pub transactions: Vec<FetchedTx>,
}

/// Effect of one applied transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSummary {
    pub txid: String,
    pub is_coinbase: bool,
    /// Outpoints consumed from the index, with the owner that was debited
    pub spent: Vec<(Outpoint, UtxoEntry)>,
    /// Inputs naming a previous transaction whose outpoint was missing or
    /// not in the index
    pub unresolved_inputs: usize,
    /// Outputs registered in the index
    pub outputs_indexed: usize,
    /// Outputs with no address left untracked
    pub outputs_untracked: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTx {
    pub txid: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Applied(TxSummary),
    Skipped(SkippedTx),
}

#[derive(Debug, Clone)]
pub struct BlockReport {
    pub height: u64,
    pub hash: String,
    pub outcomes: Vec<TxOutcome>,
}

impl BlockReport {
    pub fn applied(&self) -> impl Iterator<Item = &TxSummary> {
        self.outcomes.iter().filter_map(|o| match o {
            TxOutcome::Applied(s) => Some(s),
            TxOutcome::Skipped(_) => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &SkippedTx> {
        self.outcomes.iter().filter_map(|o| match o {
            TxOutcome::Skipped(s) => Some(s),
            TxOutcome::Applied(_) => None,
        })
    }

    pub fn applied_count(&self) -> usize {
        self.applied().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped().count()
    }

    pub fn unresolved_inputs(&self) -> usize {
        self.applied().map(|s| s.unresolved_inputs).sum()
    }
}

/// Totals for a whole `run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub chain_height: u64,
    pub ceiling: u64,
    /// Last height applied in this run
    pub final_height: Option<u64>,
    pub blocks: u64,
    pub transactions_applied: u64,
    pub transactions_skipped: u64,
    pub unresolved_inputs: u64,
}

impl RunSummary {
    fn absorb(&mut self, report: &BlockReport) {
        self.final_height = Some(report.height);
        self.blocks += 1;
        self.transactions_applied += report.applied_count() as u64;
        self.transactions_skipped += report.skipped_count() as u64;
        self.unresolved_inputs += report.unresolved_inputs() as u64;
    }
}

/// Ledger size after a consistency check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerTotals {
    pub addresses: usize,
    pub total_sats: u64,
    pub utxos: usize,
}

fn spend_delta(value: u64) -> LedgerResult<i64> {
    i64::try_from(value)
        .map(|v| -v)
        .map_err(|_| LedgerError::Storage(format!("value {} exceeds delta range", value)))
}

fn credit_delta(value: u64) -> LedgerResult<i64> {
    i64::try_from(value).map_err(|_| LedgerError::Storage(format!("value {} exceeds delta range", value)))
}

pub struct BlockProcessor<C, L, U = MemoryUtxoIndex> {
    chain: C,
    ledger: L,
    utxos: U,
    archive: Option<Box<dyn ArchiveSink + Send>>,
    unresolved_policy: UnresolvedOutputPolicy,
    next_height: u64,
    progress: ProgressCounter,
}

impl<C: ChainSource, L: LedgerStore> BlockProcessor<C, L, MemoryUtxoIndex> {
    /// Processor with a fresh in-memory UTXO index
    pub fn new(chain: C, ledger: L) -> Self {
        Self::with_index(chain, ledger, MemoryUtxoIndex::new())
    }
}

impl<C: ChainSource, L: LedgerStore, U: UtxoIndex> BlockProcessor<C, L, U> {
    pub fn with_index(chain: C, ledger: L, utxos: U) -> Self {
        Self {
            chain,
            ledger,
            utxos,
            archive: None,
            unresolved_policy: UnresolvedOutputPolicy::default(),
            next_height: 0,
            progress: ProgressCounter::new(1000),
        }
    }

    pub fn with_archive(mut self, archive: Box<dyn ArchiveSink + Send>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_unresolved_policy(mut self, policy: UnresolvedOutputPolicy) -> Self {
        self.unresolved_policy = policy;
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress = ProgressCounter::new(interval);
        self
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn utxos(&self) -> &U {
        &self.utxos
    }

    /// Direct access to the index, for seeding it from another store
    pub fn utxos_mut(&mut self) -> &mut U {
        &mut self.utxos
    }

    /// Next height `process_block` will accept
    pub fn next_height(&self) -> u64 {
        self.next_height
    }

    pub fn into_ledger(self) -> L {
        self.ledger
    }

    /// Make sure the run starts from a clean slate.
    ///
    /// The UTXO index is empty at startup, so balances left by an earlier
    /// run cannot be reconciled with it. Either clear them or refuse.
    pub fn prepare(&mut self, reset_ledger: bool) -> LedgerResult<()> {
        let existing = self.ledger.address_count()?;
        if existing == 0 {
            return Ok(());
        }
        if !reset_ledger {
            return Err(LedgerError::LedgerNotEmpty { addresses: existing });
        }

        warn!(addresses = existing, "Clearing balances left by a previous run");
        self.ledger.clear()?;
        self.utxos.clear();
        self.next_height = 0;
        Ok(())
    }

    /// Fetch phase: block hash, txid list, then every transaction record.
    ///
    /// Per-transaction failures are kept in the result; block-level
    /// failures are returned as errors.
    pub async fn fetch_block(&self, height: u64) -> LedgerResult<FetchedBlock> {
        let hash = self.chain.block_hash(height).await?;
        let block = self.chain.block(&hash).await?;

        let mut transactions = Vec::with_capacity(block.tx.len());
        for txid in block.tx {
            let result = self.chain.transaction(&txid).await;
            transactions.push(FetchedTx { txid, result });
        }

        Ok(FetchedBlock {
            height,
            hash,
            time: block.time,
            transactions,
        })
    }

    /// Apply phase for one block.
    ///
    /// Does not check or advance the cursor; callers other than
    /// `process_block` are responsible for calling this once per height in
    /// order. Applying the same block twice double-counts its outputs.
    pub fn apply_block(&mut self, block: FetchedBlock) -> LedgerResult<BlockReport> {
        let timer = metrics::Timer::new();
        let mut outcomes = Vec::with_capacity(block.transactions.len());
        let mut records = Vec::with_capacity(block.transactions.len());

        for fetched in block.transactions {
            match fetched.result {
                Ok(tx) => {
                    let (summary, record) = self.apply_transaction(block.height, &tx)?;
                    outcomes.push(TxOutcome::Applied(summary));
                    records.push(record);
                }
                Err(e) => {
                    warn!(
                        height = block.height,
                        txid = %truncate_hex(&fetched.txid, 16),
                        genesis = is_genesis_height(block.height),
                        error = %e,
                        "Failed to get raw transaction, skipping"
                    );
                    outcomes.push(TxOutcome::Skipped(SkippedTx {
                        txid: fetched.txid,
                        reason: e.to_string(),
                    }));
                }
            }
        }

        if let Some(archive) = self.archive.as_mut() {
            archive.record_block(&BlockRecord {
                height: block.height,
                hash: block.hash.clone(),
                time: block.time,
                transactions: records,
            })?;
        }

        let report = BlockReport {
            height: block.height,
            hash: block.hash,
            outcomes,
        };

        metrics::record_block_apply_duration("apply", timer.elapsed_secs());
        metrics::increment_blocks_processed();
        metrics::increment_transactions("applied", report.applied_count() as u64);
        metrics::increment_transactions("skipped", report.skipped_count() as u64);
        metrics::set_indexed_height(report.height);
        metrics::set_total_utxos_tracked(self.utxos.len());

        Ok(report)
    }

    /// Resolve one transaction against the index and apply its deltas.
    ///
    /// Delta order: every deduction, then every credit.
    pub fn apply_transaction(
        &mut self,
        height: u64,
        tx: &RpcTransaction,
    ) -> LedgerResult<(TxSummary, TransactionRecord)> {
        let is_coinbase = tx.is_coinbase();

        // Validate amounts before touching any state
        let values = tx
            .vout
            .iter()
            .enumerate()
            .map(|(index, vout)| output_sats(&tx.txid, index as u32, vout.value))
            .collect::<LedgerResult<Vec<u64>>>()?;

        let inputs: Vec<InputRecord> = tx
            .vin
            .iter()
            .enumerate()
            .map(|(index, vin)| InputRecord {
                index: index as u32,
                prevout: vin.prevout(),
            })
            .collect();

        let mut spent = Vec::new();
        let mut unresolved_inputs = 0;
        if !is_coinbase {
            // Inputs that name a previous transaction; one without a vout
            // cannot be resolved
            let references = tx
                .vin
                .iter()
                .zip(&inputs)
                .filter(|(vin, _)| vin.txid.is_some())
                .map(|(_, input)| input.prevout.as_ref());

            for prevout in references {
                match prevout.and_then(|op| self.utxos.remove(op).map(|entry| (op, entry))) {
                    Some((op, entry)) => spent.push((op.clone(), entry)),
                    None => {
                        unresolved_inputs += 1;
                        debug!(
                            txid = %truncate_hex(&tx.txid, 16),
                            prevout = ?prevout.map(|op| op.to_string()),
                            "Input not in UTXO index, ignoring"
                        );
                    }
                }
            }
        }

        for (_, entry) in &spent {
            apply_delta(&mut self.ledger, &entry.address, spend_delta(entry.value)?)?;
        }

        let mut outputs = Vec::with_capacity(tx.vout.len());
        let mut outputs_indexed = 0;
        let mut outputs_untracked = 0;
        for ((index, vout), value) in tx.vout.iter().enumerate().zip(values) {
            let index = index as u32;
            let addresses = vout.addresses();

            let owner = match addresses.first() {
                Some(first) => {
                    for address in &addresses {
                        apply_delta(&mut self.ledger, address, credit_delta(value)?)?;
                    }
                    Some(first.clone())
                }
                None => match &self.unresolved_policy {
                    UnresolvedOutputPolicy::Untracked => {
                        metrics::increment_addressless_outputs("untracked");
                        outputs_untracked += 1;
                        None
                    }
                    UnresolvedOutputPolicy::Bucket(bucket) => {
                        metrics::increment_addressless_outputs("bucket");
                        apply_delta(&mut self.ledger, bucket, credit_delta(value)?)?;
                        Some(bucket.clone())
                    }
                },
            };

            if let Some(address) = owner {
                self.utxos
                    .insert(Outpoint::new(tx.txid.clone(), index), UtxoEntry { address, value });
                outputs_indexed += 1;
            }

            outputs.push(OutputRecord {
                index,
                addresses,
                amount_sats: value,
            });
        }

        metrics::increment_utxos_spent(spent.len() as u64);
        metrics::increment_utxos_added(outputs_indexed as u64);
        metrics::increment_unresolved_inputs(unresolved_inputs as u64);

        let summary = TxSummary {
            txid: tx.txid.clone(),
            is_coinbase,
            spent,
            unresolved_inputs,
            outputs_indexed,
            outputs_untracked,
        };
        let record = TransactionRecord {
            txid: tx.txid.clone(),
            block_height: height,
            is_coinbase,
            inputs,
            outputs,
        };
        Ok((summary, record))
    }

    /// Fetch and apply the block at `height`, which must be the cursor
    pub async fn process_block(&mut self, height: u64) -> LedgerResult<BlockReport> {
        if height != self.next_height {
            return Err(LedgerError::OutOfOrderHeight {
                expected: self.next_height,
                got: height,
            });
        }

        let fetched = self.fetch_block(height).await?;
        let report = self.apply_block(fetched)?;
        self.next_height = height + 1;

        info!(
            height = height,
            hash = %truncate_hex(&report.hash, 16),
            txs = report.applied_count(),
            skipped = report.skipped_count(),
            "Processed block"
        );

        if self.progress.should_log() {
            info!(
                height = height,
                utxos = self.utxos.len(),
                tracked_sats = self.utxos.total_value(),
                "Ledger progress"
            );
        }

        Ok(report)
    }

    /// Walk from the cursor up to `min(chain height, target_height)`
    pub async fn run(&mut self, target_height: u64) -> LedgerResult<RunSummary> {
        self.run_with(target_height, |_| Ok(())).await
    }

    /// `run`, calling `on_block` after each fully applied block
    pub async fn run_with<F>(&mut self, target_height: u64, mut on_block: F) -> LedgerResult<RunSummary>
    where
        F: FnMut(&BlockReport) -> LedgerResult<()>,
    {
        let chain_height = self.chain.chain_height().await?;
        let ceiling = chain_height.min(target_height);
        metrics::set_chain_tip_height("rpc", chain_height);
        metrics::set_chain_tip_height("target", ceiling);
        info!(chain_height = chain_height, ceiling = ceiling, "Processing up to height");

        let mut summary = RunSummary {
            chain_height,
            ceiling,
            ..RunSummary::default()
        };

        for height in self.next_height..=ceiling {
            let report = self.process_block(height).await?;
            summary.absorb(&report);
            on_block(&report)?;
        }

        info!(
            final_height = ?summary.final_height,
            blocks = summary.blocks,
            applied = summary.transactions_applied,
            skipped = summary.transactions_skipped,
            unresolved_inputs = summary.unresolved_inputs,
            "Ledger built"
        );
        Ok(summary)
    }

    /// Check that the ledger total equals the tracked UTXO total.
    ///
    /// Holds between blocks when processing started at genesis, no
    /// transaction was skipped and no tracked output listed more than one
    /// address.
    pub fn verify_ledger(&self) -> LedgerResult<LedgerTotals> {
        let balances = self.ledger.balances()?;
        let total_sats: u64 = balances.iter().map(|(_, b)| *b).sum();
        let utxo_total = self.utxos.total_value();

        metrics::set_ledger_addresses(balances.len());

        if total_sats != utxo_total {
            metrics::increment_invariant_violations("total_mismatch");
            return Err(LedgerError::InvariantViolation {
                ledger_total: total_sats,
                utxo_total,
            });
        }

        Ok(LedgerTotals {
            addresses: balances.len(),
            total_sats,
            utxos: self.utxos.len(),
        })
    }
}
