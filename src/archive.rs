/// Block Archive
///
/// Insert-only history written next to the ledger: one record per block,
/// transaction, input and output. Nothing in the ledger path reads it back;
/// it exists so the full history can be queried independently of balances.
///
/// Every block is committed in a single RocksDB `WriteBatch`, so a block is
/// either fully archived or not at all.
///
/// Layout:
/// - `blocks`:       height (u64 BE)   -> BlockHeaderRecord
/// - `transactions`: txid              -> TransactionRecord
/// - `vins`:         "txid:index"      -> InputRecord
/// - `vouts`:        "txid:index"      -> OutputRecord

use serde::{Deserialize, Serialize};
use rocksdb::WriteBatch;
use tracing::debug;

use crate::constants::{CF_BLOCKS, CF_TRANSACTIONS, CF_VINS, CF_VOUTS};
use crate::db_handles::DbHandles;
use crate::error::{LedgerError, LedgerResult};
use crate::metrics;
use crate::types::Outpoint;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub height: u64,
    pub hash: String,
    pub time: u64,
    pub transactions: Vec<TransactionRecord>,
}

/// Stored value in `blocks`; transactions live in their own family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeaderRecord {
    pub hash: String,
    pub time: u64,
    pub tx_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub txid: String,
    pub block_height: u64,
    pub is_coinbase: bool,
    pub inputs: Vec<InputRecord>,
    pub outputs: Vec<OutputRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    pub index: u32,
    /// `None` for a coinbase input
    pub prevout: Option<Outpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub index: u32,
    /// Empty for non-standard outputs
    pub addresses: Vec<String>,
    pub amount_sats: u64,
}

/// Receiver for per-block history
pub trait ArchiveSink {
    fn record_block(&mut self, record: &BlockRecord) -> LedgerResult<()>;
}

/// Collects records in memory
impl ArchiveSink for Vec<BlockRecord> {
    fn record_block(&mut self, record: &BlockRecord) -> LedgerResult<()> {
        self.push(record.clone());
        Ok(())
    }
}

fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

fn io_key(txid: &str, index: u32) -> Vec<u8> {
    format!("{}:{}", txid, index).into_bytes()
}

/// RocksDB-backed archive
pub struct RocksArchive {
    handles: DbHandles,
}

impl RocksArchive {
    pub fn new(handles: DbHandles) -> Self {
        Self { handles }
    }

    pub fn get_block(&self, height: u64) -> LedgerResult<Option<BlockHeaderRecord>> {
        self.get(CF_BLOCKS, &height_key(height))
    }

    pub fn get_transaction(&self, txid: &str) -> LedgerResult<Option<TransactionRecord>> {
        self.get(CF_TRANSACTIONS, txid.as_bytes())
    }

    pub fn get_input(&self, txid: &str, index: u32) -> LedgerResult<Option<InputRecord>> {
        self.get(CF_VINS, &io_key(txid, index))
    }

    pub fn get_output(&self, txid: &str, index: u32) -> LedgerResult<Option<OutputRecord>> {
        self.get(CF_VOUTS, &io_key(txid, index))
    }

    fn get<T: for<'de> Deserialize<'de>>(&self, cf_name: &str, key: &[u8]) -> LedgerResult<Option<T>> {
        let cf = self.handles.cf(cf_name)?;
        match self.handles.db().get_cf(cf, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl ArchiveSink for RocksArchive {
    fn record_block(&mut self, record: &BlockRecord) -> LedgerResult<()> {
        let cf_blocks = self.handles.cf(CF_BLOCKS)?;
        let cf_transactions = self.handles.cf(CF_TRANSACTIONS)?;
        let cf_vins = self.handles.cf(CF_VINS)?;
        let cf_vouts = self.handles.cf(CF_VOUTS)?;

        let mut batch = WriteBatch::default();

        let header = BlockHeaderRecord {
            hash: record.hash.clone(),
            time: record.time,
            tx_count: record.transactions.len() as u32,
        };
        batch.put_cf(cf_blocks, height_key(record.height), bincode::serialize(&header)?);

        for tx in &record.transactions {
            batch.put_cf(cf_transactions, tx.txid.as_bytes(), bincode::serialize(tx)?);
            for input in &tx.inputs {
                batch.put_cf(cf_vins, io_key(&tx.txid, input.index), bincode::serialize(input)?);
            }
            for output in &tx.outputs {
                batch.put_cf(cf_vouts, io_key(&tx.txid, output.index), bincode::serialize(output)?);
            }
        }

        let ops = batch.len();
        self.handles.db().write(batch).map_err(|e| {
            metrics::increment_db_errors("write", CF_BLOCKS);
            LedgerError::from(e)
        })?;

        debug!(height = record.height, ops = ops, "Archived block");
        Ok(())
    }
}
