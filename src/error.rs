/// Error types for the ledger builder
///
/// Two layers:
/// - `ChainError`: anything that goes wrong talking to the node
/// - `LedgerError`: everything the block processor can surface to its caller
///
/// A `ChainError` on a single `getrawtransaction` call is not fatal; the
/// processor turns it into a skipped transaction. Everywhere else it is
/// wrapped into `LedgerError::Chain` and aborts the run.

use std::fmt;

/// Failure talking to the chain data source
#[derive(Debug)]
pub enum ChainError {
    /// HTTP layer failed (connect, timeout, bad status body)
    Transport(String),
    /// Node answered with a JSON-RPC error object
    Rpc { code: i64, message: String },
    /// Response arrived but did not have the expected shape
    Decode(String),
    /// Response had neither `result` nor `error`
    MissingResult { method: String },
    /// Requested item is not known to the source
    NotFound(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::Transport(s) => write!(f, "transport error: {}", s),
            ChainError::Rpc { code, message } => write!(f, "rpc error {}: {}", code, message),
            ChainError::Decode(s) => write!(f, "decode error: {}", s),
            ChainError::MissingResult { method } => write!(f, "no result in {} response", method),
            ChainError::NotFound(s) => write!(f, "not found: {}", s),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        ChainError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(e: serde_json::Error) -> Self {
        ChainError::Decode(e.to_string())
    }
}

/// Errors surfaced by the ledger builder
#[derive(Debug)]
pub enum LedgerError {
    /// Block-level fetch failed (hash, block, chain height)
    Chain(ChainError),
    /// RocksDB read or write failed
    Storage(String),
    /// Archive record could not be encoded
    Encoding(String),
    /// A delta would drive an address below zero. The UTXO index and the
    /// ledger have diverged from chain truth.
    NegativeBalance {
        address: String,
        balance: u64,
        delta: i64,
    },
    /// Amount from the node is not a finite, non-negative coin value
    InvalidAmount { txid: String, vout: u32, value: f64 },
    /// `process_block` called for something other than the cursor height
    OutOfOrderHeight { expected: u64, got: u64 },
    /// Run would start on top of balances left by a previous run
    LedgerNotEmpty { addresses: usize },
    /// Ledger total does not match the tracked UTXO total
    InvariantViolation { ledger_total: u64, utxo_total: u64 },
    Config(String),
    Io(std::io::Error),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LedgerError::Chain(e) => write!(f, "chain data source: {}", e),
            LedgerError::Storage(s) => write!(f, "storage error: {}", s),
            LedgerError::Encoding(s) => write!(f, "encoding error: {}", s),
            LedgerError::NegativeBalance { address, balance, delta } => write!(
                f,
                "ledger integrity violation: {} has {} sats, delta {} would go negative",
                address, balance, delta
            ),
            LedgerError::InvalidAmount { txid, vout, value } => {
                write!(f, "invalid amount {} at {}:{}", value, txid, vout)
            }
            LedgerError::OutOfOrderHeight { expected, got } => {
                write!(f, "blocks must be processed in order: expected height {}, got {}", expected, got)
            }
            LedgerError::LedgerNotEmpty { addresses } => write!(
                f,
                "ledger already holds {} addresses; reset it or enable sync.reset_ledger",
                addresses
            ),
            LedgerError::InvariantViolation { ledger_total, utxo_total } => write!(
                f,
                "ledger total {} sats does not match tracked utxo total {} sats",
                ledger_total, utxo_total
            ),
            LedgerError::Config(s) => write!(f, "config error: {}", s),
            LedgerError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<ChainError> for LedgerError {
    fn from(e: ChainError) -> Self {
        LedgerError::Chain(e)
    }
}

impl From<rocksdb::Error> for LedgerError {
    fn from(e: rocksdb::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(e: bincode::Error) -> Self {
        LedgerError::Encoding(e.to_string())
    }
}

impl From<csv::Error> for LedgerError {
    fn from(e: csv::Error) -> Self {
        LedgerError::Encoding(e.to_string())
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(e: config::ConfigError) -> Self {
        LedgerError::Config(e.to_string())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::Io(e)
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
