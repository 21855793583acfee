/// Ledger-wide constants
///
/// Column family names, unit conversion, and the special heights the driver
/// cares about. Use these instead of magic numbers.

/// Genesis block height (the first block in the chain)
pub const HEIGHT_GENESIS: u64 = 0;

/// Satoshis per whole coin
pub const SATS_PER_COIN: u64 = 100_000_000;

/// Default ceiling for a sync run
pub const DEFAULT_MAX_HEIGHT: u64 = 387;

/// Address -> balance (u64 LE)
pub const CF_LEDGER: &str = "ledger";
/// Run bookkeeping (`sync_height`)
pub const CF_CHAIN_STATE: &str = "chain_state";
/// Archive: height (BE) -> block record
pub const CF_BLOCKS: &str = "blocks";
/// Archive: txid -> transaction record
pub const CF_TRANSACTIONS: &str = "transactions";
/// Archive: txid:index -> input record
pub const CF_VINS: &str = "vins";
/// Archive: txid:index -> output record
pub const CF_VOUTS: &str = "vouts";

pub const COLUMN_FAMILIES: [&str; 6] = [
    CF_LEDGER,
    CF_CHAIN_STATE,
    CF_BLOCKS,
    CF_TRANSACTIONS,
    CF_VINS,
    CF_VOUTS,
];

/// Key in `chain_state` holding the last fully processed height
pub const SYNC_HEIGHT_KEY: &[u8] = b"sync_height";

/// Check if a height is the genesis block
#[inline]
pub fn is_genesis_height(height: u64) -> bool {
    height == HEIGHT_GENESIS
}
