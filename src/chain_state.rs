/// Chain State Tracking
///
/// Records the last height whose ledger deltas were fully applied. This is
/// informational: the UTXO index is not persisted, so a new run always
/// restarts from genesis regardless of what is stored here.

use crate::constants::{CF_CHAIN_STATE, CF_LEDGER, SYNC_HEIGHT_KEY};
use crate::db_handles::DbHandles;
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    /// Last fully applied height, `None` before the first block
    pub sync_height: Option<u64>,
    pub ledger_is_empty: bool,
}

/// Get current chain state
pub fn get_chain_state(handles: &DbHandles) -> LedgerResult<ChainState> {
    let sync_height = get_sync_height(handles)?;

    let cf_ledger = handles.cf(CF_LEDGER)?;
    let ledger_is_empty = handles
        .db()
        .iterator_cf(cf_ledger, rocksdb::IteratorMode::Start)
        .next()
        .is_none();

    Ok(ChainState {
        sync_height,
        ledger_is_empty,
    })
}

pub fn get_sync_height(handles: &DbHandles) -> LedgerResult<Option<u64>> {
    let cf_state = handles.cf(CF_CHAIN_STATE)?;
    match handles.db().get_cf(cf_state, SYNC_HEIGHT_KEY)? {
        Some(bytes) => {
            let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                LedgerError::Storage(format!("corrupt sync_height: {} bytes", bytes.len()))
            })?;
            Ok(Some(u64::from_le_bytes(arr)))
        }
        None => Ok(None),
    }
}

/// Update sync height
pub fn set_sync_height(handles: &DbHandles, height: u64) -> LedgerResult<()> {
    let cf_state = handles.cf(CF_CHAIN_STATE)?;
    handles.db().put_cf(cf_state, SYNC_HEIGHT_KEY, height.to_le_bytes())?;
    Ok(())
}

/// Forget the sync height (ledger reset)
pub fn clear_sync_height(handles: &DbHandles) -> LedgerResult<()> {
    let cf_state = handles.cf(CF_CHAIN_STATE)?;
    handles.db().delete_cf(cf_state, SYNC_HEIGHT_KEY)?;
    Ok(())
}
