/// Address Balance Ledger
///
/// Durable address -> balance table plus the balance updater that keeps it
/// honest:
/// - a row never holds 0 (absence means 0)
/// - a balance never goes negative; trying to is a fatal integrity error
///
/// `RocksLedger` is the production store (`ledger` column family, value is
/// the balance as u64 little-endian). `MemoryLedger` backs the tests.

use std::collections::BTreeMap;
use rocksdb::IteratorMode;
use tracing::{debug, error};

use crate::constants::CF_LEDGER;
use crate::db_handles::DbHandles;
use crate::error::{LedgerError, LedgerResult};
use crate::metrics;

/// Point-access address -> balance store
pub trait LedgerStore {
    fn get(&self, address: &str) -> LedgerResult<Option<u64>>;

    fn upsert(&mut self, address: &str, balance: u64) -> LedgerResult<()>;

    fn delete(&mut self, address: &str) -> LedgerResult<()>;

    /// Every row, in key order
    fn balances(&self) -> LedgerResult<Vec<(String, u64)>>;

    /// Drop every row
    fn clear(&mut self) -> LedgerResult<()>;

    fn address_count(&self) -> LedgerResult<usize> {
        Ok(self.balances()?.len())
    }

    fn total_balance(&self) -> LedgerResult<u64> {
        Ok(self.balances()?.iter().map(|(_, b)| *b).sum())
    }
}

/// What `apply_delta` did to the row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    Inserted(u64),
    Updated { from: u64, to: u64 },
    Deleted { from: u64 },
    /// Zero delta against an absent row
    Unchanged,
}

/// Apply a signed satoshi delta to one address.
///
/// Read-modify-write on a single row. A result of 0 deletes the row; a
/// negative result returns `NegativeBalance` and leaves the row untouched.
pub fn apply_delta<L: LedgerStore + ?Sized>(
    ledger: &mut L,
    address: &str,
    delta: i64,
) -> LedgerResult<BalanceChange> {
    let current = ledger.get(address)?;
    let balance = current.unwrap_or(0);
    let next = balance as i128 + delta as i128;

    if next < 0 {
        error!(
            address = address,
            balance = balance,
            delta = delta,
            "Balance would go negative"
        );
        metrics::increment_invariant_violations("negative_balance");
        return Err(LedgerError::NegativeBalance {
            address: address.to_string(),
            balance,
            delta,
        });
    }
    if next > u64::MAX as i128 {
        return Err(LedgerError::Storage(format!("balance overflow for {}", address)));
    }
    let next = next as u64;

    let change = match (current, next) {
        (None, 0) => BalanceChange::Unchanged,
        (Some(from), 0) => {
            ledger.delete(address)?;
            BalanceChange::Deleted { from }
        }
        (None, to) => {
            ledger.upsert(address, to)?;
            BalanceChange::Inserted(to)
        }
        (Some(from), to) => {
            ledger.upsert(address, to)?;
            BalanceChange::Updated { from, to }
        }
    };

    debug!(address = address, delta = delta, change = ?change, "Balance updated");
    Ok(change)
}

fn encode_balance(balance: u64) -> [u8; 8] {
    balance.to_le_bytes()
}

fn decode_balance(address: &str, bytes: &[u8]) -> LedgerResult<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| {
        LedgerError::Storage(format!(
            "corrupt balance for {}: expected 8 bytes, got {}",
            address,
            bytes.len()
        ))
    })?;
    Ok(u64::from_le_bytes(arr))
}

/// RocksDB-backed ledger
#[derive(Clone)]
pub struct RocksLedger {
    handles: DbHandles,
}

impl RocksLedger {
    pub fn new(handles: DbHandles) -> Self {
        Self { handles }
    }
}

impl LedgerStore for RocksLedger {
    fn get(&self, address: &str) -> LedgerResult<Option<u64>> {
        let cf = self.handles.cf(CF_LEDGER)?;
        match self.handles.db().get_cf(cf, address.as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(decode_balance(address, &bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => {
                metrics::increment_db_errors("get", CF_LEDGER);
                Err(e.into())
            }
        }
    }

    fn upsert(&mut self, address: &str, balance: u64) -> LedgerResult<()> {
        let cf = self.handles.cf(CF_LEDGER)?;
        self.handles
            .db()
            .put_cf(cf, address.as_bytes(), encode_balance(balance))
            .map_err(|e| {
                metrics::increment_db_errors("put", CF_LEDGER);
                e.into()
            })
    }

    fn delete(&mut self, address: &str) -> LedgerResult<()> {
        let cf = self.handles.cf(CF_LEDGER)?;
        self.handles
            .db()
            .delete_cf(cf, address.as_bytes())
            .map_err(|e| {
                metrics::increment_db_errors("delete", CF_LEDGER);
                e.into()
            })
    }

    fn balances(&self) -> LedgerResult<Vec<(String, u64)>> {
        let cf = self.handles.cf(CF_LEDGER)?;
        let mut rows = Vec::new();
        for item in self.handles.db().iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| {
                metrics::increment_db_errors("iterator", CF_LEDGER);
                LedgerError::from(e)
            })?;
            let address = String::from_utf8_lossy(&key).into_owned();
            let balance = decode_balance(&address, &value)?;
            rows.push((address, balance));
        }
        Ok(rows)
    }

    fn clear(&mut self) -> LedgerResult<()> {
        let cf = self.handles.cf(CF_LEDGER)?;
        let mut batch = rocksdb::WriteBatch::default();
        for item in self.handles.db().iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(cf, key);
        }
        self.handles.db().write(batch)?;
        Ok(())
    }
}

/// In-memory ledger
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    rows: BTreeMap<String, u64>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedger {
    fn get(&self, address: &str) -> LedgerResult<Option<u64>> {
        Ok(self.rows.get(address).copied())
    }

    fn upsert(&mut self, address: &str, balance: u64) -> LedgerResult<()> {
        self.rows.insert(address.to_string(), balance);
        Ok(())
    }

    fn delete(&mut self, address: &str) -> LedgerResult<()> {
        self.rows.remove(address);
        Ok(())
    }

    fn balances(&self) -> LedgerResult<Vec<(String, u64)>> {
        Ok(self.rows.iter().map(|(a, b)| (a.clone(), *b)).collect())
    }

    fn clear(&mut self) -> LedgerResult<()> {
        self.rows.clear();
        Ok(())
    }

    fn address_count(&self) -> LedgerResult<usize> {
        Ok(self.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rocks_ledger() -> (RocksLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let handles = DbHandles::open(temp_dir.path()).unwrap();
        (RocksLedger::new(handles), temp_dir)
    }

    #[test]
    fn test_apply_delta_insert_update_delete() {
        let mut ledger = MemoryLedger::new();

        assert_eq!(apply_delta(&mut ledger, "DA", 100).unwrap(), BalanceChange::Inserted(100));
        assert_eq!(
            apply_delta(&mut ledger, "DA", -40).unwrap(),
            BalanceChange::Updated { from: 100, to: 60 }
        );
        assert_eq!(apply_delta(&mut ledger, "DA", -60).unwrap(), BalanceChange::Deleted { from: 60 });

        // Zero balance means no row at all
        assert_eq!(ledger.get("DA").unwrap(), None);
        assert_eq!(ledger.address_count().unwrap(), 0);
    }

    #[test]
    fn test_apply_zero_delta_to_absent_row_writes_nothing() {
        let mut ledger = MemoryLedger::new();
        assert_eq!(apply_delta(&mut ledger, "DA", 0).unwrap(), BalanceChange::Unchanged);
        assert!(ledger.balances().unwrap().is_empty());
    }

    #[test]
    fn test_negative_balance_is_fatal_and_leaves_row() {
        let mut ledger = MemoryLedger::new();
        apply_delta(&mut ledger, "DA", 10).unwrap();

        let err = apply_delta(&mut ledger, "DA", -11).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::NegativeBalance { ref address, balance: 10, delta: -11 } if address == "DA"
        ));
        assert_eq!(ledger.get("DA").unwrap(), Some(10));

        // Spending from an address the ledger never saw is the same violation
        assert!(matches!(
            apply_delta(&mut ledger, "DNobody", -1),
            Err(LedgerError::NegativeBalance { balance: 0, .. })
        ));
        assert_eq!(ledger.get("DNobody").unwrap(), None);
    }

    #[test]
    fn test_rocks_ledger_roundtrip_and_pruning() {
        let (mut ledger, _temp_dir) = rocks_ledger();

        apply_delta(&mut ledger, "DA", 5_000_000_000).unwrap();
        apply_delta(&mut ledger, "DB", 7).unwrap();
        assert_eq!(ledger.get("DA").unwrap(), Some(5_000_000_000));
        assert_eq!(ledger.total_balance().unwrap(), 5_000_000_007);

        apply_delta(&mut ledger, "DB", -7).unwrap();
        assert_eq!(ledger.get("DB").unwrap(), None);
        assert_eq!(ledger.balances().unwrap(), vec![("DA".to_string(), 5_000_000_000)]);
    }

    #[test]
    fn test_rocks_ledger_clear() {
        let (mut ledger, _temp_dir) = rocks_ledger();
        ledger.upsert("DA", 1).unwrap();
        ledger.upsert("DB", 2).unwrap();

        ledger.clear().unwrap();
        assert_eq!(ledger.address_count().unwrap(), 0);
    }

    #[test]
    fn test_rocks_ledger_rejects_corrupt_row() {
        let (ledger, _temp_dir) = rocks_ledger();
        let cf = ledger.handles.cf(CF_LEDGER).unwrap();
        ledger.handles.db().put_cf(cf, b"DBad", b"xyz").unwrap();

        assert!(matches!(ledger.get("DBad"), Err(LedgerError::Storage(_))));
    }
}
