use std::path::Path;
use std::sync::Arc;
use rocksdb::{ColumnFamilyDescriptor, Options, DB};

use crate::constants::COLUMN_FAMILIES;
use crate::error::{LedgerError, LedgerResult};

/// Shared RocksDB handle with validated column families
///
/// Every store in the crate (ledger, chain state, archive) hangs off the
/// same database so a tally run can open one path and see everything.
#[derive(Clone)]
pub struct DbHandles {
    db: Arc<DB>,
}

impl DbHandles {
    /// Open (or create) the database at `path` with all column families
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let mut cf_descriptors = vec![ColumnFamilyDescriptor::new("default", Options::default())];
        for cf in COLUMN_FAMILIES.iter() {
            cf_descriptors.push(ColumnFamilyDescriptor::new(cf.to_string(), Options::default()));
        }

        let mut db_options = Options::default();
        db_options.create_if_missing(true);
        db_options.create_missing_column_families(true);

        let db = DB::open_cf_descriptors(&db_options, path, cf_descriptors)?;
        Self::new(Arc::new(db))
    }

    /// Open an existing database without write access (tally, verify)
    pub fn open_read_only(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let mut cf_names = vec!["default"];
        cf_names.extend(COLUMN_FAMILIES.iter());

        let opts = Options::default();
        let db = DB::open_cf_for_read_only(&opts, path, &cf_names, false)?;
        Self::new(Arc::new(db))
    }

    /// Wrap an already-open database
    ///
    /// Validates that all required column families exist
    pub fn new(db: Arc<DB>) -> LedgerResult<Self> {
        for cf_name in COLUMN_FAMILIES {
            if db.cf_handle(cf_name).is_none() {
                return Err(LedgerError::Storage(format!("{} column family not found", cf_name)));
            }
        }

        Ok(Self { db })
    }

    /// Get database reference
    pub fn db(&self) -> &Arc<DB> {
        &self.db
    }

    /// Column family handle, already validated at construction
    pub fn cf(&self, name: &str) -> LedgerResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::Storage(format!("{} column family not found", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_all_column_families() {
        let temp_dir = TempDir::new().unwrap();
        let handles = DbHandles::open(temp_dir.path()).unwrap();
        for cf in COLUMN_FAMILIES {
            assert!(handles.cf(cf).is_ok(), "missing {}", cf);
        }
    }

    #[test]
    fn test_new_rejects_missing_column_family() {
        let temp_dir = TempDir::new().unwrap();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, temp_dir.path()).unwrap();

        assert!(matches!(DbHandles::new(Arc::new(db)), Err(LedgerError::Storage(_))));
    }
}
