//! Database handle and transactions.
//!
//! A [`Store`] owns one redb database with a single ordered byte-keyed table
//! holding every record of every shard core. Cores never touch redb directly;
//! they go through [`RwTxn`]/[`RoTxn`] and the typed helpers in
//! [`crate::tables`].
//!
//! redb cannot mutate a table underneath an open range iterator, so scans
//! materialize a bounded page of pairs before the caller resumes writing.
//! Every scanning caller in the cores already carries a page size or GC
//! budget, which becomes the scan limit.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use redb::Database;
use redb::ReadableTable;
use redb::TableDefinition;
use snafu::ResultExt;
use snafu::Snafu;

use crate::keys;

/// All records live in one ordered table; the 2-byte table identifier leading
/// every key partitions it logically.
const RECORDS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");

/// How many keys `clear_range` materializes per sweep.
const CLEAR_RANGE_BATCH: usize = 1024;

/// Errors that can occur during store operations.
///
/// `NotFound` is the only variant callers branch on; everything else is fatal
/// to the apply loop.
#[derive(Debug, Snafu)]
pub enum StoreError {
    /// The requested key does not exist.
    #[snafu(display("key not found"))]
    NotFound,

    /// Failed to open the database.
    #[snafu(display("failed to open database at {}: {source}", path.display()))]
    OpenDatabase {
        path: PathBuf,
        #[snafu(source(from(redb::DatabaseError, Box::new)))]
        source: Box<redb::DatabaseError>,
    },

    /// Failed to begin a transaction.
    #[snafu(display("failed to begin transaction: {source}"))]
    BeginTransaction {
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
    },

    /// Failed to open the records table.
    #[snafu(display("failed to open table: {source}"))]
    OpenTable {
        #[snafu(source(from(redb::TableError, Box::new)))]
        source: Box<redb::TableError>,
    },

    /// Failed to commit a transaction.
    #[snafu(display("failed to commit transaction: {source}"))]
    Commit {
        #[snafu(source(from(redb::CommitError, Box::new)))]
        source: Box<redb::CommitError>,
    },

    /// A read or write against the records table failed.
    #[snafu(display("storage operation failed: {source}"))]
    Storage {
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    /// Failed to encode a record for storage.
    #[snafu(display("failed to encode record: {source}"))]
    Encode {
        #[snafu(source(from(bincode::Error, Box::new)))]
        source: Box<bincode::Error>,
    },

    /// A stored record failed to decode. The on-disk state is corrupt.
    #[snafu(display("failed to decode record: {source}"))]
    Decode {
        #[snafu(source(from(bincode::Error, Box::new)))]
        source: Box<bincode::Error>,
    },

    /// A snapshot stream did not match the expected format.
    #[snafu(display("malformed snapshot stream: {message}"))]
    SnapshotFormat { message: String },

    /// An I/O failure while reading or writing a snapshot stream.
    #[snafu(display("snapshot i/o failed: {source}"))]
    SnapshotIo { source: std::io::Error },
}

/// A contiguous key range, identified by an inclusive lower prefix and an
/// inclusive upper prefix. Every key starting with a prefix in
/// `[lower, upper]` belongs to the range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: Vec<u8>,
    pub upper: Vec<u8>,
}

impl KeyRange {
    pub fn new(lower: Vec<u8>, upper: Vec<u8>) -> Self {
        debug_assert!(lower <= upper, "KEYRANGE: lower bound must not exceed upper bound");
        KeyRange { lower, upper }
    }

    /// Scan bounds for this range: inclusive start, exclusive end.
    /// `None` means unbounded above (the upper prefix is all 0xff).
    pub fn scan_bounds(&self) -> (Vec<u8>, Option<Vec<u8>>) {
        (self.lower.clone(), keys::prefix_successor(&self.upper))
    }

    /// Whether `key` falls inside this range.
    pub fn contains(&self, key: &[u8]) -> bool {
        if key < self.lower.as_slice() {
            return false;
        }
        match keys::prefix_successor(&self.upper) {
            Some(end) => key < end.as_slice(),
            None => true,
        }
    }
}

/// Shared handle to a shard's ordered key-value store.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (or create) a store backed by a file on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Store, StoreError> {
        let path = path.as_ref();
        let db = Database::create(path).context(OpenDatabaseSnafu { path })?;
        let store = Store { db: Arc::new(db) };
        store.ensure_table()?;
        Ok(store)
    }

    /// Open a store backed by memory. State is lost on drop.
    ///
    /// Used by tests and simulations; behaves identically to the on-disk
    /// store.
    pub fn in_memory() -> Result<Store, StoreError> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|source| StoreError::OpenDatabase {
                path: PathBuf::from(":memory:"),
                source: Box::new(source),
            })?;
        let store = Store { db: Arc::new(db) };
        store.ensure_table()?;
        Ok(store)
    }

    /// Begin a write transaction. Reads observe the transaction's own writes;
    /// nothing is visible to other transactions until [`RwTxn::commit`].
    pub fn update(&self) -> Result<RwTxn, StoreError> {
        let txn = self.db.begin_write().context(BeginTransactionSnafu)?;
        Ok(RwTxn { txn })
    }

    /// Begin a read-only transaction with a stable snapshot of the store.
    pub fn view(&self) -> Result<RoTxn, StoreError> {
        let txn = self.db.begin_read().context(BeginTransactionSnafu)?;
        Ok(RoTxn { txn })
    }

    /// Create the records table so that read transactions never observe a
    /// missing table.
    fn ensure_table(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write().context(BeginTransactionSnafu)?;
        txn.open_table(RECORDS_TABLE).context(OpenTableSnafu)?;
        txn.commit().context(CommitSnafu)?;
        Ok(())
    }
}

/// Read operations shared by both transaction kinds.
pub trait StoreRead {
    /// Fetch the value stored under `key`, or [`StoreError::NotFound`].
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError>;

    /// Collect up to `limit` key-value pairs from `[lower, upper)` in key
    /// order (reversed when `reverse` is set). `upper == None` scans to the
    /// end of the store.
    fn scan(
        &self,
        lower: &[u8],
        upper: Option<&[u8]>,
        reverse: bool,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

/// A read-only transaction.
pub struct RoTxn {
    txn: redb::ReadTransaction,
}

impl RoTxn {
    /// Stream every pair in `[lower, upper)` through `visit` without
    /// materializing the range. Used by snapshot export.
    pub(crate) fn for_each_in_range(
        &self,
        lower: &[u8],
        upper: Option<&[u8]>,
        mut visit: impl FnMut(&[u8], &[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let table = self.txn.open_table(RECORDS_TABLE).context(OpenTableSnafu)?;
        for item in range_iter(&table, lower, upper)? {
            let (key, value) = item.map_err(|source| StoreError::Storage {
                source: Box::new(source),
            })?;
            visit(key.value(), value.value())?;
        }
        Ok(())
    }
}

impl StoreRead for RoTxn {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        let table = self.txn.open_table(RECORDS_TABLE).context(OpenTableSnafu)?;
        get_from_table(&table, key)
    }

    fn scan(
        &self,
        lower: &[u8],
        upper: Option<&[u8]>,
        reverse: bool,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let table = self.txn.open_table(RECORDS_TABLE).context(OpenTableSnafu)?;
        scan_table(&table, lower, upper, reverse, limit)
    }
}

/// A read-write transaction. Dropping without [`RwTxn::commit`] discards every
/// write.
pub struct RwTxn {
    txn: redb::WriteTransaction,
}

impl RwTxn {
    /// Store `value` under `key`, overwriting any existing value.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(RECORDS_TABLE).context(OpenTableSnafu)?;
        table.insert(key, value).map_err(|source| StoreError::Storage {
            source: Box::new(source),
        })?;
        Ok(())
    }

    /// Remove `key`. Removing an absent key is a no-op.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(RECORDS_TABLE).context(OpenTableSnafu)?;
        table.remove(key).map_err(|source| StoreError::Storage {
            source: Box::new(source),
        })?;
        Ok(())
    }

    /// Remove every key in `[lower, upper)`, in bounded batches.
    pub fn clear_range(&mut self, lower: &[u8], upper: Option<&[u8]>) -> Result<(), StoreError> {
        let mut cursor = lower.to_vec();
        loop {
            let batch: Vec<Vec<u8>> = self
                .scan(&cursor, upper, false, CLEAR_RANGE_BATCH)?
                .into_iter()
                .map(|(key, _)| key)
                .collect();
            let Some(last) = batch.last() else {
                return Ok(());
            };
            // Resume strictly after the last removed key.
            cursor = keys::key_successor(last);
            let mut table = self.txn.open_table(RECORDS_TABLE).context(OpenTableSnafu)?;
            for key in &batch {
                table.remove(key.as_slice()).map_err(|source| StoreError::Storage {
                    source: Box::new(source),
                })?;
            }
        }
    }

    /// Atomically apply every write in this transaction.
    pub fn commit(self) -> Result<(), StoreError> {
        self.txn.commit().context(CommitSnafu)
    }
}

impl StoreRead for RwTxn {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        let table = self.txn.open_table(RECORDS_TABLE).context(OpenTableSnafu)?;
        get_from_table(&table, key)
    }

    fn scan(
        &self,
        lower: &[u8],
        upper: Option<&[u8]>,
        reverse: bool,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let table = self.txn.open_table(RECORDS_TABLE).context(OpenTableSnafu)?;
        scan_table(&table, lower, upper, reverse, limit)
    }
}

fn get_from_table(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    key: &[u8],
) -> Result<Vec<u8>, StoreError> {
    let value = table.get(key).map_err(|source| StoreError::Storage {
        source: Box::new(source),
    })?;
    match value {
        Some(guard) => Ok(guard.value().to_vec()),
        None => Err(StoreError::NotFound),
    }
}

type RangeIter<'a> = redb::Range<'a, &'static [u8], &'static [u8]>;

fn range_iter<'a>(
    table: &'a impl ReadableTable<&'static [u8], &'static [u8]>,
    lower: &[u8],
    upper: Option<&[u8]>,
) -> Result<RangeIter<'a>, StoreError> {
    let result = match upper {
        Some(upper) => {
            if lower >= upper {
                // An inverted range would panic inside redb; surface it as
                // empty instead by scanning a degenerate range at `lower`.
                table.range(lower..lower)
            } else {
                table.range(lower..upper)
            }
        }
        None => table.range(lower..),
    };
    result.map_err(|source| StoreError::Storage {
        source: Box::new(source),
    })
}

fn scan_table(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    lower: &[u8],
    upper: Option<&[u8]>,
    reverse: bool,
    limit: usize,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
    let iter = range_iter(table, lower, upper)?;
    let mut result = Vec::new();

    let mut push = |item: Result<
        (redb::AccessGuard<&'static [u8]>, redb::AccessGuard<&'static [u8]>),
        redb::StorageError,
    >|
          -> Result<(), StoreError> {
        let (key, value) = item.map_err(|source| StoreError::Storage {
            source: Box::new(source),
        })?;
        result.push((key.value().to_vec(), value.value().to_vec()));
        Ok(())
    };

    if reverse {
        for item in iter.rev().take(limit) {
            push(item)?;
        }
    } else {
        for item in iter.take(limit) {
            push(item)?;
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_missing_key_is_not_found() {
        let store = Store::in_memory().unwrap();
        let txn = store.view().unwrap();
        let err = txn.get(b"missing").unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn set_get_delete_roundtrip() {
        let store = Store::in_memory().unwrap();

        let mut txn = store.update().unwrap();
        txn.set(b"k1", b"v1").unwrap();
        assert_eq!(txn.get(b"k1").unwrap(), b"v1");
        txn.commit().unwrap();

        let txn = store.view().unwrap();
        assert_eq!(txn.get(b"k1").unwrap(), b"v1");
        drop(txn);

        let mut txn = store.update().unwrap();
        txn.delete(b"k1").unwrap();
        txn.delete(b"k1").unwrap(); // absent delete is a no-op
        txn.commit().unwrap();

        let txn = store.view().unwrap();
        assert!(matches!(txn.get(b"k1").unwrap_err(), StoreError::NotFound));
    }

    #[test]
    fn dropped_transaction_discards_writes() {
        let store = Store::in_memory().unwrap();

        let mut txn = store.update().unwrap();
        txn.set(b"k1", b"v1").unwrap();
        drop(txn);

        let txn = store.view().unwrap();
        assert!(matches!(txn.get(b"k1").unwrap_err(), StoreError::NotFound));
    }

    #[test]
    fn scan_respects_bounds_order_and_limit() {
        let store = Store::in_memory().unwrap();

        let mut txn = store.update().unwrap();
        for key in [&b"a"[..], b"b", b"c", b"d"] {
            txn.set(key, key).unwrap();
        }
        txn.commit().unwrap();

        let txn = store.view().unwrap();

        let forward = txn.scan(b"a", Some(b"d"), false, 10).unwrap();
        let keys: Vec<&[u8]> = forward.iter().map(|(key, _)| key.as_slice()).collect();
        assert_eq!(keys, vec![&b"a"[..], b"b", b"c"]);

        let reversed = txn.scan(b"a", Some(b"d"), true, 2).unwrap();
        let keys: Vec<&[u8]> = reversed.iter().map(|(key, _)| key.as_slice()).collect();
        assert_eq!(keys, vec![&b"c"[..], b"b"]);

        let unbounded = txn.scan(b"c", None, false, 10).unwrap();
        assert_eq!(unbounded.len(), 2);

        // Inverted bounds scan nothing rather than failing.
        let empty = txn.scan(b"d", Some(b"a"), false, 10).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn write_transaction_reads_its_own_writes() {
        let store = Store::in_memory().unwrap();

        let mut txn = store.update().unwrap();
        txn.set(b"k1", b"v1").unwrap();
        txn.set(b"k2", b"v2").unwrap();
        txn.delete(b"k1").unwrap();

        assert!(matches!(txn.get(b"k1").unwrap_err(), StoreError::NotFound));
        assert_eq!(txn.get(b"k2").unwrap(), b"v2");
        let scanned = txn.scan(&[], None, false, 10).unwrap();
        assert_eq!(scanned.len(), 1);
    }

    #[test]
    fn clear_range_removes_only_covered_keys() {
        let store = Store::in_memory().unwrap();

        let mut txn = store.update().unwrap();
        for key in [&b"a1"[..], b"a2", b"b1", b"c1"] {
            txn.set(key, b"x").unwrap();
        }
        txn.clear_range(b"a", Some(b"c")).unwrap();
        txn.commit().unwrap();

        let txn = store.view().unwrap();
        let remaining = txn.scan(&[], None, false, 10).unwrap();
        let keys: Vec<&[u8]> = remaining.iter().map(|(key, _)| key.as_slice()).collect();
        assert_eq!(keys, vec![&b"c1"[..]]);
    }

    #[test]
    fn on_disk_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.redb");

        {
            let store = Store::open(&path).unwrap();
            let mut txn = store.update().unwrap();
            txn.set(b"k1", b"v1").unwrap();
            txn.commit().unwrap();
        }

        let store = Store::open(&path).unwrap();
        let txn = store.view().unwrap();
        assert_eq!(txn.get(b"k1").unwrap(), b"v1");
    }
}
