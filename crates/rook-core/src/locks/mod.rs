//! Advisory read/write locks.
//!
//! The lock state machine has three states (`Unlocked`, `ReadLocked`,
//! `WriteLocked`) driven by acquire, release, delete, the implicit expiration
//! check every read applies, and garbage collection. Reads mutate: `get_lock`
//! persists the refreshed state so returned state is always durable state,
//! which spreads expiration cleanup over the read path.
//!
//! # Expiration index
//!
//! Every locked lock has exactly one entry in the per-shard expiration index,
//! keyed by the minimum `expires_at` across its holders. Every path that
//! rewrites a lock row goes through [`LocksCore::update_expiration_index`]
//! with the before/after earliest expirations; skipping it silently corrupts
//! GC (revisiting freed locks, or never revisiting live ones).

mod acquire;
mod gc;
mod release;
mod types;

use std::io::Read;
use std::io::Write;

use rook_store::CompositeKeyTable;
use rook_store::KeyRange;
use rook_store::RwTxn;
use rook_store::SimpleKeyTable;
use rook_store::Store;
use rook_store::StoreError;
use rook_store::StoreRead;
use rook_store::keys::KeyBuf;
use rook_store::snapshot;
use rook_store::tables::ListPage;
use rook_store::tables::PaginationToken;
pub use types::*;

use crate::ShardCore;
use crate::error::CoreError;
use crate::sharding::shard_by_account_and_namespace;
use crate::tables;
use crate::types::NamespaceTimestampedId;
use crate::types::clamped_limit;

/// State machine for one shard's locks.
pub struct LocksCore {
    store: Store,
    global_index_prefix: Vec<u8>,

    locks_table: CompositeKeyTable<Lock>,
    counters_table: SimpleKeyTable<LocksCounter>,
    gc_records_index: SimpleKeyTable<LocksGcRecord>,
    expiration_index: SimpleKeyTable<LocksExpirationIndexRecord>,
}

impl LocksCore {
    /// `global_index_prefix` is the shard's fixed prefix for its global
    /// indexes (GC queue, expiration index); `shard_lower_bound` /
    /// `shard_upper_bound` bound the shard-keyed tables.
    pub fn new(
        store: Store,
        global_index_prefix: &[u8],
        shard_lower_bound: &[u8],
        shard_upper_bound: &[u8],
    ) -> LocksCore {
        LocksCore {
            store,
            global_index_prefix: global_index_prefix.to_vec(),
            locks_table: CompositeKeyTable::new(tables::LOCKS, shard_lower_bound, shard_upper_bound),
            counters_table: SimpleKeyTable::new(tables::LOCKS_COUNTERS, shard_lower_bound, shard_upper_bound),
            gc_records_index: SimpleKeyTable::new(
                tables::LOCKS_GC_RECORDS,
                global_index_prefix,
                global_index_prefix,
            ),
            expiration_index: SimpleKeyTable::new(
                tables::LOCKS_EXPIRATION_INDEX,
                global_index_prefix,
                global_index_prefix,
            ),
        }
    }

    /// Mutating read: refreshes the lock at `request.now`, persists the
    /// result (deleting the row if every holder expired), and returns the
    /// refreshed state. An absent lock returns a synthesized `Unlocked` lock
    /// without writing anything.
    pub fn get_lock(&self, request: GetLockRequest) -> Result<GetLockResponse, CoreError> {
        let mut txn = self.store.update()?;

        let lock = match self.load_lock(&txn, &request.lock_id) {
            Ok(lock) => lock,
            Err(StoreError::NotFound) => {
                return Ok(GetLockResponse { lock: Lock::unlocked(request.lock_id) });
            }
            Err(err) => return Err(err.into()),
        };

        let refreshed = lock.refreshed(request.now);
        let old_expires_at = lock.earliest_expiration();
        let new_expires_at = refreshed.earliest_expiration();

        if refreshed.state == LockState::Unlocked {
            // Every holder expired: reclaim the row on the read path.
            let mut counters = self.load_counters(&txn, &request.lock_id.namespace_timestamped_id())?;

            self.update_expiration_index(&mut txn, &lock.id, old_expires_at, 0)?;
            self.delete_lock_row(&mut txn, &lock.id)?;

            counters.number_of_locks -= 1;
            self.set_counters(&mut txn, &counters)?;
        } else {
            self.update_expiration_index(&mut txn, &lock.id, old_expires_at, new_expires_at)?;
            self.set_lock(&mut txn, &refreshed)?;
        }

        txn.commit()?;

        Ok(GetLockResponse { lock: refreshed })
    }

    /// Read-only page over a namespace's locks. Each lock is refreshed in
    /// memory and locks that refresh to `Unlocked` are filtered out, but
    /// nothing is persisted: reclamation belongs to `get_lock` and GC.
    pub fn list_locks(&self, request: ListLocksRequest) -> Result<ListLocksResponse, CoreError> {
        let txn = self.store.view()?;

        let page = self.list_locks_page(
            &txn,
            &request.namespace_timestamped_id,
            request.pagination_token.as_ref(),
            clamped_limit(request.limit),
        )?;

        let locks = page
            .items
            .iter()
            .map(|lock| lock.refreshed(request.now))
            .filter(|lock| lock.state != LockState::Unlocked)
            .collect();

        Ok(ListLocksResponse {
            locks,
            next_pagination_token: page.next,
            previous_pagination_token: page.previous,
        })
    }

    /// Idempotent: deleting an absent lock succeeds with no change.
    pub fn delete_lock(&self, request: DeleteLockRequest) -> Result<DeleteLockResponse, CoreError> {
        let mut txn = self.store.update()?;

        let lock = match self.load_lock(&txn, &request.lock_id) {
            Ok(lock) => lock,
            Err(StoreError::NotFound) => return Ok(DeleteLockResponse),
            Err(err) => return Err(err.into()),
        };

        let mut counters = self.load_counters(&txn, &request.lock_id.namespace_timestamped_id())?;

        self.update_expiration_index(&mut txn, &lock.id, lock.earliest_expiration(), 0)?;
        self.delete_lock_row(&mut txn, &lock.id)?;

        counters.number_of_locks -= 1;
        self.set_counters(&mut txn, &counters)?;

        txn.commit()?;

        Ok(DeleteLockResponse)
    }

    // ------------------------------------------------------------------
    // Row and counter plumbing shared by the operation modules.
    // ------------------------------------------------------------------

    pub(super) fn load_lock(&self, txn: &impl StoreRead, lock_id: &LockId) -> Result<Lock, StoreError> {
        self.locks_table.get(
            txn,
            &locks_table_pk(lock_id.account_id, &lock_id.namespace_name, lock_id.namespace_created_at),
            &locks_table_sk(&lock_id.lock_name),
        )
    }

    pub(super) fn set_lock(&self, txn: &mut RwTxn, lock: &Lock) -> Result<(), StoreError> {
        debug_assert!(
            lock.state != LockState::Unlocked,
            "LOCKS: unlocked locks are represented by row absence"
        );
        self.locks_table.set(
            txn,
            &locks_table_pk(lock.id.account_id, &lock.id.namespace_name, lock.id.namespace_created_at),
            &locks_table_sk(&lock.id.lock_name),
            lock,
        )
    }

    pub(super) fn delete_lock_row(&self, txn: &mut RwTxn, lock_id: &LockId) -> Result<(), StoreError> {
        self.locks_table.delete(
            txn,
            &locks_table_pk(lock_id.account_id, &lock_id.namespace_name, lock_id.namespace_created_at),
            &locks_table_sk(&lock_id.lock_name),
        )
    }

    pub(super) fn list_locks_page(
        &self,
        txn: &impl StoreRead,
        namespace: &NamespaceTimestampedId,
        token: Option<&PaginationToken>,
        limit: usize,
    ) -> Result<ListPage<Lock>, StoreError> {
        self.locks_table.list_paginated(
            txn,
            &locks_table_pk(namespace.account_id, &namespace.namespace_name, namespace.namespace_created_at),
            token,
            limit,
        )
    }

    /// Missing counters read as zero; the row is created on first write.
    pub(super) fn load_counters(
        &self,
        txn: &impl StoreRead,
        namespace: &NamespaceTimestampedId,
    ) -> Result<LocksCounter, StoreError> {
        match self.counters_table.get(txn, &locks_counters_table_pk(namespace)) {
            Ok(counters) => Ok(counters),
            Err(StoreError::NotFound) => Ok(LocksCounter {
                namespace_timestamped_id: namespace.clone(),
                number_of_locks: 0,
            }),
            Err(err) => Err(err),
        }
    }

    pub(super) fn set_counters(&self, txn: &mut RwTxn, counters: &LocksCounter) -> Result<(), StoreError> {
        self.counters_table.set(
            txn,
            &locks_counters_table_pk(&counters.namespace_timestamped_id),
            counters,
        )
    }

    pub(super) fn delete_counters(
        &self,
        txn: &mut RwTxn,
        namespace: &NamespaceTimestampedId,
    ) -> Result<(), StoreError> {
        self.counters_table.delete(txn, &locks_counters_table_pk(namespace))
    }

    pub(super) fn create_gc_record(&self, txn: &mut RwTxn, record: &LocksGcRecord) -> Result<(), StoreError> {
        self.gc_records_index
            .set(txn, &gc_records_index_pk(&self.global_index_prefix, record.id), record)
    }

    pub(super) fn delete_gc_record(&self, txn: &mut RwTxn, record: &LocksGcRecord) -> Result<(), StoreError> {
        self.gc_records_index.delete(txn, &gc_records_index_pk(&self.global_index_prefix, record.id))
    }

    pub(super) fn list_gc_records(
        &self,
        txn: &impl StoreRead,
        limit: usize,
    ) -> Result<Vec<LocksGcRecord>, StoreError> {
        Ok(self.gc_records_index.list_paginated(txn, None, limit)?.items)
    }

    // ------------------------------------------------------------------
    // Expiration index maintenance.
    // ------------------------------------------------------------------

    /// The three-step dance every rewrite goes through: when the earliest
    /// expiration moved, drop the index entry at the old timestamp and insert
    /// one at the new timestamp (no insert when the lock became unlocked and
    /// its row is going away).
    pub(super) fn update_expiration_index(
        &self,
        txn: &mut RwTxn,
        lock_id: &LockId,
        old_expires_at: i64,
        new_expires_at: i64,
    ) -> Result<(), StoreError> {
        if old_expires_at == new_expires_at {
            return Ok(());
        }

        self.expiration_index
            .delete(txn, &expiration_index_pk(&self.global_index_prefix, old_expires_at, lock_id))?;

        if new_expires_at != 0 {
            self.expiration_index.set(
                txn,
                &expiration_index_pk(&self.global_index_prefix, new_expires_at, lock_id),
                &LocksExpirationIndexRecord { expires_at: new_expires_at, lock_id: lock_id.clone() },
            )?;
        }

        Ok(())
    }

    pub(super) fn delete_expiration_entry(
        &self,
        txn: &mut RwTxn,
        expires_at: i64,
        lock_id: &LockId,
    ) -> Result<(), StoreError> {
        self.expiration_index
            .delete(txn, &expiration_index_pk(&self.global_index_prefix, expires_at, lock_id))
    }

    /// Expired index entries up to `now` (inclusive), oldest first, capped by
    /// `limit`.
    pub(super) fn expired_index_entries(
        &self,
        txn: &impl StoreRead,
        now: i64,
        limit: usize,
    ) -> Result<Vec<LocksExpirationIndexRecord>, StoreError> {
        self.expiration_index.list_in_range(
            txn,
            &expiration_index_prefix(&self.global_index_prefix, 0),
            &expiration_index_prefix(&self.global_index_prefix, now),
            false,
            limit,
        )
    }
}

impl ShardCore for LocksCore {
    fn ranges(&self) -> Vec<KeyRange> {
        vec![
            self.locks_table.table_key_range(),
            self.counters_table.table_key_range(),
            self.gc_records_index.table_key_range(),
            self.expiration_index.table_key_range(),
        ]
    }

    fn snapshot(&self, writer: &mut dyn Write) -> Result<(), CoreError> {
        Ok(snapshot::export(&self.store, &self.ranges(), writer)?)
    }

    fn restore(&self, reader: &mut dyn Read) -> Result<(), CoreError> {
        Ok(snapshot::restore(&self.store, &self.ranges(), reader)?)
    }
}

// 1. shard key (by account id and namespace name)
// 2. account id
// 3. namespace name
// 4. namespace created at
fn locks_table_pk(account_id: u64, namespace_name: &str, namespace_created_at: i64) -> Vec<u8> {
    KeyBuf::new()
        .raw(&shard_by_account_and_namespace(account_id, namespace_name))
        .u64(account_id)
        .str(namespace_name)
        .i64(namespace_created_at)
        .build()
}

// 1. lock name
fn locks_table_sk(lock_name: &str) -> Vec<u8> {
    KeyBuf::new().str(lock_name).build()
}

// 1. shard key (by account id and namespace name)
// 2. account id
// 3. namespace name
// 4. namespace created at
fn locks_counters_table_pk(namespace: &NamespaceTimestampedId) -> Vec<u8> {
    KeyBuf::new()
        .raw(&shard_by_account_and_namespace(namespace.account_id, &namespace.namespace_name))
        .u64(namespace.account_id)
        .str(&namespace.namespace_name)
        .i64(namespace.namespace_created_at)
        .build()
}

// 1. shard global index prefix
// 2. gc record id
fn gc_records_index_pk(global_index_prefix: &[u8], record_id: u64) -> Vec<u8> {
    KeyBuf::new().raw(global_index_prefix).u64(record_id).build()
}

// 1. shard global index prefix
// 2. timestamp
// 3. account id
// 4. namespace name
// 5. namespace created at
// 6. lock name
fn expiration_index_pk(global_index_prefix: &[u8], expires_at: i64, lock_id: &LockId) -> Vec<u8> {
    KeyBuf::new()
        .raw(global_index_prefix)
        .i64(expires_at)
        .u64(lock_id.account_id)
        .str(&lock_id.namespace_name)
        .i64(lock_id.namespace_created_at)
        .str(&lock_id.lock_name)
        .build()
}

// 1. shard global index prefix
// 2. timestamp
fn expiration_index_prefix(global_index_prefix: &[u8], expires_at: i64) -> Vec<u8> {
    KeyBuf::new().raw(global_index_prefix).i64(expires_at).build()
}
