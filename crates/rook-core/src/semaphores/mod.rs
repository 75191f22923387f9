//! Counting semaphores.
//!
//! Shape mirrors the locks core with two differences that matter: semaphore
//! rows are created explicitly (acquire on a missing semaphore is NotFound,
//! not creation), and rows persist across holder expiration with zero
//! holders — only an explicit delete or the namespace GC sweep removes them.
//! A semaphore with no holders has no expiration-index entry.

mod acquire;
mod gc;
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

/// State machine for one shard's semaphores.
pub struct SemaphoresCore {
    store: Store,
    global_index_prefix: Vec<u8>,

    semaphores_table: CompositeKeyTable<Semaphore>,
    counters_table: SimpleKeyTable<SemaphoresCounter>,
    gc_records_index: SimpleKeyTable<SemaphoresGcRecord>,
    expiration_index: SimpleKeyTable<SemaphoresExpirationIndexRecord>,
}

impl SemaphoresCore {
    pub fn new(
        store: Store,
        global_index_prefix: &[u8],
        shard_lower_bound: &[u8],
        shard_upper_bound: &[u8],
    ) -> SemaphoresCore {
        SemaphoresCore {
            store,
            global_index_prefix: global_index_prefix.to_vec(),
            semaphores_table: CompositeKeyTable::new(tables::SEMAPHORES, shard_lower_bound, shard_upper_bound),
            counters_table: SimpleKeyTable::new(
                tables::SEMAPHORES_COUNTERS,
                shard_lower_bound,
                shard_upper_bound,
            ),
            gc_records_index: SimpleKeyTable::new(
                tables::SEMAPHORES_GC_RECORDS,
                global_index_prefix,
                global_index_prefix,
            ),
            expiration_index: SimpleKeyTable::new(
                tables::SEMAPHORES_EXPIRATION_INDEX,
                global_index_prefix,
                global_index_prefix,
            ),
        }
    }

    pub fn create_semaphore(
        &self,
        request: CreateSemaphoreRequest,
    ) -> Result<CreateSemaphoreResponse, CoreError> {
        let mut txn = self.store.update()?;

        let semaphore_id = SemaphoreId {
            account_id: request.namespace_timestamped_id.account_id,
            namespace_name: request.namespace_timestamped_id.namespace_name.clone(),
            namespace_created_at: request.namespace_timestamped_id.namespace_created_at,
            semaphore_name: request.name.clone(),
        };

        let mut counters = self.load_counters(&txn, &request.namespace_timestamped_id)?;

        match self.load_semaphore(&txn, &semaphore_id) {
            Ok(_) => {
                return Err(CoreError::already_exists(
                    "semaphore with this name already exists",
                    &[
                        ("namespace_name", &semaphore_id.namespace_name),
                        ("semaphore_name", &semaphore_id.semaphore_name),
                    ],
                ));
            }
            Err(StoreError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        if counters.number_of_semaphores >= request.max_number_of_semaphores_per_namespace {
            return Err(CoreError::resource_exhausted(
                "max number of semaphores per namespace reached",
                &[("limit", &request.max_number_of_semaphores_per_namespace.to_string())],
            ));
        }

        let semaphore = Semaphore {
            id: semaphore_id,
            description: request.description,
            permits: request.permits,
            created_at: request.now,
            updated_at: request.now,
            holders: Vec::new(),
        };

        self.set_semaphore(&mut txn, &semaphore)?;

        counters.number_of_semaphores += 1;
        self.set_counters(&mut txn, &counters)?;

        txn.commit()?;

        Ok(CreateSemaphoreResponse { semaphore })
    }

    /// Change description and permits. Shrinking permits below the current
    /// (refreshed) holder count is rejected.
    pub fn update_semaphore(
        &self,
        request: UpdateSemaphoreRequest,
    ) -> Result<UpdateSemaphoreResponse, CoreError> {
        let mut txn = self.store.update()?;

        let semaphore = match self.load_semaphore(&txn, &request.semaphore_id) {
            Ok(semaphore) => semaphore,
            Err(StoreError::NotFound) => {
                return Err(semaphore_not_found(&request.semaphore_id));
            }
            Err(err) => return Err(err.into()),
        };

        let old_expires_at = semaphore.earliest_expiration();
        let mut updated = semaphore.refreshed(request.now);

        if updated.holders.len() as u64 > request.permits {
            return Err(CoreError::invalid_argument(
                "there are currently more holders than the new amount of permits",
                &[],
            ));
        }

        updated.description = request.description;
        updated.permits = request.permits;
        updated.updated_at = request.now;

        // The refresh may have dropped holders; the index entry follows.
        self.update_expiration_index(
            &mut txn,
            &updated.id,
            old_expires_at,
            updated.earliest_expiration(),
        )?;
        self.set_semaphore(&mut txn, &updated)?;

        txn.commit()?;

        Ok(UpdateSemaphoreResponse { semaphore: updated })
    }

    /// Mutating read: refreshes the semaphore at `request.now` and persists
    /// the result. A missing semaphore is NotFound.
    pub fn get_semaphore(&self, request: GetSemaphoreRequest) -> Result<GetSemaphoreResponse, CoreError> {
        let mut txn = self.store.update()?;

        let semaphore = match self.load_semaphore(&txn, &request.semaphore_id) {
            Ok(semaphore) => semaphore,
            Err(StoreError::NotFound) => {
                return Err(semaphore_not_found(&request.semaphore_id));
            }
            Err(err) => return Err(err.into()),
        };

        let old_expires_at = semaphore.earliest_expiration();
        let updated = semaphore.refreshed(request.now);

        self.update_expiration_index(
            &mut txn,
            &updated.id,
            old_expires_at,
            updated.earliest_expiration(),
        )?;
        self.set_semaphore(&mut txn, &updated)?;

        txn.commit()?;

        Ok(GetSemaphoreResponse { semaphore: updated })
    }

    /// Idempotent: deleting an absent semaphore succeeds with no change.
    pub fn delete_semaphore(
        &self,
        request: DeleteSemaphoreRequest,
    ) -> Result<DeleteSemaphoreResponse, CoreError> {
        let mut txn = self.store.update()?;

        let semaphore = match self.load_semaphore(&txn, &request.semaphore_id) {
            Ok(semaphore) => semaphore,
            Err(StoreError::NotFound) => return Ok(DeleteSemaphoreResponse),
            Err(err) => return Err(err.into()),
        };

        let mut counters = self.load_counters(&txn, &request.semaphore_id.namespace_timestamped_id())?;

        self.update_expiration_index(&mut txn, &semaphore.id, semaphore.earliest_expiration(), 0)?;
        self.delete_semaphore_row(&mut txn, &semaphore.id)?;

        counters.number_of_semaphores -= 1;
        self.set_counters(&mut txn, &counters)?;

        txn.commit()?;

        Ok(DeleteSemaphoreResponse)
    }

    /// Pure read; holders are returned as stored, without a refresh pass.
    pub fn list_semaphores(
        &self,
        request: ListSemaphoresRequest,
    ) -> Result<ListSemaphoresResponse, CoreError> {
        let txn = self.store.view()?;

        let page = self.list_semaphores_page(
            &txn,
            &request.namespace_timestamped_id,
            request.pagination_token.as_ref(),
            clamped_limit(request.limit),
        )?;

        Ok(ListSemaphoresResponse {
            semaphores: page.items,
            next_pagination_token: page.next,
            previous_pagination_token: page.previous,
        })
    }

    pub(super) fn load_semaphore(
        &self,
        txn: &impl StoreRead,
        semaphore_id: &SemaphoreId,
    ) -> Result<Semaphore, StoreError> {
        self.semaphores_table.get(
            txn,
            &semaphores_table_pk(
                semaphore_id.account_id,
                &semaphore_id.namespace_name,
                semaphore_id.namespace_created_at,
            ),
            &semaphores_table_sk(&semaphore_id.semaphore_name),
        )
    }

    pub(super) fn set_semaphore(&self, txn: &mut RwTxn, semaphore: &Semaphore) -> Result<(), StoreError> {
        self.semaphores_table.set(
            txn,
            &semaphores_table_pk(
                semaphore.id.account_id,
                &semaphore.id.namespace_name,
                semaphore.id.namespace_created_at,
            ),
            &semaphores_table_sk(&semaphore.id.semaphore_name),
            semaphore,
        )
    }

    pub(super) fn delete_semaphore_row(
        &self,
        txn: &mut RwTxn,
        semaphore_id: &SemaphoreId,
    ) -> Result<(), StoreError> {
        self.semaphores_table.delete(
            txn,
            &semaphores_table_pk(
                semaphore_id.account_id,
                &semaphore_id.namespace_name,
                semaphore_id.namespace_created_at,
            ),
            &semaphores_table_sk(&semaphore_id.semaphore_name),
        )
    }

    pub(super) fn list_semaphores_page(
        &self,
        txn: &impl StoreRead,
        namespace: &NamespaceTimestampedId,
        token: Option<&PaginationToken>,
        limit: usize,
    ) -> Result<ListPage<Semaphore>, StoreError> {
        self.semaphores_table.list_paginated(
            txn,
            &semaphores_table_pk(
                namespace.account_id,
                &namespace.namespace_name,
                namespace.namespace_created_at,
            ),
            token,
            limit,
        )
    }

    pub(super) fn load_counters(
        &self,
        txn: &impl StoreRead,
        namespace: &NamespaceTimestampedId,
    ) -> Result<SemaphoresCounter, StoreError> {
        match self.counters_table.get(txn, &semaphores_counters_table_pk(namespace)) {
            Ok(counters) => Ok(counters),
            Err(StoreError::NotFound) => Ok(SemaphoresCounter {
                namespace_timestamped_id: namespace.clone(),
                number_of_semaphores: 0,
            }),
            Err(err) => Err(err),
        }
    }

    pub(super) fn set_counters(
        &self,
        txn: &mut RwTxn,
        counters: &SemaphoresCounter,
    ) -> Result<(), StoreError> {
        self.counters_table.set(
            txn,
            &semaphores_counters_table_pk(&counters.namespace_timestamped_id),
            counters,
        )
    }

    pub(super) fn delete_counters(
        &self,
        txn: &mut RwTxn,
        namespace: &NamespaceTimestampedId,
    ) -> Result<(), StoreError> {
        self.counters_table.delete(txn, &semaphores_counters_table_pk(namespace))
    }

    pub(super) fn create_gc_record(
        &self,
        txn: &mut RwTxn,
        record: &SemaphoresGcRecord,
    ) -> Result<(), StoreError> {
        self.gc_records_index
            .set(txn, &gc_records_index_pk(&self.global_index_prefix, record.id), record)
    }

    pub(super) fn delete_gc_record(
        &self,
        txn: &mut RwTxn,
        record: &SemaphoresGcRecord,
    ) -> Result<(), StoreError> {
        self.gc_records_index.delete(txn, &gc_records_index_pk(&self.global_index_prefix, record.id))
    }

    pub(super) fn list_gc_records(
        &self,
        txn: &impl StoreRead,
        limit: usize,
    ) -> Result<Vec<SemaphoresGcRecord>, StoreError> {
        Ok(self.gc_records_index.list_paginated(txn, None, limit)?.items)
    }

    /// Same three-step dance as the locks core; no entry exists (or is
    /// inserted) while the semaphore has no holders.
    pub(super) fn update_expiration_index(
        &self,
        txn: &mut RwTxn,
        semaphore_id: &SemaphoreId,
        old_expires_at: i64,
        new_expires_at: i64,
    ) -> Result<(), StoreError> {
        if old_expires_at == new_expires_at {
            return Ok(());
        }

        self.expiration_index.delete(
            txn,
            &expiration_index_pk(&self.global_index_prefix, old_expires_at, semaphore_id),
        )?;

        if new_expires_at != 0 {
            self.expiration_index.set(
                txn,
                &expiration_index_pk(&self.global_index_prefix, new_expires_at, semaphore_id),
                &SemaphoresExpirationIndexRecord {
                    expires_at: new_expires_at,
                    semaphore_id: semaphore_id.clone(),
                },
            )?;
        }

        Ok(())
    }

    pub(super) fn delete_expiration_entry(
        &self,
        txn: &mut RwTxn,
        expires_at: i64,
        semaphore_id: &SemaphoreId,
    ) -> Result<(), StoreError> {
        self.expiration_index
            .delete(txn, &expiration_index_pk(&self.global_index_prefix, expires_at, semaphore_id))
    }

    pub(super) fn expired_index_entries(
        &self,
        txn: &impl StoreRead,
        now: i64,
        limit: usize,
    ) -> Result<Vec<SemaphoresExpirationIndexRecord>, StoreError> {
        self.expiration_index.list_in_range(
            txn,
            &expiration_index_prefix(&self.global_index_prefix, 0),
            &expiration_index_prefix(&self.global_index_prefix, now),
            false,
            limit,
        )
    }
}

impl ShardCore for SemaphoresCore {
    fn ranges(&self) -> Vec<KeyRange> {
        vec![
            self.semaphores_table.table_key_range(),
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

fn semaphore_not_found(semaphore_id: &SemaphoreId) -> CoreError {
    CoreError::not_found(
        "semaphore not found",
        &[
            ("namespace_name", &semaphore_id.namespace_name),
            ("semaphore_name", &semaphore_id.semaphore_name),
        ],
    )
}

// 1. shard key (by account id and namespace name)
// 2. account id
// 3. namespace name
// 4. namespace created at
fn semaphores_table_pk(account_id: u64, namespace_name: &str, namespace_created_at: i64) -> Vec<u8> {
    KeyBuf::new()
        .raw(&shard_by_account_and_namespace(account_id, namespace_name))
        .u64(account_id)
        .str(namespace_name)
        .i64(namespace_created_at)
        .build()
}

// 1. semaphore name
fn semaphores_table_sk(semaphore_name: &str) -> Vec<u8> {
    KeyBuf::new().str(semaphore_name).build()
}

// 1. shard key (by account id and namespace name)
// 2. account id
// 3. namespace name
// 4. namespace created at
fn semaphores_counters_table_pk(namespace: &NamespaceTimestampedId) -> Vec<u8> {
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
// 6. semaphore name
fn expiration_index_pk(
    global_index_prefix: &[u8],
    expires_at: i64,
    semaphore_id: &SemaphoreId,
) -> Vec<u8> {
    KeyBuf::new()
        .raw(global_index_prefix)
        .i64(expires_at)
        .u64(semaphore_id.account_id)
        .str(&semaphore_id.namespace_name)
        .i64(semaphore_id.namespace_created_at)
        .str(&semaphore_id.semaphore_name)
        .build()
}

// 1. shard global index prefix
// 2. timestamp
fn expiration_index_prefix(global_index_prefix: &[u8], expires_at: i64) -> Vec<u8> {
    KeyBuf::new().raw(global_index_prefix).i64(expires_at).build()
}
