//! Wait groups.
//!
//! A wait group tracks a monotonically non-decreasing target `counter`
//! (raised by `add_jobs_to_wait_group`) and a `completed` count that grows by
//! one per *distinct* process id reported through
//! `complete_jobs_from_wait_group` — a job row per process is the dedup
//! marker. Wait groups carry no holder expirations; deletion is always
//! explicit (per group or per namespace) and proceeds through the GC queue,
//! because a group may own an unbounded set of job rows that must be reaped
//! incrementally.

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

/// State machine for one shard's wait groups.
pub struct WaitGroupsCore {
    store: Store,
    global_index_prefix: Vec<u8>,

    wait_groups_table: CompositeKeyTable<WaitGroup>,
    jobs_table: CompositeKeyTable<WaitGroupJob>,
    counters_table: SimpleKeyTable<WaitGroupsCounter>,
    gc_records_index: SimpleKeyTable<WaitGroupsGcRecord>,
    expiration_index: SimpleKeyTable<WaitGroupsExpirationIndexRecord>,
}

impl WaitGroupsCore {
    pub fn new(
        store: Store,
        global_index_prefix: &[u8],
        shard_lower_bound: &[u8],
        shard_upper_bound: &[u8],
    ) -> WaitGroupsCore {
        WaitGroupsCore {
            store,
            global_index_prefix: global_index_prefix.to_vec(),
            wait_groups_table: CompositeKeyTable::new(tables::WAIT_GROUPS, shard_lower_bound, shard_upper_bound),
            jobs_table: CompositeKeyTable::new(tables::WAIT_GROUP_JOBS, shard_lower_bound, shard_upper_bound),
            counters_table: SimpleKeyTable::new(
                tables::WAIT_GROUPS_COUNTERS,
                shard_lower_bound,
                shard_upper_bound,
            ),
            gc_records_index: SimpleKeyTable::new(
                tables::WAIT_GROUPS_GC_RECORDS,
                global_index_prefix,
                global_index_prefix,
            ),
            expiration_index: SimpleKeyTable::new(
                tables::WAIT_GROUPS_EXPIRATION_INDEX,
                global_index_prefix,
                global_index_prefix,
            ),
        }
    }

    pub fn create_wait_group(
        &self,
        request: CreateWaitGroupRequest,
    ) -> Result<CreateWaitGroupResponse, CoreError> {
        let mut txn = self.store.update()?;

        let wait_group_id = WaitGroupId {
            account_id: request.namespace_timestamped_id.account_id,
            namespace_name: request.namespace_timestamped_id.namespace_name.clone(),
            namespace_created_at: request.namespace_timestamped_id.namespace_created_at,
            wait_group_name: request.name.clone(),
        };

        match self.load_wait_group(&txn, &wait_group_id) {
            Ok(_) => {
                return Err(CoreError::already_exists(
                    "wait group with this name already exists",
                    &[
                        ("namespace_name", &wait_group_id.namespace_name),
                        ("wait_group_name", &wait_group_id.wait_group_name),
                    ],
                ));
            }
            Err(StoreError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        let mut counters = self.load_counters(&txn, &request.namespace_timestamped_id)?;

        if counters.number_of_wait_groups >= request.max_number_of_wait_groups_per_namespace {
            return Err(CoreError::resource_exhausted(
                "max number of wait groups per namespace reached",
                &[("limit", &request.max_number_of_wait_groups_per_namespace.to_string())],
            ));
        }

        let wait_group = WaitGroup {
            id: wait_group_id,
            description: request.description,
            counter: request.counter,
            completed: 0,
            created_at: request.now,
            updated_at: request.now,
            expires_at: request.expires_at,
        };

        self.set_wait_group(&mut txn, &wait_group)?;

        counters.number_of_wait_groups += 1;
        self.set_counters(&mut txn, &counters)?;

        txn.commit()?;

        Ok(CreateWaitGroupResponse { wait_group })
    }

    /// Pure read.
    pub fn get_wait_group(&self, request: GetWaitGroupRequest) -> Result<GetWaitGroupResponse, CoreError> {
        let txn = self.store.view()?;

        match self.load_wait_group(&txn, &request.wait_group_id) {
            Ok(wait_group) => Ok(GetWaitGroupResponse { wait_group }),
            Err(StoreError::NotFound) => Err(wait_group_not_found(&request.wait_group_id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Pure read.
    pub fn list_wait_groups(
        &self,
        request: ListWaitGroupsRequest,
    ) -> Result<ListWaitGroupsResponse, CoreError> {
        let txn = self.store.view()?;

        let page = self.list_wait_groups_page(
            &txn,
            &request.namespace_timestamped_id,
            request.pagination_token.as_ref(),
            clamped_limit(request.limit),
        )?;

        Ok(ListWaitGroupsResponse {
            wait_groups: page.items,
            next_pagination_token: page.next,
            previous_pagination_token: page.previous,
        })
    }

    /// Raise the target counter. The counter never decreases.
    pub fn add_jobs_to_wait_group(
        &self,
        request: AddJobsToWaitGroupRequest,
    ) -> Result<AddJobsToWaitGroupResponse, CoreError> {
        let mut txn = self.store.update()?;

        let mut wait_group = match self.load_wait_group(&txn, &request.wait_group_id) {
            Ok(wait_group) => wait_group,
            Err(StoreError::NotFound) => {
                return Err(wait_group_not_found(&request.wait_group_id));
            }
            Err(err) => return Err(err.into()),
        };

        let max_size = request.max_wait_group_size.max(0) as u64;
        if wait_group.counter.saturating_add(request.counter) > max_size {
            return Err(CoreError::resource_exhausted(
                "wait group counter is too big",
                &[("limit", &request.max_wait_group_size.to_string())],
            ));
        }

        wait_group.counter += request.counter;
        wait_group.updated_at = request.now;

        self.set_wait_group(&mut txn, &wait_group)?;
        txn.commit()?;

        Ok(AddJobsToWaitGroupResponse { wait_group })
    }

    /// Mark jobs finished, one per distinct process id.
    ///
    /// For each process id without a job row, a row is created with
    /// `completed_at = request.now` and `completed` is incremented; process
    /// ids seen before are silent no-ops. `completed` is therefore bounded by
    /// the number of distinct process ids ever reported.
    pub fn complete_jobs_from_wait_group(
        &self,
        request: CompleteJobsFromWaitGroupRequest,
    ) -> Result<CompleteJobsFromWaitGroupResponse, CoreError> {
        let mut txn = self.store.update()?;

        let mut wait_group = match self.load_wait_group(&txn, &request.wait_group_id) {
            Ok(wait_group) => wait_group,
            Err(StoreError::NotFound) => {
                return Err(wait_group_not_found(&request.wait_group_id));
            }
            Err(err) => return Err(err.into()),
        };

        for process_id in &request.process_ids {
            let job_id = WaitGroupJobId {
                account_id: request.wait_group_id.account_id,
                namespace_name: request.wait_group_id.namespace_name.clone(),
                namespace_created_at: request.wait_group_id.namespace_created_at,
                wait_group_name: request.wait_group_id.wait_group_name.clone(),
                process_id: process_id.clone(),
            };

            match self.load_job(&txn, &job_id) {
                Ok(_) => {
                    // Duplicate completion; the dedup marker already exists.
                }
                Err(StoreError::NotFound) => {
                    self.set_job(
                        &mut txn,
                        &WaitGroupJob { id: job_id, completed_at: request.now },
                    )?;
                    wait_group.completed += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        wait_group.updated_at = request.now;

        self.set_wait_group(&mut txn, &wait_group)?;
        txn.commit()?;

        Ok(CompleteJobsFromWaitGroupResponse { wait_group })
    }

    /// Idempotent: deleting an absent wait group succeeds with no change.
    ///
    /// The group row goes away immediately; its job rows are reaped
    /// incrementally via a GC record, since a group may carry an unbounded
    /// number of them.
    pub fn delete_wait_group(
        &self,
        request: DeleteWaitGroupRequest,
    ) -> Result<DeleteWaitGroupResponse, CoreError> {
        let mut txn = self.store.update()?;

        let wait_group = match self.load_wait_group(&txn, &request.wait_group_id) {
            Ok(wait_group) => wait_group,
            Err(StoreError::NotFound) => return Ok(DeleteWaitGroupResponse),
            Err(err) => return Err(err.into()),
        };

        let mut counters = self.load_counters(&txn, &request.wait_group_id.namespace_timestamped_id())?;

        self.delete_wait_group_row(&mut txn, &wait_group.id)?;

        self.create_gc_record(
            &mut txn,
            &WaitGroupsGcRecord {
                id: request.record_id,
                target: WaitGroupsGcTarget::WaitGroup(wait_group.id.clone()),
            },
        )?;

        counters.number_of_wait_groups -= 1;
        self.set_counters(&mut txn, &counters)?;

        txn.commit()?;

        Ok(DeleteWaitGroupResponse)
    }

    pub(super) fn load_wait_group(
        &self,
        txn: &impl StoreRead,
        wait_group_id: &WaitGroupId,
    ) -> Result<WaitGroup, StoreError> {
        self.wait_groups_table.get(
            txn,
            &wait_groups_table_pk(
                wait_group_id.account_id,
                &wait_group_id.namespace_name,
                wait_group_id.namespace_created_at,
            ),
            &wait_groups_table_sk(&wait_group_id.wait_group_name),
        )
    }

    pub(super) fn set_wait_group(&self, txn: &mut RwTxn, wait_group: &WaitGroup) -> Result<(), StoreError> {
        self.wait_groups_table.set(
            txn,
            &wait_groups_table_pk(
                wait_group.id.account_id,
                &wait_group.id.namespace_name,
                wait_group.id.namespace_created_at,
            ),
            &wait_groups_table_sk(&wait_group.id.wait_group_name),
            wait_group,
        )
    }

    pub(super) fn delete_wait_group_row(
        &self,
        txn: &mut RwTxn,
        wait_group_id: &WaitGroupId,
    ) -> Result<(), StoreError> {
        self.wait_groups_table.delete(
            txn,
            &wait_groups_table_pk(
                wait_group_id.account_id,
                &wait_group_id.namespace_name,
                wait_group_id.namespace_created_at,
            ),
            &wait_groups_table_sk(&wait_group_id.wait_group_name),
        )
    }

    pub(super) fn list_wait_groups_page(
        &self,
        txn: &impl StoreRead,
        namespace: &NamespaceTimestampedId,
        token: Option<&PaginationToken>,
        limit: usize,
    ) -> Result<ListPage<WaitGroup>, StoreError> {
        self.wait_groups_table.list_paginated(
            txn,
            &wait_groups_table_pk(
                namespace.account_id,
                &namespace.namespace_name,
                namespace.namespace_created_at,
            ),
            token,
            limit,
        )
    }

    pub(super) fn load_job(
        &self,
        txn: &impl StoreRead,
        job_id: &WaitGroupJobId,
    ) -> Result<WaitGroupJob, StoreError> {
        self.jobs_table.get(
            txn,
            &jobs_table_pk(
                job_id.account_id,
                &job_id.namespace_name,
                job_id.namespace_created_at,
                &job_id.wait_group_name,
            ),
            &jobs_table_sk(&job_id.process_id),
        )
    }

    pub(super) fn set_job(&self, txn: &mut RwTxn, job: &WaitGroupJob) -> Result<(), StoreError> {
        self.jobs_table.set(
            txn,
            &jobs_table_pk(
                job.id.account_id,
                &job.id.namespace_name,
                job.id.namespace_created_at,
                &job.id.wait_group_name,
            ),
            &jobs_table_sk(&job.id.process_id),
            job,
        )
    }

    pub(super) fn delete_job_row(&self, txn: &mut RwTxn, job_id: &WaitGroupJobId) -> Result<(), StoreError> {
        self.jobs_table.delete(
            txn,
            &jobs_table_pk(
                job_id.account_id,
                &job_id.namespace_name,
                job_id.namespace_created_at,
                &job_id.wait_group_name,
            ),
            &jobs_table_sk(&job_id.process_id),
        )
    }

    pub(super) fn list_jobs_page(
        &self,
        txn: &impl StoreRead,
        wait_group_id: &WaitGroupId,
        token: Option<&PaginationToken>,
        limit: usize,
    ) -> Result<ListPage<WaitGroupJob>, StoreError> {
        self.jobs_table.list_paginated(
            txn,
            &jobs_table_pk(
                wait_group_id.account_id,
                &wait_group_id.namespace_name,
                wait_group_id.namespace_created_at,
                &wait_group_id.wait_group_name,
            ),
            token,
            limit,
        )
    }

    pub(super) fn load_counters(
        &self,
        txn: &impl StoreRead,
        namespace: &NamespaceTimestampedId,
    ) -> Result<WaitGroupsCounter, StoreError> {
        match self.counters_table.get(txn, &wait_groups_counters_table_pk(namespace)) {
            Ok(counters) => Ok(counters),
            Err(StoreError::NotFound) => Ok(WaitGroupsCounter {
                namespace_timestamped_id: namespace.clone(),
                number_of_wait_groups: 0,
            }),
            Err(err) => Err(err),
        }
    }

    pub(super) fn set_counters(
        &self,
        txn: &mut RwTxn,
        counters: &WaitGroupsCounter,
    ) -> Result<(), StoreError> {
        self.counters_table.set(
            txn,
            &wait_groups_counters_table_pk(&counters.namespace_timestamped_id),
            counters,
        )
    }

    pub(super) fn delete_counters(
        &self,
        txn: &mut RwTxn,
        namespace: &NamespaceTimestampedId,
    ) -> Result<(), StoreError> {
        self.counters_table.delete(txn, &wait_groups_counters_table_pk(namespace))
    }

    pub(super) fn create_gc_record(
        &self,
        txn: &mut RwTxn,
        record: &WaitGroupsGcRecord,
    ) -> Result<(), StoreError> {
        self.gc_records_index
            .set(txn, &gc_records_index_pk(&self.global_index_prefix, record.id), record)
    }

    pub(super) fn delete_gc_record(
        &self,
        txn: &mut RwTxn,
        record: &WaitGroupsGcRecord,
    ) -> Result<(), StoreError> {
        self.gc_records_index.delete(txn, &gc_records_index_pk(&self.global_index_prefix, record.id))
    }

    pub(super) fn list_gc_records(
        &self,
        txn: &impl StoreRead,
        limit: usize,
    ) -> Result<Vec<WaitGroupsGcRecord>, StoreError> {
        Ok(self.gc_records_index.list_paginated(txn, None, limit)?.items)
    }

    /// Wait groups never insert expiration-index entries; this delete
    /// tolerates (and in practice always hits) absence during namespace GC.
    pub(super) fn delete_expiration_entry(
        &self,
        txn: &mut RwTxn,
        expires_at: i64,
        wait_group_id: &WaitGroupId,
    ) -> Result<(), StoreError> {
        self.expiration_index.delete(
            txn,
            &expiration_index_pk(&self.global_index_prefix, expires_at, wait_group_id),
        )
    }
}

impl ShardCore for WaitGroupsCore {
    fn ranges(&self) -> Vec<KeyRange> {
        vec![
            self.wait_groups_table.table_key_range(),
            self.jobs_table.table_key_range(),
            self.counters_table.table_key_range(),
            self.gc_records_index.table_key_range(),
        ]
    }

    fn snapshot(&self, writer: &mut dyn Write) -> Result<(), CoreError> {
        Ok(snapshot::export(&self.store, &self.ranges(), writer)?)
    }

    fn restore(&self, reader: &mut dyn Read) -> Result<(), CoreError> {
        Ok(snapshot::restore(&self.store, &self.ranges(), reader)?)
    }
}

fn wait_group_not_found(wait_group_id: &WaitGroupId) -> CoreError {
    CoreError::not_found(
        "wait group not found",
        &[
            ("namespace_name", &wait_group_id.namespace_name),
            ("wait_group_name", &wait_group_id.wait_group_name),
        ],
    )
}

// 1. shard key (by account id and namespace name)
// 2. account id
// 3. namespace name
// 4. namespace created at
fn wait_groups_table_pk(account_id: u64, namespace_name: &str, namespace_created_at: i64) -> Vec<u8> {
    KeyBuf::new()
        .raw(&shard_by_account_and_namespace(account_id, namespace_name))
        .u64(account_id)
        .str(namespace_name)
        .i64(namespace_created_at)
        .build()
}

// 1. wait group name
fn wait_groups_table_sk(wait_group_name: &str) -> Vec<u8> {
    KeyBuf::new().str(wait_group_name).build()
}

// 1. shard key (by account id and namespace name)
// 2. account id
// 3. namespace name
// 4. namespace created at
// 5. wait group name
fn jobs_table_pk(
    account_id: u64,
    namespace_name: &str,
    namespace_created_at: i64,
    wait_group_name: &str,
) -> Vec<u8> {
    KeyBuf::new()
        .raw(&shard_by_account_and_namespace(account_id, namespace_name))
        .u64(account_id)
        .str(namespace_name)
        .i64(namespace_created_at)
        .str(wait_group_name)
        .build()
}

// 1. process id
fn jobs_table_sk(process_id: &str) -> Vec<u8> {
    KeyBuf::new().str(process_id).build()
}

// 1. shard key (by account id and namespace name)
// 2. account id
// 3. namespace name
// 4. namespace created at
fn wait_groups_counters_table_pk(namespace: &NamespaceTimestampedId) -> Vec<u8> {
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
// 6. wait group name
fn expiration_index_pk(
    global_index_prefix: &[u8],
    expires_at: i64,
    wait_group_id: &WaitGroupId,
) -> Vec<u8> {
    KeyBuf::new()
        .raw(global_index_prefix)
        .i64(expires_at)
        .u64(wait_group_id.account_id)
        .str(&wait_group_id.namespace_name)
        .i64(wait_group_id.namespace_created_at)
        .str(&wait_group_id.wait_group_name)
        .build()
}
