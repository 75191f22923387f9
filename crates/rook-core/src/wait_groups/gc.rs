//! Wait-group garbage collection.
//!
//! The GC queue carries two kinds of work, dispatched exhaustively on
//! [`WaitGroupsGcTarget`]: reaping the job rows a deleted group left behind,
//! and sweeping a deleted namespace's groups, jobs, and counter. One pass
//! deletes at most `max_deleted_objects` records across all GC records in
//! the page.
//!
//! Completion detection is by accounting, not by re-listing: a sub-pass that
//! deletes fewer objects than its allowed limit has proven there is nothing
//! left for that record, and only then is the record removed. The namespace
//! sweep reserves three objects per group (expiration-index entry, counter
//! record, main row) before budgeting its job deletions — the `- 3` below —
//! so the final bookkeeping deletes always fit the budget.

use rook_store::RwTxn;
use tracing::debug;

use super::RunWaitGroupsGarbageCollectionRequest;
use super::RunWaitGroupsGarbageCollectionResponse;
use super::WaitGroupId;
use super::WaitGroupsCore;
use super::WaitGroupsDeleteNamespaceRequest;
use super::WaitGroupsDeleteNamespaceResponse;
use super::WaitGroupsGcRecord;
use super::WaitGroupsGcTarget;
use crate::error::CoreError;
use crate::types::NamespaceTimestampedId;

impl WaitGroupsCore {
    /// Enqueue a namespace sweep; idempotent per `record_id`.
    pub fn wait_groups_delete_namespace(
        &self,
        request: WaitGroupsDeleteNamespaceRequest,
    ) -> Result<WaitGroupsDeleteNamespaceResponse, CoreError> {
        let mut txn = self.store.update()?;

        self.create_gc_record(
            &mut txn,
            &WaitGroupsGcRecord {
                id: request.record_id,
                target: WaitGroupsGcTarget::Namespace(request.namespace_timestamped_id),
            },
        )?;

        txn.commit()?;

        Ok(WaitGroupsDeleteNamespaceResponse)
    }

    /// One bounded GC pass over a page of queue records.
    pub fn run_wait_groups_garbage_collection(
        &self,
        request: RunWaitGroupsGarbageCollectionRequest,
    ) -> Result<RunWaitGroupsGarbageCollectionResponse, CoreError> {
        let mut txn = self.store.update()?;

        let mut total_deleted: i64 = 0;

        let gc_records = self.list_gc_records(&txn, request.gc_records_page_size.max(1) as usize)?;

        for record in &gc_records {
            let limit = request.max_deleted_objects - total_deleted;

            let deleted = match &record.target {
                WaitGroupsGcTarget::Namespace(namespace) => self.gc_sweep_namespace(
                    &mut txn,
                    namespace,
                    request.gc_record_wait_groups_page_size.max(1) as usize,
                    limit,
                )?,
                WaitGroupsGcTarget::WaitGroup(wait_group_id) => {
                    self.gc_delete_jobs(&mut txn, wait_group_id, limit)?
                }
            };

            total_deleted += deleted;

            // Deleting fewer objects than allowed proves this record's work
            // is finished.
            if deleted < limit {
                self.delete_gc_record(&mut txn, record)?;
            }
        }

        debug!(total_deleted, "wait groups gc pass finished");
        txn.commit()?;

        Ok(RunWaitGroupsGarbageCollectionResponse)
    }

    /// Delete up to `limit` job rows of one wait group. Returns how many were
    /// actually deleted; fewer than `limit` means the group has no jobs left.
    fn gc_delete_jobs(
        &self,
        txn: &mut RwTxn,
        wait_group_id: &WaitGroupId,
        limit: i64,
    ) -> Result<i64, CoreError> {
        if limit <= 0 {
            // Budget exhausted; the record stays queued for the next pass.
            return Ok(0);
        }

        let page = self.list_jobs_page(txn, wait_group_id, None, limit as usize)?;
        for job in &page.items {
            self.delete_job_row(txn, &job.id)?;
        }

        Ok(page.items.len() as i64)
    }

    /// Sweep one page of a deleted namespace's wait groups.
    ///
    /// Each group's jobs are reaped under the remaining budget minus the
    /// three bookkeeping objects; only a group whose job sweep finished loses
    /// its expiration-index entry and main row. The namespace counter goes
    /// last. Returns the number of deleted objects, jobs and bookkeeping
    /// included.
    fn gc_sweep_namespace(
        &self,
        txn: &mut RwTxn,
        namespace: &NamespaceTimestampedId,
        wait_groups_page_size: usize,
        max_deleted_objects: i64,
    ) -> Result<i64, CoreError> {
        let mut deleted: i64 = 0;

        let page = self.list_wait_groups_page(txn, namespace, None, wait_groups_page_size)?;

        for wait_group in &page.items {
            let limit = max_deleted_objects - deleted - 3;

            let deleted_jobs = self.gc_delete_jobs(txn, &wait_group.id, limit)?;
            deleted += deleted_jobs;

            if deleted_jobs < limit {
                // All of this group's jobs are gone; the reserved three
                // bookkeeping deletes follow. The expiration-index delete
                // tolerates absence (no entry is ever written for a wait
                // group).
                self.delete_expiration_entry(txn, wait_group.expires_at, &wait_group.id)?;
                deleted += 1;

                self.delete_wait_group_row(txn, &wait_group.id)?;
                deleted += 1;
            }
        }

        self.delete_counters(txn, namespace)?;
        deleted += 1;

        Ok(deleted)
    }
}
