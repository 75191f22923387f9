//! Lock garbage collection.
//!
//! One GC pass does bounded work in a single transaction. Phase A consumes
//! the namespace-deletion queue: for each GC record, delete the namespace's
//! counter and one page of its locks; the record is removed only once a pass
//! observes the final page, so partially-swept namespaces resume on the next
//! tick. Phase B, with whatever budget remains, walks the expiration index up
//! to `now` and reclaims or rewrites locks with expired holders.
//!
//! The scan order is fixed by the key codec (timestamp, then account,
//! namespace, creation time, lock name), so every replica applying the same
//! GC request computes the same writes.

use tracing::debug;

use super::LockState;
use super::LocksCore;
use super::LocksDeleteNamespaceRequest;
use super::LocksDeleteNamespaceResponse;
use super::LocksGcRecord;
use super::RunLocksGarbageCollectionRequest;
use super::RunLocksGarbageCollectionResponse;
use crate::error::CoreError;

impl LocksCore {
    /// Enqueue a GC record for a deleted namespace. Overwriting an existing
    /// record with the same `record_id` makes retries idempotent.
    pub fn locks_delete_namespace(
        &self,
        request: LocksDeleteNamespaceRequest,
    ) -> Result<LocksDeleteNamespaceResponse, CoreError> {
        let mut txn = self.store.update()?;

        self.create_gc_record(
            &mut txn,
            &LocksGcRecord {
                id: request.record_id,
                namespace_timestamped_id: request.namespace_timestamped_id,
            },
        )?;

        txn.commit()?;

        Ok(LocksDeleteNamespaceResponse)
    }

    /// One bounded GC pass; stops once `max_visited_locks` rows were touched.
    pub fn run_locks_garbage_collection(
        &self,
        request: RunLocksGarbageCollectionRequest,
    ) -> Result<RunLocksGarbageCollectionResponse, CoreError> {
        let mut txn = self.store.update()?;

        let mut visited: i64 = 0;

        // Phase A: sweep deleted namespaces.
        let gc_records = self.list_gc_records(&txn, request.gc_records_page_size.max(1) as usize)?;

        for record in &gc_records {
            // Tolerates an already-deleted counter.
            self.delete_counters(&mut txn, &record.namespace_timestamped_id)?;

            let page = self.list_locks_page(
                &txn,
                &record.namespace_timestamped_id,
                None,
                request.gc_record_locks_page_size.max(1) as usize,
            )?;

            for lock in &page.items {
                visited += 1;

                self.delete_expiration_entry(&mut txn, lock.earliest_expiration(), &lock.id)?;
                self.delete_lock_row(&mut txn, &lock.id)?;

                if visited >= request.max_visited_locks {
                    debug!(visited, "locks gc budget exhausted mid-namespace");
                    txn.commit()?;
                    return Ok(RunLocksGarbageCollectionResponse);
                }
            }

            // Keep the record while more pages remain so the next pass
            // resumes this namespace.
            if page.next.is_none() {
                self.delete_gc_record(&mut txn, record)?;
            }
        }

        // Phase B: reclaim locks whose earliest expiration passed.
        if visited < request.max_visited_locks {
            let remaining = (request.max_visited_locks - visited) as usize;
            let entries = self.expired_index_entries(&txn, request.now, remaining)?;

            for entry in &entries {
                visited += 1;

                // An index entry without its row means the index invariant
                // broke; the resulting NotFound aborts the apply loop.
                let lock = self.load_lock(&txn, &entry.lock_id)?;

                let old_expires_at = lock.earliest_expiration();
                let refreshed = lock.refreshed(request.now);
                let new_expires_at = refreshed.earliest_expiration();
                debug_assert!(
                    old_expires_at != new_expires_at,
                    "LOCKS: an indexed expiration at or before now must move on refresh"
                );

                if refreshed.state == LockState::Unlocked {
                    let mut counters =
                        self.load_counters(&txn, &entry.lock_id.namespace_timestamped_id())?;

                    self.update_expiration_index(&mut txn, &entry.lock_id, old_expires_at, 0)?;
                    self.delete_lock_row(&mut txn, &entry.lock_id)?;

                    counters.number_of_locks -= 1;
                    self.set_counters(&mut txn, &counters)?;
                } else {
                    self.update_expiration_index(
                        &mut txn,
                        &entry.lock_id,
                        old_expires_at,
                        new_expires_at,
                    )?;
                    self.set_lock(&mut txn, &refreshed)?;
                }
            }
        }

        debug!(visited, "locks gc pass finished");
        txn.commit()?;

        Ok(RunLocksGarbageCollectionResponse)
    }
}
