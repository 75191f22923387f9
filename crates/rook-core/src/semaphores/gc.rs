//! Semaphore garbage collection.
//!
//! Phase A consumes the namespace-deletion queue exactly like the locks core.
//! Phase B differs: an expired-holder sweep rewrites semaphore rows rather
//! than deleting them — a semaphore with zero live holders keeps its row (and
//! loses its expiration-index entry) until an explicit delete or namespace
//! sweep removes it.

use tracing::debug;

use super::RunSemaphoresGarbageCollectionRequest;
use super::RunSemaphoresGarbageCollectionResponse;
use super::SemaphoresCore;
use super::SemaphoresDeleteNamespaceRequest;
use super::SemaphoresDeleteNamespaceResponse;
use super::SemaphoresGcRecord;
use crate::error::CoreError;

impl SemaphoresCore {
    /// Enqueue a GC record for a deleted namespace; idempotent per
    /// `record_id`.
    pub fn semaphores_delete_namespace(
        &self,
        request: SemaphoresDeleteNamespaceRequest,
    ) -> Result<SemaphoresDeleteNamespaceResponse, CoreError> {
        let mut txn = self.store.update()?;

        self.create_gc_record(
            &mut txn,
            &SemaphoresGcRecord {
                id: request.record_id,
                namespace_timestamped_id: request.namespace_timestamped_id,
            },
        )?;

        txn.commit()?;

        Ok(SemaphoresDeleteNamespaceResponse)
    }

    /// One bounded GC pass; stops once `max_visited_semaphores` rows were
    /// touched.
    pub fn run_semaphores_garbage_collection(
        &self,
        request: RunSemaphoresGarbageCollectionRequest,
    ) -> Result<RunSemaphoresGarbageCollectionResponse, CoreError> {
        let mut txn = self.store.update()?;

        let mut visited: i64 = 0;

        // Phase A: sweep deleted namespaces.
        let gc_records = self.list_gc_records(&txn, request.gc_records_page_size.max(1) as usize)?;

        for record in &gc_records {
            self.delete_counters(&mut txn, &record.namespace_timestamped_id)?;

            let page = self.list_semaphores_page(
                &txn,
                &record.namespace_timestamped_id,
                None,
                request.gc_record_semaphores_page_size.max(1) as usize,
            )?;

            for semaphore in &page.items {
                visited += 1;

                self.delete_expiration_entry(&mut txn, semaphore.earliest_expiration(), &semaphore.id)?;
                self.delete_semaphore_row(&mut txn, &semaphore.id)?;

                if visited >= request.max_visited_semaphores {
                    debug!(visited, "semaphores gc budget exhausted mid-namespace");
                    txn.commit()?;
                    return Ok(RunSemaphoresGarbageCollectionResponse);
                }
            }

            if page.next.is_none() {
                self.delete_gc_record(&mut txn, record)?;
            }
        }

        // Phase B: rewrite semaphores whose earliest expiration passed.
        if visited < request.max_visited_semaphores {
            let remaining = (request.max_visited_semaphores - visited) as usize;
            let entries = self.expired_index_entries(&txn, request.now, remaining)?;

            for entry in &entries {
                visited += 1;

                let semaphore = self.load_semaphore(&txn, &entry.semaphore_id)?;

                let old_expires_at = semaphore.earliest_expiration();
                let refreshed = semaphore.refreshed(request.now);
                let new_expires_at = refreshed.earliest_expiration();
                debug_assert!(
                    old_expires_at != new_expires_at,
                    "SEMAPHORES: an indexed expiration at or before now must move on refresh"
                );

                self.update_expiration_index(
                    &mut txn,
                    &entry.semaphore_id,
                    old_expires_at,
                    new_expires_at,
                )?;
                // The row survives holder expiration; only its holder list
                // shrinks.
                self.set_semaphore(&mut txn, &refreshed)?;
            }
        }

        debug!(visited, "semaphores gc pass finished");
        txn.commit()?;

        Ok(RunSemaphoresGarbageCollectionResponse)
    }
}
