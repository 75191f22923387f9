//! Semaphore acquisition and release.

use rook_store::StoreError;

use super::AcquireSemaphoreRequest;
use super::AcquireSemaphoreResponse;
use super::ReleaseSemaphoreRequest;
use super::ReleaseSemaphoreResponse;
use super::SemaphoreHolder;
use super::SemaphoresCore;
use crate::error::CoreError;

impl SemaphoresCore {
    /// Take (or renew) one seat of the semaphore.
    ///
    /// A process that already holds a seat gets its expiration extended;
    /// otherwise a seat is granted while `holders < permits`. A full
    /// semaphore fails the acquire, but the refreshed state is persisted
    /// either way: the expiration check's cleanup survives even a failed
    /// call.
    pub fn acquire_semaphore(
        &self,
        request: AcquireSemaphoreRequest,
    ) -> Result<AcquireSemaphoreResponse, CoreError> {
        let mut txn = self.store.update()?;

        let semaphore = match self.load_semaphore(&txn, &request.semaphore_id) {
            Ok(semaphore) => semaphore,
            Err(StoreError::NotFound) => {
                return Err(super::semaphore_not_found(&request.semaphore_id));
            }
            Err(err) => return Err(err.into()),
        };

        let old_expires_at = semaphore.earliest_expiration();
        let mut updated = semaphore.refreshed(request.now);

        let mut success = false;

        match updated.holders.iter_mut().find(|holder| holder.process_id == request.process_id) {
            Some(existing) => {
                // Extend the existing seat.
                existing.expires_at = request.expires_at;
                existing.locked_at = request.now;
                success = true;
            }
            None => {
                if updated.permits > updated.holders.len() as u64 {
                    updated.holders.push(SemaphoreHolder {
                        process_id: request.process_id.clone(),
                        locked_at: request.now,
                        expires_at: request.expires_at,
                    });
                    success = true;
                }
            }
        }

        self.update_expiration_index(
            &mut txn,
            &updated.id,
            old_expires_at,
            updated.earliest_expiration(),
        )?;
        self.set_semaphore(&mut txn, &updated)?;

        txn.commit()?;

        Ok(AcquireSemaphoreResponse { semaphore: updated, success })
    }

    /// Give back the caller's seat. Releasing a seat the caller does not
    /// hold is a silent no-op; the refreshed semaphore is returned either
    /// way.
    pub fn release_semaphore(
        &self,
        request: ReleaseSemaphoreRequest,
    ) -> Result<ReleaseSemaphoreResponse, CoreError> {
        let mut txn = self.store.update()?;

        let semaphore = match self.load_semaphore(&txn, &request.semaphore_id) {
            Ok(semaphore) => semaphore,
            Err(StoreError::NotFound) => {
                return Err(super::semaphore_not_found(&request.semaphore_id));
            }
            Err(err) => return Err(err.into()),
        };

        let old_expires_at = semaphore.earliest_expiration();
        let mut updated = semaphore.refreshed(request.now);

        updated.holders.retain(|holder| holder.process_id != request.process_id);

        self.update_expiration_index(
            &mut txn,
            &updated.id,
            old_expires_at,
            updated.earliest_expiration(),
        )?;
        self.set_semaphore(&mut txn, &updated)?;

        txn.commit()?;

        Ok(ReleaseSemaphoreResponse { semaphore: updated })
    }
}
