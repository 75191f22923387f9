//! Lock release.

use rook_store::StoreError;

use super::Lock;
use super::LockState;
use super::LocksCore;
use super::ReleaseLockRequest;
use super::ReleaseLockResponse;
use crate::error::CoreError;

impl LocksCore {
    /// Release the caller's hold on a lock.
    ///
    /// Idempotent over absent locks (returns a synthesized `Unlocked` lock).
    /// Releasing a write lock held by a different process is a silent no-op:
    /// the caller sees the unchanged lock. A lock whose holders all expired
    /// by `request.now` is reclaimed here regardless of who asks.
    pub fn release_lock(&self, request: ReleaseLockRequest) -> Result<ReleaseLockResponse, CoreError> {
        let mut txn = self.store.update()?;

        let namespace = request.lock_id.namespace_timestamped_id();
        let mut counters = self.load_counters(&txn, &namespace)?;

        let lock = match self.load_lock(&txn, &request.lock_id) {
            Ok(lock) => lock,
            Err(StoreError::NotFound) => {
                return Ok(ReleaseLockResponse { lock: Lock::unlocked(request.lock_id) });
            }
            Err(err) => return Err(err.into()),
        };

        let old_expires_at = lock.earliest_expiration();
        let mut updated = lock.refreshed(request.now);

        match updated.state {
            LockState::Unlocked => {
                // Expired before this release arrived; reclaim the row.
                self.update_expiration_index(&mut txn, &updated.id, old_expires_at, 0)?;
                self.delete_lock_row(&mut txn, &updated.id)?;
                counters.number_of_locks -= 1;
            }
            LockState::ReadLocked => {
                updated.read_lock_holders.retain(|holder| holder.process_id != request.process_id);

                if updated.read_lock_holders.is_empty() {
                    updated.state = LockState::Unlocked;
                    updated.locked_at = 0;

                    self.update_expiration_index(&mut txn, &updated.id, old_expires_at, 0)?;
                    self.delete_lock_row(&mut txn, &updated.id)?;
                    counters.number_of_locks -= 1;
                } else {
                    self.update_expiration_index(
                        &mut txn,
                        &updated.id,
                        old_expires_at,
                        updated.earliest_expiration(),
                    )?;
                    self.set_lock(&mut txn, &updated)?;
                }
            }
            LockState::WriteLocked => {
                let held_by_caller = updated
                    .write_lock_holder
                    .as_ref()
                    .is_some_and(|writer| writer.process_id == request.process_id);

                if held_by_caller {
                    updated.state = LockState::Unlocked;
                    updated.locked_at = 0;
                    updated.write_lock_holder = None;

                    self.update_expiration_index(&mut txn, &updated.id, old_expires_at, 0)?;
                    self.delete_lock_row(&mut txn, &updated.id)?;
                    counters.number_of_locks -= 1;
                }
            }
        }

        self.set_counters(&mut txn, &counters)?;

        txn.commit()?;

        Ok(ReleaseLockResponse { lock: updated })
    }
}
