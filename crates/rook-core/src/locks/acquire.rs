//! Lock acquisition.

use rook_store::StoreError;

use super::AcquireLockRequest;
use super::AcquireLockResponse;
use super::Lock;
use super::LockHolder;
use super::LockState;
use super::LocksCore;
use crate::error::CoreError;

impl LocksCore {
    /// Acquire (or extend) a read or write lock.
    ///
    /// A missing lock is synthesized as `Unlocked` and its namespace counter
    /// is incremented only when this call actually creates the row, checked
    /// against `max_number_of_locks_per_namespace` first. Re-acquire by a
    /// process that already holds the lock is idempotent and renews its
    /// expiration. A conflicting acquire fails without mutating anything and
    /// still returns the refreshed lock state.
    pub fn acquire_lock(&self, request: AcquireLockRequest) -> Result<AcquireLockResponse, CoreError> {
        let mut txn = self.store.update()?;

        let namespace = request.lock_id.namespace_timestamped_id();
        let mut counters = self.load_counters(&txn, &namespace)?;

        let lock = match self.load_lock(&txn, &request.lock_id) {
            Ok(lock) => lock,
            Err(StoreError::NotFound) => {
                // Increment only when a new lock row is really created.
                counters.number_of_locks += 1;

                if counters.number_of_locks > request.max_number_of_locks_per_namespace {
                    return Err(CoreError::resource_exhausted(
                        "max number of locks per namespace reached",
                        &[("limit", &request.max_number_of_locks_per_namespace.to_string())],
                    ));
                }

                Lock::unlocked(request.lock_id.clone())
            }
            Err(err) => return Err(err.into()),
        };

        let old_expires_at = lock.earliest_expiration();
        let mut updated = lock.refreshed(request.now);

        let holder = LockHolder {
            process_id: request.process_id.clone(),
            locked_at: request.now,
            expires_at: request.expires_at,
        };

        match updated.state {
            LockState::Unlocked => {
                if request.write_lock {
                    updated.state = LockState::WriteLocked;
                    updated.write_lock_holder = Some(holder);
                } else {
                    updated.state = LockState::ReadLocked;
                    updated.read_lock_holders = vec![holder];
                }
                updated.locked_at = request.now;
            }
            LockState::ReadLocked => {
                if request.write_lock {
                    // Held for reads; cannot be locked for writes.
                    return Ok(AcquireLockResponse { lock: updated, success: false });
                }
                match updated
                    .read_lock_holders
                    .iter_mut()
                    .find(|existing| existing.process_id == request.process_id)
                {
                    Some(existing) => {
                        // Extend the existing hold.
                        existing.expires_at = request.expires_at;
                        existing.locked_at = request.now;
                    }
                    None => updated.read_lock_holders.push(holder),
                }
            }
            LockState::WriteLocked => {
                let extended = request.write_lock
                    && match updated.write_lock_holder.as_mut() {
                        Some(writer) if writer.process_id == request.process_id => {
                            // Repeated write locks by the holder are renewing.
                            writer.expires_at = request.expires_at;
                            writer.locked_at = request.now;
                            true
                        }
                        _ => false,
                    };
                if !extended {
                    // Held for writes by another process, or a read was
                    // requested against a write lock.
                    return Ok(AcquireLockResponse { lock: updated, success: false });
                }
            }
        }

        self.set_lock(&mut txn, &updated)?;
        self.update_expiration_index(
            &mut txn,
            &updated.id,
            old_expires_at,
            updated.earliest_expiration(),
        )?;
        self.set_counters(&mut txn, &counters)?;

        txn.commit()?;

        Ok(AcquireLockResponse { lock: updated, success: true })
    }
}
