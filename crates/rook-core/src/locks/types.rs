//! Lock state machine types.

use rook_store::PaginationToken;
use serde::Deserialize;
use serde::Serialize;

use crate::types::NamespaceTimestampedId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockId {
    pub account_id: u64,
    pub namespace_name: String,
    pub namespace_created_at: i64,
    pub lock_name: String,
}

impl LockId {
    pub fn namespace_timestamped_id(&self) -> NamespaceTimestampedId {
        NamespaceTimestampedId {
            account_id: self.account_id,
            namespace_name: self.namespace_name.clone(),
            namespace_created_at: self.namespace_created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    Unlocked,
    ReadLocked,
    WriteLocked,
}

/// One occupant of a lock: the single writer, or one of the readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub process_id: String,
    pub locked_at: i64,
    pub expires_at: i64,
}

/// An advisory read/write lock.
///
/// An unlocked lock has no row in the store; absence and `Lock::unlocked` are
/// the same state. Invariants:
///
/// - `WriteLocked`: exactly one `write_lock_holder`, no `read_lock_holders`.
/// - `ReadLocked`: at least one `read_lock_holder`, no `write_lock_holder`.
/// - every holder has `expires_at > 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    pub id: LockId,
    pub state: LockState,
    pub locked_at: i64,
    pub write_lock_holder: Option<LockHolder>,
    pub read_lock_holders: Vec<LockHolder>,
}

impl Lock {
    /// The state an absent row represents.
    pub fn unlocked(id: LockId) -> Lock {
        Lock {
            id,
            state: LockState::Unlocked,
            locked_at: 0,
            write_lock_holder: None,
            read_lock_holders: Vec::new(),
        }
    }

    /// Copy of this lock with every holder expired at `now` removed.
    ///
    /// A write lock whose holder expired, or a read lock with no surviving
    /// holders, drops to `Unlocked` with `locked_at` cleared. Invoked on every
    /// read and mutation; `now` always comes from the request.
    pub fn refreshed(&self, now: i64) -> Lock {
        let mut result = self.clone();

        match self.state {
            LockState::Unlocked => {}
            LockState::ReadLocked => {
                result.read_lock_holders.retain(|holder| holder.expires_at > now);
                if result.read_lock_holders.is_empty() {
                    result.state = LockState::Unlocked;
                    result.locked_at = 0;
                }
            }
            LockState::WriteLocked => {
                let expired = result
                    .write_lock_holder
                    .as_ref()
                    .is_some_and(|holder| holder.expires_at <= now);
                if expired {
                    result.state = LockState::Unlocked;
                    result.write_lock_holder = None;
                    result.locked_at = 0;
                }
            }
        }

        result
    }

    /// Earliest `expires_at` across current holders; 0 when unlocked.
    ///
    /// This is the timestamp of the lock's expiration-index entry.
    pub fn earliest_expiration(&self) -> i64 {
        match self.state {
            LockState::Unlocked => 0,
            LockState::ReadLocked => {
                self.read_lock_holders.iter().map(|holder| holder.expires_at).min().unwrap_or(0)
            }
            LockState::WriteLocked => {
                self.write_lock_holder.as_ref().map(|holder| holder.expires_at).unwrap_or(0)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocksCounter {
    pub namespace_timestamped_id: NamespaceTimestampedId,
    pub number_of_locks: i64,
}

/// Queue entry requesting the asynchronous deletion of one namespace's locks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocksGcRecord {
    pub id: u64,
    pub namespace_timestamped_id: NamespaceTimestampedId,
}

/// Entry of the per-shard expiration index: the key carries the earliest
/// holder expiration, the value points back at the lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocksExpirationIndexRecord {
    pub expires_at: i64,
    pub lock_id: LockId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquireLockRequest {
    pub lock_id: LockId,
    pub process_id: String,
    pub write_lock: bool,
    pub expires_at: i64,
    pub now: i64,
    pub max_number_of_locks_per_namespace: i64,
}

/// A failed acquire still returns the current (refreshed) lock state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquireLockResponse {
    pub lock: Lock,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseLockRequest {
    pub lock_id: LockId,
    pub process_id: String,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseLockResponse {
    pub lock: Lock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetLockRequest {
    pub lock_id: LockId,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetLockResponse {
    pub lock: Lock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteLockRequest {
    pub lock_id: LockId,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteLockResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListLocksRequest {
    pub namespace_timestamped_id: NamespaceTimestampedId,
    pub now: i64,
    pub pagination_token: Option<PaginationToken>,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListLocksResponse {
    pub locks: Vec<Lock>,
    pub next_pagination_token: Option<PaginationToken>,
    pub previous_pagination_token: Option<PaginationToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocksDeleteNamespaceRequest {
    pub namespace_timestamped_id: NamespaceTimestampedId,
    pub record_id: u64,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocksDeleteNamespaceResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLocksGarbageCollectionRequest {
    pub now: i64,
    pub gc_records_page_size: i64,
    pub gc_record_locks_page_size: i64,
    pub max_visited_locks: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLocksGarbageCollectionResponse;
