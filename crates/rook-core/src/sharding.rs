//! Shard-key derivation and the request-to-shard routing contract.
//!
//! A shard owns a contiguous 4-byte key range; every table key leads with a
//! shard key derived here, so an entity's placement is a pure function of its
//! identifiers. Namespace-scoped requests hash the account id alone; every
//! per-primitive request hashes `(account_id, namespace_name)` so that all of
//! a namespace's locks, semaphores, and wait groups land on one shard.
//!
//! The mapping below is part of the compatibility contract: changing either
//! hash input or which hash a request type uses strands existing data on the
//! wrong shard.

use rook_store::keys::KeyBuf;
use rook_store::keys::SHARD_KEY_LEN;
use rook_store::keys::shard_key;

use crate::locks;
use crate::namespaces;
use crate::semaphores;
use crate::wait_groups;

pub fn shard_by_account(account_id: u64) -> [u8; SHARD_KEY_LEN] {
    shard_key(&KeyBuf::new().u64(account_id).build())
}

pub fn shard_by_account_and_namespace(
    account_id: u64,
    namespace_name: &str,
) -> [u8; SHARD_KEY_LEN] {
    shard_key(&KeyBuf::new().u64(account_id).str(namespace_name).build())
}

/// Pure request-to-shard-key mapping, consumed by the request router.
pub struct ShardKeyCalculator;

impl ShardKeyCalculator {
    pub fn create_namespace(request: &namespaces::CreateNamespaceRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account(request.account_id)
    }

    pub fn get_namespace(request: &namespaces::GetNamespaceRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account(request.namespace_id.account_id)
    }

    pub fn update_namespace(request: &namespaces::UpdateNamespaceRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account(request.namespace_id.account_id)
    }

    pub fn delete_namespace(request: &namespaces::DeleteNamespaceRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account(request.namespace_id.account_id)
    }

    pub fn list_namespaces(request: &namespaces::ListNamespacesRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account(request.account_id)
    }

    pub fn acquire_lock(request: &locks::AcquireLockRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(request.lock_id.account_id, &request.lock_id.namespace_name)
    }

    pub fn release_lock(request: &locks::ReleaseLockRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(request.lock_id.account_id, &request.lock_id.namespace_name)
    }

    pub fn get_lock(request: &locks::GetLockRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(request.lock_id.account_id, &request.lock_id.namespace_name)
    }

    pub fn delete_lock(request: &locks::DeleteLockRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(request.lock_id.account_id, &request.lock_id.namespace_name)
    }

    pub fn list_locks(request: &locks::ListLocksRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.namespace_timestamped_id.account_id,
            &request.namespace_timestamped_id.namespace_name,
        )
    }

    pub fn locks_delete_namespace(
        request: &locks::LocksDeleteNamespaceRequest,
    ) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.namespace_timestamped_id.account_id,
            &request.namespace_timestamped_id.namespace_name,
        )
    }

    pub fn create_semaphore(request: &semaphores::CreateSemaphoreRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.namespace_timestamped_id.account_id,
            &request.namespace_timestamped_id.namespace_name,
        )
    }

    pub fn update_semaphore(request: &semaphores::UpdateSemaphoreRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.semaphore_id.account_id,
            &request.semaphore_id.namespace_name,
        )
    }

    pub fn get_semaphore(request: &semaphores::GetSemaphoreRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.semaphore_id.account_id,
            &request.semaphore_id.namespace_name,
        )
    }

    pub fn delete_semaphore(request: &semaphores::DeleteSemaphoreRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.semaphore_id.account_id,
            &request.semaphore_id.namespace_name,
        )
    }

    pub fn acquire_semaphore(request: &semaphores::AcquireSemaphoreRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.semaphore_id.account_id,
            &request.semaphore_id.namespace_name,
        )
    }

    pub fn release_semaphore(request: &semaphores::ReleaseSemaphoreRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.semaphore_id.account_id,
            &request.semaphore_id.namespace_name,
        )
    }

    pub fn list_semaphores(request: &semaphores::ListSemaphoresRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.namespace_timestamped_id.account_id,
            &request.namespace_timestamped_id.namespace_name,
        )
    }

    pub fn semaphores_delete_namespace(
        request: &semaphores::SemaphoresDeleteNamespaceRequest,
    ) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.namespace_timestamped_id.account_id,
            &request.namespace_timestamped_id.namespace_name,
        )
    }

    pub fn create_wait_group(request: &wait_groups::CreateWaitGroupRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.namespace_timestamped_id.account_id,
            &request.namespace_timestamped_id.namespace_name,
        )
    }

    pub fn get_wait_group(request: &wait_groups::GetWaitGroupRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.wait_group_id.account_id,
            &request.wait_group_id.namespace_name,
        )
    }

    pub fn delete_wait_group(request: &wait_groups::DeleteWaitGroupRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.wait_group_id.account_id,
            &request.wait_group_id.namespace_name,
        )
    }

    pub fn add_jobs_to_wait_group(
        request: &wait_groups::AddJobsToWaitGroupRequest,
    ) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.wait_group_id.account_id,
            &request.wait_group_id.namespace_name,
        )
    }

    pub fn complete_jobs_from_wait_group(
        request: &wait_groups::CompleteJobsFromWaitGroupRequest,
    ) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.wait_group_id.account_id,
            &request.wait_group_id.namespace_name,
        )
    }

    pub fn list_wait_groups(request: &wait_groups::ListWaitGroupsRequest) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.namespace_timestamped_id.account_id,
            &request.namespace_timestamped_id.namespace_name,
        )
    }

    pub fn wait_groups_delete_namespace(
        request: &wait_groups::WaitGroupsDeleteNamespaceRequest,
    ) -> [u8; SHARD_KEY_LEN] {
        shard_by_account_and_namespace(
            request.namespace_timestamped_id.account_id,
            &request.namespace_timestamped_id.namespace_name,
        )
    }
}
