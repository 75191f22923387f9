//! Per-account service limits.
//!
//! The gateway resolves an account's limits and copies the relevant field
//! into each core request. The cores enforce the namespace, lock, semaphore,
//! and wait-group cardinality limits plus the wait-group size; holder counts
//! and request rates are advisory here and enforced at the gateway.

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLimits {
    pub max_number_of_namespaces: i64,
    pub max_number_of_wait_groups_per_namespace: i64,
    pub max_number_of_locks_per_namespace: i64,
    pub max_number_of_semaphores_per_namespace: i64,
    pub max_number_of_read_lock_holders: i64,
    pub max_number_of_semaphore_holders: i64,
    pub max_wait_group_size: i64,
    pub control_plane_read_request_rate: i64,
    pub control_plane_update_request_rate: i64,
    pub data_plane_request_rate: i64,
}
