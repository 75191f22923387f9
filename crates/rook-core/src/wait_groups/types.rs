//! Wait-group types.

use rook_store::PaginationToken;
use serde::Deserialize;
use serde::Serialize;

use crate::types::NamespaceTimestampedId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitGroupId {
    pub account_id: u64,
    pub namespace_name: String,
    pub namespace_created_at: i64,
    pub wait_group_name: String,
}

impl WaitGroupId {
    pub fn namespace_timestamped_id(&self) -> NamespaceTimestampedId {
        NamespaceTimestampedId {
            account_id: self.account_id,
            namespace_name: self.namespace_name.clone(),
            namespace_created_at: self.namespace_created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitGroupJobId {
    pub account_id: u64,
    pub namespace_name: String,
    pub namespace_created_at: i64,
    pub wait_group_name: String,
    pub process_id: String,
}

/// A wait group: a monotonic target `counter` and a `completed` count of
/// distinct finished processes.
///
/// `expires_at` is stored for external presentation but consulted by no core
/// operation; wait groups are only deleted explicitly or by namespace GC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitGroup {
    pub id: WaitGroupId,
    pub description: String,
    pub counter: u64,
    pub completed: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
}

/// Presence of a job row is the completion dedup marker for its process id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitGroupJob {
    pub id: WaitGroupJobId,
    pub completed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitGroupsCounter {
    pub namespace_timestamped_id: NamespaceTimestampedId,
    pub number_of_wait_groups: i64,
}

/// What a wait-groups GC record asks to delete: a whole namespace's wait
/// groups and jobs, or the job rows left behind by one deleted group.
///
/// The GC dispatch site matches exhaustively on this; a new case cannot be
/// silently ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WaitGroupsGcTarget {
    Namespace(NamespaceTimestampedId),
    WaitGroup(WaitGroupId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitGroupsGcRecord {
    pub id: u64,
    pub target: WaitGroupsGcTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitGroupsExpirationIndexRecord {
    pub expires_at: i64,
    pub wait_group_id: WaitGroupId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateWaitGroupRequest {
    pub namespace_timestamped_id: NamespaceTimestampedId,
    pub name: String,
    pub description: String,
    pub counter: u64,
    pub expires_at: i64,
    pub now: i64,
    pub max_number_of_wait_groups_per_namespace: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateWaitGroupResponse {
    pub wait_group: WaitGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetWaitGroupRequest {
    pub wait_group_id: WaitGroupId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetWaitGroupResponse {
    pub wait_group: WaitGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListWaitGroupsRequest {
    pub namespace_timestamped_id: NamespaceTimestampedId,
    pub pagination_token: Option<PaginationToken>,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListWaitGroupsResponse {
    pub wait_groups: Vec<WaitGroup>,
    pub next_pagination_token: Option<PaginationToken>,
    pub previous_pagination_token: Option<PaginationToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddJobsToWaitGroupRequest {
    pub wait_group_id: WaitGroupId,
    /// How many jobs to add to the target counter.
    pub counter: u64,
    pub now: i64,
    pub max_wait_group_size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddJobsToWaitGroupResponse {
    pub wait_group: WaitGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteJobsFromWaitGroupRequest {
    pub wait_group_id: WaitGroupId,
    pub process_ids: Vec<String>,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteJobsFromWaitGroupResponse {
    pub wait_group: WaitGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteWaitGroupRequest {
    pub wait_group_id: WaitGroupId,
    pub record_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteWaitGroupResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitGroupsDeleteNamespaceRequest {
    pub namespace_timestamped_id: NamespaceTimestampedId,
    pub record_id: u64,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitGroupsDeleteNamespaceResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunWaitGroupsGarbageCollectionRequest {
    pub now: i64,
    pub gc_records_page_size: i64,
    pub gc_record_wait_groups_page_size: i64,
    pub max_deleted_objects: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunWaitGroupsGarbageCollectionResponse;
