//! Semaphore types.

use rook_store::PaginationToken;
use serde::Deserialize;
use serde::Serialize;

use crate::types::NamespaceTimestampedId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreId {
    pub account_id: u64,
    pub namespace_name: String,
    pub namespace_created_at: i64,
    pub semaphore_name: String,
}

impl SemaphoreId {
    pub fn namespace_timestamped_id(&self) -> NamespaceTimestampedId {
        NamespaceTimestampedId {
            account_id: self.account_id,
            namespace_name: self.namespace_name.clone(),
            namespace_created_at: self.namespace_created_at,
        }
    }
}

/// One seat of a semaphore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreHolder {
    pub process_id: String,
    pub locked_at: i64,
    pub expires_at: i64,
}

/// A counting semaphore.
///
/// Unlike locks, semaphore rows are created explicitly and persist with zero
/// holders; only an explicit delete or namespace GC removes them. Invariant:
/// after the implicit expiration check applied on read,
/// `holders.len() <= permits`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Semaphore {
    pub id: SemaphoreId,
    pub description: String,
    pub permits: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub holders: Vec<SemaphoreHolder>,
}

impl Semaphore {
    /// Copy of this semaphore with every holder expired at `now` removed.
    pub fn refreshed(&self, now: i64) -> Semaphore {
        let mut result = self.clone();
        result.holders.retain(|holder| holder.expires_at > now);
        result
    }

    /// Earliest `expires_at` across current holders; 0 with no holders (and
    /// then the semaphore has no expiration-index entry).
    pub fn earliest_expiration(&self) -> i64 {
        self.holders.iter().map(|holder| holder.expires_at).min().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemaphoresCounter {
    pub namespace_timestamped_id: NamespaceTimestampedId,
    pub number_of_semaphores: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemaphoresGcRecord {
    pub id: u64,
    pub namespace_timestamped_id: NamespaceTimestampedId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemaphoresExpirationIndexRecord {
    pub expires_at: i64,
    pub semaphore_id: SemaphoreId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSemaphoreRequest {
    pub namespace_timestamped_id: NamespaceTimestampedId,
    pub name: String,
    pub description: String,
    pub permits: u64,
    pub now: i64,
    pub max_number_of_semaphores_per_namespace: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSemaphoreResponse {
    pub semaphore: Semaphore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSemaphoreRequest {
    pub semaphore_id: SemaphoreId,
    pub description: String,
    pub permits: u64,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSemaphoreResponse {
    pub semaphore: Semaphore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetSemaphoreRequest {
    pub semaphore_id: SemaphoreId,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetSemaphoreResponse {
    pub semaphore: Semaphore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteSemaphoreRequest {
    pub semaphore_id: SemaphoreId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteSemaphoreResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSemaphoresRequest {
    pub namespace_timestamped_id: NamespaceTimestampedId,
    pub pagination_token: Option<PaginationToken>,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSemaphoresResponse {
    pub semaphores: Vec<Semaphore>,
    pub next_pagination_token: Option<PaginationToken>,
    pub previous_pagination_token: Option<PaginationToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquireSemaphoreRequest {
    pub semaphore_id: SemaphoreId,
    pub process_id: String,
    pub expires_at: i64,
    pub now: i64,
}

/// A failed acquire still returns (and persists) the refreshed semaphore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquireSemaphoreResponse {
    pub semaphore: Semaphore,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSemaphoreRequest {
    pub semaphore_id: SemaphoreId,
    pub process_id: String,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSemaphoreResponse {
    pub semaphore: Semaphore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemaphoresDeleteNamespaceRequest {
    pub namespace_timestamped_id: NamespaceTimestampedId,
    pub record_id: u64,
    pub now: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemaphoresDeleteNamespaceResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSemaphoresGarbageCollectionRequest {
    pub now: i64,
    pub gc_records_page_size: i64,
    pub gc_record_semaphores_page_size: i64,
    pub max_visited_semaphores: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSemaphoresGarbageCollectionResponse;
