//! Identifiers and helpers shared by all cores.

use serde::Deserialize;
use serde::Serialize;

/// Default page size when a list request passes no limit.
pub const DEFAULT_PAGE_LIMIT: usize = 100;
/// Hard ceiling on a single list page.
pub const MAX_PAGE_LIMIT: usize = 250;

/// The parent key of every child entity: the namespace pair plus the
/// namespace's creation timestamp.
///
/// The timestamp discriminates recreations. Deleting a namespace and
/// recreating the same name produces a logically distinct parent, so orphaned
/// children awaiting GC can never be resurrected by the new namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceTimestampedId {
    pub account_id: u64,
    pub namespace_name: String,
    pub namespace_created_at: i64,
}

/// Clamp a requested page limit into `[1, MAX_PAGE_LIMIT]`, defaulting
/// non-positive requests to [`DEFAULT_PAGE_LIMIT`].
pub fn clamped_limit(requested: i64) -> usize {
    if requested <= 0 {
        DEFAULT_PAGE_LIMIT
    } else if requested >= MAX_PAGE_LIMIT as i64 {
        MAX_PAGE_LIMIT
    } else {
        requested as usize
    }
}
