//! Deterministic per-shard state machines for the rook coordination service.
//!
//! Four cores own all primitive state, each over its own slice of the shared
//! ordered key-value store:
//!
//! - [`NamespacesCore`]: namespace CRUD with a per-account counter.
//! - [`LocksCore`]: advisory read/write locks with per-holder expiration.
//! - [`SemaphoresCore`]: counting semaphores with per-holder expiration.
//! - [`WaitGroupsCore`]: monotonic counters with per-process completion
//!   deduplication.
//!
//! # Determinism
//!
//! Every core operation is a deterministic function of the request and the
//! stored state. Wall clocks and random ids never enter a core: `now`,
//! `expires_at`, and GC `record_id`s are all request fields, stamped by the
//! caller before the request enters the replicated log. Each shard applies
//! committed log entries on a single thread, one write transaction per
//! operation, so replicas that apply the same log converge byte-for-byte.
//!
//! # Mutating reads
//!
//! `get_lock` and `get_semaphore` write: reading an entity applies its
//! expiration check and persists the result, which spreads expiration cleanup
//! across the read path and keeps every returned state durable. They take
//! write transactions and must be replicated like any other mutation.
//!
//! # Bounded garbage collection
//!
//! Deleting a namespace only enqueues GC records in the child cores; periodic
//! GC operations consume them in bounded increments (`max_visited_*` /
//! `max_deleted_objects`) so no single apply stalls the log. Correctness
//! never depends on GC running, only state-size liveness.

use std::io::Read;
use std::io::Write;

use rook_store::KeyRange;

pub mod error;
pub mod limits;
pub mod locks;
pub mod namespaces;
pub mod semaphores;
pub mod sharding;
pub mod tables;
pub mod types;
pub mod wait_groups;

pub use error::CoreError;
pub use error::ErrorKind;
pub use limits::ServiceLimits;
pub use locks::LocksCore;
pub use namespaces::NamespacesCore;
pub use semaphores::SemaphoresCore;
pub use sharding::ShardKeyCalculator;
pub use types::NamespaceTimestampedId;
pub use wait_groups::WaitGroupsCore;

/// Surface the replication runtime drives for every core: the key ranges the
/// core owns, snapshot export/restore over exactly those ranges, and a
/// shutdown hook.
pub trait ShardCore {
    /// Key ranges owned by this core; the union of all cores' ranges is what
    /// state transfer moves.
    fn ranges(&self) -> Vec<KeyRange>;

    /// Export the core's ranges as a snapshot stream.
    fn snapshot(&self, writer: &mut dyn Write) -> Result<(), CoreError>;

    /// Install a snapshot stream as the complete state of the core's ranges.
    fn restore(&self, reader: &mut dyn Read) -> Result<(), CoreError>;

    /// Release resources. The default does nothing; the store is shared and
    /// closed by its owner.
    fn close(&self) {}
}
