//! Ordered key-value storage for rook shards.
//!
//! Every shard state machine in rook runs over the same storage substrate: a
//! single ordered byte-keyed table inside an embedded [redb] database. This
//! crate provides that substrate and the pieces layered directly on top of it:
//!
//! - [`Store`]: database handle with snapshot-isolated read ([`RoTxn`]) and
//!   write ([`RwTxn`]) transactions. A write transaction either commits
//!   atomically or leaves no trace.
//! - [`keys`]: deterministic, order-preserving encoding of composite keys and
//!   the stable shard-key hash. Bit-stable across releases; the test suite
//!   pins golden encodings.
//! - [`tables`]: typed table helpers ([`SimpleKeyTable`], [`CompositeKeyTable`])
//!   that scope reads and writes to a 2-byte table identifier and a shard's
//!   key-range bounds.
//! - [`snapshot`]: self-describing export/restore of a set of key ranges, used
//!   by the replication runtime for state transfer.
//!
//! # Error model
//!
//! [`StoreError::NotFound`] is the only failure callers are expected to branch
//! on. Every other variant wraps a storage-engine or encoding fault and is
//! fatal to the apply loop: the replica aborts and re-syncs from a snapshot.

pub mod keys;
pub mod snapshot;
mod store;
pub mod tables;

pub use store::KeyRange;
pub use store::RoTxn;
pub use store::RwTxn;
pub use store::Store;
pub use store::StoreError;
pub use store::StoreRead;
pub use tables::CompositeKeyTable;
pub use tables::ListPage;
pub use tables::PaginationToken;
pub use tables::SimpleKeyTable;
