//! # CRDT Storage Domain
//!
//! The domain layer of a conflict-free, replicated key-value storage engine.
//! It implements Domain-Driven Design (DDD) patterns and is completely
//! independent of external concerns like the filesystem, sockets, or a
//! particular cluster-membership mechanism.
//!
//! ## Domain-Driven Design Concepts
//!
//! ### Entities
//! Objects with identity that persists through change.
//!
//! **Examples in this domain:**
//! - `Entry<K, S>`: A data record or tombstone for a key
//! - `ChunkMetadata`: Identity and key range of one immutable chunk file
//! - `WalSegment`: Identity and lifecycle state of one log segment
//! - `PartitionGroup` / `PartitionSchemeSnapshot`: The cluster's current
//!   routing table
//!
//! ### Value Objects
//! Immutable, self-validating, identity-free.
//!
//! **Examples in this domain:**
//! - `Timestamp`: A monotonic logical clock value
//! - `ChunkId`: A monotonically assigned chunk file identifier
//! - `PartitionId`: An opaque partition name
//!
//! ### Domain Services
//! Stateless operations expressing cross-entity business rules.
//!
//! **Examples in this domain:**
//! - `CrdtMergeService`: The externally supplied associative/commutative/
//!   idempotent merge function every replica applies identically
//! - `EntrySerializer`: The stated contract for encoding entries, fulfilled
//!   by an infrastructure adapter
//!
//! ### Repositories
//! Abstractions over persistence and the outside world; the domain works
//! against these traits without knowing whether a particular implementation
//! is a local filesystem, an in-memory fixture, or a remote peer reached
//! over the wire.
//!
//! **Examples in this domain:**
//! - `ChunkStore`: durable, ordered, consolidating storage for one replica
//! - `WriteAheadLog`: the durability buffer ahead of consolidation
//! - `StorageNode`: the operation set a replica exposes to its peers
//! - `PartitionScheme`: stateless key routing over a partition snapshot
//! - `Discovery`: the stream of partition snapshot updates a node routes
//!   against
//!
//! ## Business Rules and Invariants
//!
//! ### Entry Ordering
//! - Chunk files store entries in strictly ascending key order, one entry
//!   per key.
//! - Tombstones with a higher timestamp dominate data with a lower
//!   timestamp, and vice versa; equal timestamps are resolved by the
//!   injected `CrdtMergeService`.
//!
//! ### Chunk Store Rules
//! - Chunks are immutable once committed; `consolidate` only ever adds one
//!   new chunk and removes its inputs, atomically.
//! - At most one `take` and at most one `consolidate`/`cleanup_irrelevant`
//!   may be outstanding at a time.
//!
//! ### Partitioning Rules
//! - Every node ranks partitions for a key identically, given the same
//!   snapshot: no coordination is needed to agree on a key's owners.
//! - A write is only accepted once every target in a partition group
//!   acknowledges it, up to that group's configured replication factor.

pub mod entities;
pub mod error;
pub mod repositories;
pub mod services;
pub mod value_objects;

pub use entities::{
    ChunkMetadata, CrdtState, Entry, Key, PartitionGroup, PartitionSchemeSnapshot, WalSegment,
};
pub use error::StorageError;
pub use repositories::{ChunkStore, Discovery, EntryStream, PartitionScheme, StorageNode, WriteAheadLog};
pub use services::{CrdtMergeService, EntrySerializer, MaxWinsMergeService};
pub use value_objects::{AtomicChunkIdSource, ChunkId, PartitionId, Timestamp};
