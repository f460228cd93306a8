// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Chunk Store Repository Interface
//!
//! Defines the contract for durable, ordered-by-key storage of CRDT entries
//! as immutable chunk files, plus background consolidation. This is a
//! repository in the DDD sense: the domain states *what* a chunk store does,
//! the infrastructure layer's local-filesystem implementation says *how*.
//!
//! ## Rust shape of the `upload`/`download` streams
//!
//! The design's prose describes `upload()` as "an open sink accepting a
//! stream" and `download()`/`take()` as "a source producing entries". The
//! idiomatic Rust rendering of both directions is a `Stream`: callers that
//! want push semantics for `upload` construct their own stream (e.g. from a
//! channel) and hand it to `upload`, rather than the store handing back a
//! sink object for the caller to push into. This is behaviorally identical:
//! `upload` still only returns once the stream (and thus the conceptual
//! "sink") is exhausted and closed. It avoids a bespoke `Sink` trait with no
//! use beyond this one call site.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::entities::{ChunkMetadata, CrdtState, Entry, Key};
use crate::error::StorageError;
use crate::value_objects::Timestamp;

/// A stream of entries, fallible per-item so I/O errors surface mid-stream
/// rather than only at the end.
pub type EntryStream<'a, K, S> = BoxStream<'a, Result<Entry<K, S>, StorageError>>;

/// Diff produced by a single consolidation commit.
#[derive(Debug, Clone)]
pub struct ConsolidationDiff {
    pub added: ChunkMetadata,
    pub removed: Vec<ChunkMetadata>,
}

#[async_trait]
pub trait ChunkStore<K: Key, S: CrdtState>: Send + Sync {
    /// Accepts a stream of entries in strictly ascending key order and
    /// commits them as one new immutable chunk. Returns once the stream is
    /// exhausted and the chunk is durably committed. Fails with `StorageError::ProtocolError` if
    /// keys are not strictly ascending, leaving no partial chunk behind.
    async fn upload(&self, entries: EntryStream<'_, K, S>) -> Result<(), StorageError>;

    /// Streams every entry with `timestamp > since`, ordered by key
    /// ascending, merging across chunks with a k-way merge and the CRDT
    /// merge for equal keys. The returned stream is a lazy, one-shot,
    /// finite view: restart by calling `download` again.
    async fn download(&self, since: Timestamp) -> Result<EntryStream<'_, K, S>, StorageError>;

    /// Equivalent to `download(Timestamp::ZERO)`, but additionally marks every
    /// chunk present at call time for deletion on the next successful
    /// `commit_take`. At-most-once handoff: fails if another `take` is
    /// already outstanding.
    async fn take(&self) -> Result<EntryStream<'_, K, S>, StorageError>;

    /// Commits the deletion half of an outstanding `take` once the caller has
    /// consumed the whole stream and acknowledged receipt. A dropped/cancelled take without this
    /// call leaves the marked chunks intact.
    async fn commit_take(&self) -> Result<(), StorageError>;

    /// Accepts a stream of tombstones in strictly ascending key order,
    /// stored as negative-state entries in the next produced chunk.
    async fn remove(&self, tombstones: EntryStream<'_, K, S>) -> Result<(), StorageError>;

    /// Runs one consolidation pass: selects chunks per the active locker
    /// strategy, k-way merges them into one new chunk,
    /// commits the swap, deletes the inputs. Returns `Ok(None)` if there was
    /// nothing to consolidate (fewer than two candidate chunks) and
    /// `Err(StorageError::ChunksAlreadyLocked)` if an overlapping
    /// consolidation is already in flight (non-fatal; callers back off).
    async fn consolidate(&self) -> Result<Option<ConsolidationDiff>, StorageError>;

    /// Removes chunks whose entries are all superseded by tombstones or by
    /// overlapping chunks. Mutually exclusive with `consolidate`: returns
    /// `Err(StorageError::ChunksAlreadyLocked)` if a consolidation is
    /// in flight.
    async fn cleanup_irrelevant(&self) -> Result<Vec<ChunkMetadata>, StorageError>;

    /// A snapshot of the chunk set's metadata, for metrics/inspection.
    async fn chunk_metadata(&self) -> Vec<ChunkMetadata>;
}
