// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Storage Node Repository Interface
//!
//! The contract a single replica exposes to its peers and to the cluster
//! fan-out layer above it. A local node composes a
//! [`super::chunk_store::ChunkStore`] and a [`super::wal::WriteAheadLog`]; a
//! remote node is reached through the wire protocol client. Both sides of
//! that boundary implement this one trait, so the cluster layer never knows
//! which kind of node it is talking to.

use async_trait::async_trait;
use std::time::Duration;

use crate::entities::{CrdtState, Entry, Key};
use crate::error::StorageError;
use crate::repositories::chunk_store::EntryStream;
use crate::value_objects::Timestamp;

#[async_trait]
pub trait StorageNode<K: Key, S: CrdtState>: Send + Sync {
    /// Writes entries through to the WAL, then the chunk store.
    async fn upload(&self, entries: EntryStream<'_, K, S>) -> Result<(), StorageError>;

    /// Reads entries newer than `since`.
    async fn download(&self, since: Timestamp) -> Result<EntryStream<'_, K, S>, StorageError>;

    /// At-most-once read-and-clear.
    async fn take(&self) -> Result<EntryStream<'_, K, S>, StorageError>;

    /// Commits a prior `take`'s deletions once consumed.
    async fn commit_take(&self) -> Result<(), StorageError>;

    /// Writes tombstones through to the WAL, then the chunk store.
    async fn remove(&self, tombstones: EntryStream<'_, K, S>) -> Result<(), StorageError>;

    /// Liveness probe used by discovery and the repartitioner.
    /// `timeout` bounds how long the caller is willing to wait; a remote
    /// implementation that exceeds it returns `StorageError::IoError`.
    async fn ping(&self, timeout: Duration) -> Result<(), StorageError>;
}
