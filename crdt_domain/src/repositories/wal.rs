// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Write-Ahead Log Repository Interface
//!
//! Defines the contract for the append-only, checksum-protected, segmented
//! log that durably records writes ahead of chunk consolidation.

use async_trait::async_trait;

use crate::entities::{CrdtState, Entry, Key, WalSegment};
use crate::error::StorageError;

#[async_trait]
pub trait WriteAheadLog<K: Key, S: CrdtState>: Send + Sync {
    /// Appends one entry to the active segment. Returns once the record's
    /// checksum-framed bytes are durable.
    async fn append(&self, entry: Entry<K, S>) -> Result<(), StorageError>;

    /// Finalizes the active segment and
    /// opens a fresh active segment with the next sequence number. Called
    /// after a successful chunk-store `upload` drains the segment's
    /// contents, or when the active segment exceeds its configured size.
    async fn rotate(&self) -> Result<WalSegment, StorageError>;

    /// Replays every finalized segment not yet consolidated into a chunk, in
    /// `(generation, sequence)` order, yielding entries for idempotent
    /// re-application via CRDT merge.
    /// Corrupt trailing bytes in the last segment (partial record from a
    /// crash mid-`fsync`) are truncated and treated as end-of-segment
    /// rather than an error.
    async fn replay(&self) -> Result<Vec<Entry<K, S>>, StorageError>;

    /// Deletes a finalized segment once its contents are durably reflected
    /// in a committed chunk. Idempotent: deleting an already-absent segment
    /// is not an error.
    async fn discard(&self, segment: WalSegment) -> Result<(), StorageError>;

    /// Lists known segments, oldest first, for recovery and metrics.
    async fn segments(&self) -> Vec<WalSegment>;
}
