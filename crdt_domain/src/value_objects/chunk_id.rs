// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Chunk identity value object.
//!
//! Chunk ids are a monotonic `u64` sequence assigned by the chunk store's id
//! source, never reused. The store names chunk files from this id
//! zero-padded so lexical directory order matches numeric order.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub u64);

impl ChunkId {
    pub fn new(value: u64) -> Self {
        ChunkId(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Renders the id as the zero-padded file name stem used on disk.
    pub fn file_stem(self) -> String {
        format!("{:020}", self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic source of fresh chunk ids.
///
/// A single `AtomicChunkIdSource` is shared by everything that can mint a
/// chunk (uploads and consolidations) within one chunk store, so that ids are
/// never reused even across a crash/restart (the store seeds it from the
/// highest id found on disk at startup).
#[derive(Debug)]
pub struct AtomicChunkIdSource {
    next: std::sync::atomic::AtomicU64,
}

impl AtomicChunkIdSource {
    pub fn starting_after(highest_seen: Option<ChunkId>) -> Self {
        let next = highest_seen.map(|id| id.get() + 1).unwrap_or(0);
        Self {
            next: std::sync::atomic::AtomicU64::new(next),
        }
    }

    pub fn next_id(&self) -> ChunkId {
        ChunkId(self.next.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stem_is_zero_padded_for_lexical_order() {
        assert_eq!(ChunkId(7).file_stem(), "00000000000000000007");
        assert_eq!(ChunkId(123).file_stem(), "00000000000000000123");
    }

    #[test]
    fn id_source_resumes_after_highest_seen() {
        let source = AtomicChunkIdSource::starting_after(Some(ChunkId(41)));
        assert_eq!(source.next_id(), ChunkId(42));
        assert_eq!(source.next_id(), ChunkId(43));
    }

    #[test]
    fn id_source_starts_at_zero_when_store_is_empty() {
        let source = AtomicChunkIdSource::starting_after(None);
        assert_eq!(source.next_id(), ChunkId(0));
    }
}
