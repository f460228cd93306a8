// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Chunk metadata entity.
//!
//! Describes one immutable chunk file without holding its entries: the chunk
//! store keeps a `Vec<ChunkMetadata>` in memory as its authoritative view of
//! "what's on disk", refreshed atomically on every upload/consolidation
//! commit.

use crate::value_objects::ChunkId;
use serde::{Deserialize, Serialize};

/// Header fields every chunk file carries, serialized in front of its entries
/// as `header(count:u32, minKey, maxKey)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub id: ChunkId,
    pub count: u32,
    pub min_key_bytes: Vec<u8>,
    pub max_key_bytes: Vec<u8>,
    pub byte_len: u64,
}

impl ChunkMetadata {
    pub fn new(id: ChunkId, count: u32, min_key_bytes: Vec<u8>, max_key_bytes: Vec<u8>, byte_len: u64) -> Self {
        Self {
            id,
            count,
            min_key_bytes,
            max_key_bytes,
            byte_len,
        }
    }

    /// Whether this chunk's key range can possibly overlap another's, a cheap
    /// pre-filter the consolidation strategy uses before doing real work.
    pub fn overlaps(&self, other: &ChunkMetadata) -> bool {
        self.min_key_bytes <= other.max_key_bytes && other.min_key_bytes <= self.max_key_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: u64, min: u8, max: u8) -> ChunkMetadata {
        ChunkMetadata::new(ChunkId(id), 1, vec![min], vec![max], 10)
    }

    #[test]
    fn disjoint_ranges_do_not_overlap() {
        let a = meta(1, 0, 5);
        let b = meta(2, 6, 10);
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn touching_ranges_overlap() {
        let a = meta(1, 0, 5);
        let b = meta(2, 5, 10);
        assert!(a.overlaps(&b));
    }
}
