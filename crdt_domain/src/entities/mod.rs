// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Entities: objects with identity and a lifecycle.

pub mod chunk_metadata;
pub mod entry;
pub mod partition;
pub mod wal_segment;

pub use chunk_metadata::ChunkMetadata;
pub use entry::{CrdtState, Entry, Key};
pub use partition::{PartitionGroup, PartitionSchemeSnapshot};
pub use wal_segment::WalSegment;
