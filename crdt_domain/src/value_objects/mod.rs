// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Value objects: immutable, identity-free pieces of the CRDT domain.

pub mod chunk_id;
pub mod partition_id;
pub mod timestamp;

pub use chunk_id::{AtomicChunkIdSource, ChunkId};
pub use partition_id::PartitionId;
pub use timestamp::Timestamp;
