// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Discovery Repository Interface
//!
//! Supplies the partition table snapshot a node routes against, and a
//! stream of updates as nodes join, leave, or fail liveness checks.
//! What watches membership (static file, gossip, an external coordinator)
//! is an infrastructure concern; the domain only needs the snapshot stream.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::entities::PartitionSchemeSnapshot;

#[async_trait]
pub trait Discovery: Send + Sync {
    /// The most recently observed partition scheme snapshot.
    async fn current(&self) -> PartitionSchemeSnapshot;

    /// A stream of snapshots, one per observed membership change. Never
    /// ends on its own; callers drop the stream to stop watching.
    fn watch(&self) -> BoxStream<'static, PartitionSchemeSnapshot>;
}
