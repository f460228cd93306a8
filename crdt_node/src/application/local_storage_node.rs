// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Local Storage Node
//!
//! This module is part of the Application layer: it composes the
//! infrastructure's `FileWriteAheadLog` (writes) with a `ChunkStore` (reads
//! and background maintenance) into the single endpoint the wire protocol
//! and the CLI operator surface both talk to.
//!
//! `upload`/`remove` stream into the WAL and return as soon as every entry
//! is durably appended. The WAL drainer moves them into the chunk store
//! asynchronously. `download`/`take` read straight from the chunk store,
//! which already reflects everything the drainer has processed plus
//! (harmlessly, idempotently) whatever a slow drainer pass has not yet
//! caught up on from the WAL.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use crdt_storage_domain::entities::{CrdtState, Key};
use crdt_storage_domain::error::StorageError;
use crdt_storage_domain::repositories::{ChunkStore, EntryStream, StorageNode, WriteAheadLog};

/// Composes one node's WAL and chunk store into the operation set the wire
/// protocol, the CLI, and `ClusterStorage`'s remote-peer view all share.
pub struct LocalStorageNode<K, S> {
    wal: Arc<dyn WriteAheadLog<K, S>>,
    chunk_store: Arc<dyn ChunkStore<K, S>>,
}

impl<K, S> LocalStorageNode<K, S>
where
    K: Key,
    S: CrdtState,
{
    pub fn new(wal: Arc<dyn WriteAheadLog<K, S>>, chunk_store: Arc<dyn ChunkStore<K, S>>) -> Self {
        Self { wal, chunk_store }
    }

    /// Commits the chunk-deletion half of an outstanding `take`, called by
    /// the wire server once it has received the client's `TakeAck`.
    /// Deliberately not part of `StorageNode`, since a remote peer commits
    /// its take via a wire message rather than a direct method call.
    pub async fn commit_take(&self) -> Result<(), StorageError> {
        self.chunk_store.commit_take().await
    }

    /// Runs one consolidation pass against this node's chunk store.
    pub async fn consolidate(&self) -> Result<Option<crdt_storage_domain::repositories::ConsolidationDiff>, StorageError> {
        self.chunk_store.consolidate().await
    }

    /// Runs one irrelevant-chunk cleanup pass against this node's chunk
    /// store.
    pub async fn cleanup_irrelevant(&self) -> Result<Vec<crdt_storage_domain::entities::ChunkMetadata>, StorageError> {
        self.chunk_store.cleanup_irrelevant().await
    }

    /// A point-in-time count of this node's WAL segments and chunks, for the
    /// `ping`/`status` operator surface.
    pub async fn status(&self) -> Result<NodeStatus, StorageError> {
        let segments = self.wal.segments().await;
        let chunks = self.chunk_store.chunk_metadata().await;
        Ok(NodeStatus {
            chunk_count: chunks.len(),
            wal_segment_count: segments.len(),
            finalized_wal_segment_count: segments.iter().filter(|s| s.finalized).count(),
        })
    }
}

/// Point-in-time summary returned by [`LocalStorageNode::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub chunk_count: usize,
    pub wal_segment_count: usize,
    pub finalized_wal_segment_count: usize,
}

#[async_trait]
impl<K, S> StorageNode<K, S> for LocalStorageNode<K, S>
where
    K: Key,
    S: CrdtState,
{
    async fn upload(&self, mut entries: EntryStream<'_, K, S>) -> Result<(), StorageError> {
        while let Some(entry) = entries.next().await {
            self.wal.append(entry?).await?;
        }
        Ok(())
    }

    async fn download(&self, since: crdt_storage_domain::value_objects::Timestamp) -> Result<EntryStream<'_, K, S>, StorageError> {
        self.chunk_store.download(since).await
    }

    async fn take(&self) -> Result<EntryStream<'_, K, S>, StorageError> {
        self.chunk_store.take().await
    }

    async fn commit_take(&self) -> Result<(), StorageError> {
        self.chunk_store.commit_take().await
    }

    async fn remove(&self, mut tombstones: EntryStream<'_, K, S>) -> Result<(), StorageError> {
        while let Some(entry) = tombstones.next().await {
            let entry = entry?;
            if !entry.is_tombstone() {
                return Err(StorageError::protocol("remove() only accepts tombstones"));
            }
            self.wal.append(entry).await?;
        }
        Ok(())
    }

    async fn ping(&self, timeout: Duration) -> Result<(), StorageError> {
        let check = async {
            let _ = self.wal.segments().await;
            let _ = self.chunk_store.chunk_metadata().await;
        };
        tokio::time::timeout(timeout, check)
        .await
        .map_err(|_| StorageError::IoError("ping timed out".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::chunk_store::FileChunkStore;
    use crate::infrastructure::serializer::BincodeEntrySerializer;
    use crate::infrastructure::wal::{FileWriteAheadLog, WalRollPolicy};
    use crdt_storage_domain::entities::Entry;
    use crdt_storage_domain::services::MaxWinsMergeService;
    use crdt_storage_domain::value_objects::Timestamp;
    use futures::stream;
    use tempfile::tempdir;

    async fn node() -> LocalStorageNode<u64, i64> {
        let wal_dir = tempdir().unwrap();
        let chunk_dir = tempdir().unwrap();
        let wal: Arc<dyn WriteAheadLog<u64, i64>> = Arc::new(
            FileWriteAheadLog::open(wal_dir.path().to_path_buf(), BincodeEntrySerializer::<u64, i64>::new(), WalRollPolicy::default())
            .await
            .unwrap(),
        );
        let chunk_store: Arc<dyn ChunkStore<u64, i64>> = Arc::new(
            FileChunkStore::open(chunk_dir.path().to_path_buf(), BincodeEntrySerializer::<u64, i64>::new(), MaxWinsMergeService, false)
            .await
            .unwrap(),
        );
        LocalStorageNode::new(wal, chunk_store)
    }

    #[tokio::test]
    async fn upload_appends_to_the_wal_not_the_chunk_store() {
        let node = node().await;
        node.upload(stream::iter(vec![Ok(Entry::data(1u64, Timestamp(1), 9i64))]).boxed())
        .await
        .unwrap();
        // The drainer hasn't run, so nothing is in the chunk store yet.
        let mut out = node.download(Timestamp::ZERO).await.unwrap();
        assert!(out.next().await.is_none());
    }

    #[tokio::test]
    async fn remove_rejects_data_entries() {
        let node = node().await;
        let err = node
        .remove(stream::iter(vec![Ok(Entry::data(1u64, Timestamp(1), 9i64))]).boxed())
        .await
        .unwrap_err();
        assert_eq!(err.category(), "protocol");
    }

    #[tokio::test]
    async fn ping_succeeds_promptly_when_both_subsystems_are_healthy() {
        let node = node().await;
        node.ping(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn status_reports_zero_for_a_fresh_node() {
        let node = node().await;
        let status = node.status().await.unwrap();
        assert_eq!(status.chunk_count, 0);
        assert_eq!(status.finalized_wal_segment_count, 0);
    }
}
