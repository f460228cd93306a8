// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Repartitioner
//!
//! Drains one partition's content and re-uploads it through the cluster
//! write path. Used when a node is being retired or
//! a scheme change moves a key range off it: `repartition(source)` takes
//! everything `source` currently holds and routes it fresh through whatever
//! the scheme says those keys belong to now.

use std::sync::Arc;

use futures::StreamExt;

use crdt_storage_domain::entities::{CrdtState, Key};
use crdt_storage_domain::error::StorageError;
use crdt_storage_domain::repositories::StorageNode;
use crdt_storage_domain::services::{CrdtMergeService, EntrySerializer};
use crdt_storage_domain::value_objects::PartitionId;

use super::cluster_storage::ClusterStorage;

/// Moves `source`'s content through the cluster write path.
///
/// Guards, in order: `source` must be named by the current scheme (a); at
/// least one other destination partition must exist (b); if `take` on the
/// source fails, the operation aborts without having deleted anything (c).
/// `take`'s at-most-once contract means a failed take leaves the source
/// untouched.
pub async fn repartition<K, S, M, Ser>(
    cluster: &ClusterStorage<K, S, M, Ser>,
    source: PartitionId,
) -> Result<(), StorageError>
where
    K: Key,
    S: CrdtState,
    M: CrdtMergeService<S> + Send + Sync + 'static,
    Ser: EntrySerializer<K, S> + Send + Sync + 'static,
{
    let snapshot = cluster.current_scheme().await;
    let all_ids = snapshot.all_partition_ids();

    if !all_ids.contains(&source) {
        return Err(StorageError::protocol(format!("repartition source {source} is not in the current scheme")));
    }
    if all_ids.iter().filter(|id| **id != source).count() == 0 {
        return Err(StorageError::protocol("repartition requires at least one other destination partition"));
    }

    let source_node: Arc<dyn StorageNode<K, S>> = cluster
    .replica(&source)
    .await
    .ok_or_else(|| StorageError::incomplete_cluster(format!("no connection available for source partition {source}")))?;

    let content = source_node.take().await?;
    cluster.upload(content).await?;
    source_node.commit_take().await?;
    Ok(())
}
