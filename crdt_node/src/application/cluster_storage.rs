// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Cluster Storage
//!
//! This module is part of the Application layer: a `StorageNode` that fans
//! out to remote replicas named by the current partition scheme instead of
//! owning a WAL/chunk store directly. It maintains a map from
//! partition-id to connection, rebuilt by set-intersect-then-top-up on
//! every call against the `Discovery`-supplied snapshot captured at that
//! call's start.
//!
//! The local node, if this process also serves a partition, is wired in
//! directly rather than dialed over loopback TCP.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex, RwLock};

use crdt_storage_domain::entities::{CrdtState, Entry, Key, PartitionGroup, PartitionSchemeSnapshot};
use crdt_storage_domain::error::StorageError;
use crdt_storage_domain::repositories::{Discovery, EntryStream, PartitionScheme, StorageNode};
use crdt_storage_domain::services::{CrdtMergeService, EntrySerializer};
use crdt_storage_domain::value_objects::{PartitionId, Timestamp};

use crate::infrastructure::entry_reduce::k_way_merge;
use crate::infrastructure::wire::{PartitionAddressBook, RemoteStorageNode};

/// Fan-out write/read endpoint over every replica the current scheme names.
pub struct ClusterStorage<K, S, M, Ser> {
    discovery: Arc<dyn Discovery>,
    scheme: Arc<dyn PartitionScheme>,
    address_book: Arc<dyn PartitionAddressBook>,
    serializer: Arc<Ser>,
    merge: Arc<M>,
    local_id: Option<PartitionId>,
    local_node: Option<Arc<dyn StorageNode<K, S>>>,
    replicas: RwLock<HashMap<PartitionId, Arc<dyn StorageNode<K, S>>>>,
    last_take_targets: Mutex<Vec<PartitionId>>,
}

impl<K, S, M, Ser> ClusterStorage<K, S, M, Ser>
where
    K: Key,
    S: CrdtState,
    M: CrdtMergeService<S> + Send + Sync + 'static,
    Ser: EntrySerializer<K, S> + Send + Sync + 'static,
{
    pub fn new(
        discovery: Arc<dyn Discovery>,
        scheme: Arc<dyn PartitionScheme>,
        address_book: Arc<dyn PartitionAddressBook>,
        serializer: Arc<Ser>,
        merge: Arc<M>,
        local_id: Option<PartitionId>,
        local_node: Option<Arc<dyn StorageNode<K, S>>>,
    ) -> Self {
        Self {
            discovery,
            scheme,
            address_book,
            serializer,
            merge,
            local_id,
            local_node,
            replicas: RwLock::new(HashMap::new()),
            last_take_targets: Mutex::new(Vec::new()),
        }
    }

    /// Returns the connection for `id`, dialing and caching it if this is
    /// the first time `id` has been seen since the last scheme change that
    /// dropped it.
    pub async fn replica(&self, id: &PartitionId) -> Option<Arc<dyn StorageNode<K, S>>> {
        let snapshot = self.discovery.current().await;
        self.sync_replicas(&snapshot).await;
        self.replicas.read().await.get(id).cloned()
    }

    /// The scheme snapshot currently in force, for callers (the
    /// repartitioner) that need to check membership before acting.
    pub async fn current_scheme(&self) -> PartitionSchemeSnapshot {
        self.discovery.current().await
    }

    /// Set-intersect then top-up: drops cached connections for ids no
    /// longer in `snapshot`, dials a connection for every id newly present.
    async fn sync_replicas(&self, snapshot: &PartitionSchemeSnapshot) {
        let wanted: Vec<PartitionId> = snapshot.all_partition_ids();
        let mut replicas = self.replicas.write().await;
        replicas.retain(|id, _| wanted.contains(id));

        for id in &wanted {
            if replicas.contains_key(id) {
                continue;
            }
            if Some(id) == self.local_id.as_ref() {
                if let Some(local) = &self.local_node {
                    replicas.insert(id.clone(), local.clone());
                    continue;
                }
            }
            match self.address_book.resolve(id) {
                Some(addr) => {
                    let node: Arc<dyn StorageNode<K, S>> =
                    Arc::new(RemoteStorageNode::new(addr, self.serializer.clone()));
                    replicas.insert(id.clone(), node);
                }
                None => {
                    tracing::warn!(partition = %id, "no address resolved for partition, skipping");
                }
            }
        }
    }

    /// For every active group, counts how many of its partitions currently
    /// have a cached connection (a proxy for "alive per discovery", since
    /// `sync_replicas` mirrors the snapshot exactly). Fails before any I/O
    /// if a group falls short of its `min_active` threshold: the write-path
    /// "sharder is null" condition.
    async fn check_write_valid(&self, snapshot: &PartitionSchemeSnapshot) -> Result<(), StorageError> {
        let replicas = self.replicas.read().await;
        for group in active_groups(snapshot) {
            let live = group.partitions.iter().filter(|id| replicas.contains_key(*id)).count();
            if live < group.min_active as usize {
                return Err(StorageError::incomplete_cluster(format!(
                            "partition group has {live} live replicas, needs {}",
                            group.min_active
                        )));
            }
        }
        Ok(())
    }

    /// Streams `input` through a per-target task pool selected by
    /// `scheme.route()` for each entry's key, closing every target's
    /// channel once the input is exhausted and awaiting every task's ack
    /// before returning.
    async fn fan_out_write<F>(&self, mut input: EntryStream<'_, K, S>, call: F) -> Result<(), StorageError>
    where
        F: Fn(Arc<dyn StorageNode<K, S>>, EntryStream<'static, K, S>) -> futures::future::BoxFuture<'static, Result<(), StorageError>>
        + Send
        + Sync
        + 'static,
    {
        let snapshot = self.discovery.current().await;
        self.sync_replicas(&snapshot).await;
        self.check_write_valid(&snapshot).await?;

        let replicas = self.replicas.read().await;
        let call = Arc::new(call);
        let mut senders: HashMap<PartitionId, mpsc::Sender<Result<Entry<K, S>, StorageError>>> = HashMap::new();
        let mut tasks = Vec::new();

        while let Some(entry) = input.next().await {
            let entry = entry?;
            let key_bytes = self.serializer.encode_key(entry.key())?;
            let route = self.scheme.route(&snapshot, &key_bytes);
            for pid in &route.ranked {
                if !senders.contains_key(pid) {
                    let Some(node) = replicas.get(pid).cloned() else { continue };
                    let (tx, mut rx) = mpsc::channel::<Result<Entry<K, S>, StorageError>>(64);
                    let stream: EntryStream<'static, K, S> = Box::pin(async_stream::stream! {
                            while let Some(item) = rx.recv().await {
                                yield item;
                            }
                        });
                    let call = call.clone();
                    tasks.push(tokio::spawn(async move { call(node, stream).await }));
                    senders.insert(pid.clone(), tx);
                }
                let _ = senders[pid].send(Ok(entry.clone())).await;
            }
        }
        drop(senders);

        for task in tasks {
            task.await
            .map_err(|e| StorageError::InternalError(format!("replica task panicked: {e}")))??;
        }
        Ok(())
    }
}

fn active_groups(snapshot: &PartitionSchemeSnapshot) -> impl Iterator<Item = &PartitionGroup> {
    snapshot.groups.iter().filter(|g| g.active)
}

#[async_trait]
impl<K, S, M, Ser> StorageNode<K, S> for ClusterStorage<K, S, M, Ser>
where
    K: Key,
    S: CrdtState,
    M: CrdtMergeService<S> + Send + Sync + 'static,
    Ser: EntrySerializer<K, S> + Send + Sync + 'static,
{
    async fn upload(&self, entries: EntryStream<'_, K, S>) -> Result<(), StorageError> {
        self.fan_out_write(entries, |node, stream| Box::pin(async move { node.upload(stream).await })).await
    }

    async fn remove(&self, tombstones: EntryStream<'_, K, S>) -> Result<(), StorageError> {
        self.fan_out_write(tombstones, |node, stream| Box::pin(async move { node.remove(stream).await })).await
    }

    async fn download(&self, since: Timestamp) -> Result<EntryStream<'_, K, S>, StorageError> {
        let snapshot = self.discovery.current().await;
        self.sync_replicas(&snapshot).await;
        let replicas = self.replicas.read().await;

        let mut collected: Vec<Vec<Entry<K, S>>> = Vec::new();
        for group in active_groups(&snapshot) {
            let mut responded = 0usize;
            for pid in &group.partitions {
                let Some(node) = replicas.get(pid) else { continue };
                match node.download(since).await {
                    Ok(mut stream) => {
                        responded += 1;
                        let mut items = Vec::new();
                        while let Some(item) = stream.next().await {
                            items.push(item?);
                        }
                        collected.push(items);
                    }
                    Err(e) => {
                        tracing::warn!(partition = %pid, error = %e, "replica unreachable during download");
                    }
                }
            }
            if responded < group.min_active as usize {
                return Err(StorageError::incomplete_cluster(format!(
                            "only {responded} of {} replicas responded, need {}",
                            group.partitions.len(),
                            group.min_active
                        )));
            }
        }

        let merged = k_way_merge(collected, self.merge.as_ref());
        Ok(Box::pin(futures::stream::iter(merged.into_iter().map(Ok))))
    }

    async fn take(&self) -> Result<EntryStream<'_, K, S>, StorageError> {
        let snapshot = self.discovery.current().await;
        self.sync_replicas(&snapshot).await;
        let replicas = self.replicas.read().await;

        let mut collected: Vec<Vec<Entry<K, S>>> = Vec::new();
        let mut targets = Vec::new();
        for group in active_groups(&snapshot) {
            let mut responded = 0usize;
            for pid in &group.partitions {
                let Some(node) = replicas.get(pid) else { continue };
                match node.take().await {
                    Ok(mut stream) => {
                        responded += 1;
                        targets.push(pid.clone());
                        let mut items = Vec::new();
                        while let Some(item) = stream.next().await {
                            items.push(item?);
                        }
                        collected.push(items);
                    }
                    Err(e) => {
                        tracing::warn!(partition = %pid, error = %e, "replica unreachable during take");
                    }
                }
            }
            if responded < group.min_active as usize {
                return Err(StorageError::incomplete_cluster(format!(
                            "only {responded} of {} replicas responded, need {}",
                            group.partitions.len(),
                            group.min_active
                        )));
            }
        }

        *self.last_take_targets.lock().await = targets;
        let merged = k_way_merge(collected, self.merge.as_ref());
        Ok(Box::pin(futures::stream::iter(merged.into_iter().map(Ok))))
    }

    async fn commit_take(&self) -> Result<(), StorageError> {
        let targets = self.last_take_targets.lock().await.clone();
        let replicas = self.replicas.read().await;
        for pid in targets {
            if let Some(node) = replicas.get(&pid) {
                node.commit_take().await?;
            }
        }
        Ok(())
    }

    async fn ping(&self, timeout: Duration) -> Result<(), StorageError> {
        let snapshot = self.discovery.current().await;
        self.sync_replicas(&snapshot).await;
        let replicas = self.replicas.read().await;
        for node in replicas.values() {
            node.ping(timeout).await?;
        }
        Ok(())
    }
}
