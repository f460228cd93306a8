// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end scenarios against a single composed node: WAL + chunk store
//! + drainer, wired together the same way `crdt-node start` wires them,
//! minus the wire server (exercised separately by the unit tests alongside
//! `infrastructure::wire`).

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tempfile::tempdir;

use crdt_storage_node::application::LocalStorageNode;
use crdt_storage_node::infrastructure::chunk_store::FileChunkStore;
use crdt_storage_node::infrastructure::serializer::BincodeEntrySerializer;
use crdt_storage_node::infrastructure::wal::{FileWriteAheadLog, WalDrainer, WalRollPolicy};
use crdt_storage_domain::entities::Entry;
use crdt_storage_domain::repositories::{ChunkStore, StorageNode, WriteAheadLog};
use crdt_storage_domain::services::MaxWinsMergeService;
use crdt_storage_domain::value_objects::Timestamp;

type Ser = BincodeEntrySerializer<u64, String>;

async fn fresh_node(
    wal_dir: &std::path::Path,
    chunk_dir: &std::path::Path,
) -> (Arc<LocalStorageNode<u64, String>>, Arc<FileWriteAheadLog<u64, String, Ser>>, Arc<dyn ChunkStore<u64, String>>) {
    let wal = Arc::new(FileWriteAheadLog::open(wal_dir, Ser::new(), WalRollPolicy::default()).await.unwrap());
    let chunk_store: Arc<dyn ChunkStore<u64, String>> =
        Arc::new(FileChunkStore::open(chunk_dir, Ser::new(), MaxWinsMergeService, false).await.unwrap());
    let node = Arc::new(LocalStorageNode::new(
        wal.clone() as Arc<dyn WriteAheadLog<u64, String>>,
        chunk_store.clone(),
    ));
    (node, wal, chunk_store)
}

async fn drain(
    wal: &Arc<FileWriteAheadLog<u64, String, Ser>>,
    chunk_store: &Arc<dyn ChunkStore<u64, String>>,
) {
    let drainer = WalDrainer::new(wal.clone(), chunk_store.clone(), Arc::new(Ser::new()), Arc::new(MaxWinsMergeService), Duration::from_millis(10));
    wal.rotate().await.unwrap();
    drainer.drain_once().await;
}

async fn download_all(node: &LocalStorageNode<u64, String>) -> Vec<(u64, String)> {
    let mut out = node.download(Timestamp::ZERO).await.unwrap();
    let mut entries = Vec::new();
    while let Some(entry) = out.next().await {
        let entry = entry.unwrap();
        entries.push((*entry.key(), entry.state().cloned().unwrap()));
    }
    entries.sort();
    entries
}

/// Scenario 1: upload two keys, download returns both at their written state.
#[tokio::test]
async fn scenario_one_upload_then_download_returns_everything() {
    let wal_dir = tempdir().unwrap();
    let chunk_dir = tempdir().unwrap();
    let (node, wal, chunk_store) = fresh_node(wal_dir.path(), chunk_dir.path()).await;

    let entries = vec![
        Entry::data(1u64, Timestamp(10), "A".to_string()),
        Entry::data(2u64, Timestamp(10), "B".to_string()),
    ];
    node.upload(futures::stream::iter(entries.into_iter().map(Ok)).boxed()).await.unwrap();
    drain(&wal, &chunk_store).await;

    assert_eq!(download_all(&node).await, vec![(1, "A".to_string()), (2, "B".to_string())]);
}

/// Scenario 2: a later upload with an older timestamp on the same key loses
/// to max-wins merge; unrelated keys are untouched.
#[tokio::test]
async fn scenario_two_older_write_loses_to_max_wins_merge() {
    let wal_dir = tempdir().unwrap();
    let chunk_dir = tempdir().unwrap();
    let (node, wal, chunk_store) = fresh_node(wal_dir.path(), chunk_dir.path()).await;

    node.upload(
        futures::stream::iter(
            vec![Entry::data(1u64, Timestamp(10), "A".to_string()), Entry::data(2u64, Timestamp(10), "B".to_string())]
                .into_iter()
                .map(Ok),
        )
        .boxed(),
    )
    .await
    .unwrap();
    drain(&wal, &chunk_store).await;

    node.upload(futures::stream::iter(vec![Entry::data(1u64, Timestamp(5), "A-prime".to_string())].into_iter().map(Ok)).boxed())
        .await
        .unwrap();
    drain(&wal, &chunk_store).await;

    assert_eq!(download_all(&node).await, vec![(1, "A".to_string()), (2, "B".to_string())]);
}

/// Scenario 5 (reduced): many overlapping uploads to the same keys collapse
/// under consolidation to one chunk, with the observed content unchanged.
#[tokio::test]
async fn scenario_five_consolidation_collapses_chunks_without_changing_content() {
    let wal_dir = tempdir().unwrap();
    let chunk_dir = tempdir().unwrap();
    let (node, wal, chunk_store) = fresh_node(wal_dir.path(), chunk_dir.path()).await;

    for generation in 0..20u64 {
        let entries: Vec<_> = (0..10u64)
            .map(|k| Entry::data(k, Timestamp(generation), format!("gen-{generation}")))
            .collect();
        node.upload(futures::stream::iter(entries.into_iter().map(Ok)).boxed()).await.unwrap();
        drain(&wal, &chunk_store).await;
    }

    let before = download_all(&node).await;
    assert_eq!(before.len(), 10);
    assert!(before.iter().all(|(_, v)| v == "gen-19"));

    let before_chunk_count = chunk_store.chunk_metadata().await.len();
    assert!(before_chunk_count > 1);

    while node.consolidate().await.unwrap().is_some() {}

    assert_eq!(chunk_store.chunk_metadata().await.len(), 1);
    assert_eq!(download_all(&node).await, before);
}

/// Scenario 4 (at-least-once take): a `take` that streams entries out but
/// is never committed leaves them recoverable, matching "kill client before
/// TakeAck". The domain's `commit_take` is the only thing that deletes.
#[tokio::test]
async fn scenario_four_uncommitted_take_leaves_entries_recoverable() {
    let wal_dir = tempdir().unwrap();
    let chunk_dir = tempdir().unwrap();
    let (node, wal, chunk_store) = fresh_node(wal_dir.path(), chunk_dir.path()).await;

    node.upload(futures::stream::iter(vec![Entry::data(1u64, Timestamp(1), "A".to_string())].into_iter().map(Ok)).boxed())
        .await
        .unwrap();
    drain(&wal, &chunk_store).await;

    let mut taken = node.take().await.unwrap();
    while taken.next().await.is_some() {}
    // Deliberately do not call commit_take() - simulates a client that
    // dies before sending TakeAck.
    drop(taken);

    assert_eq!(download_all(&node).await, vec![(1, "A".to_string())]);
}

/// WAL crash recovery: entries appended but never rotated/drained are still
/// visible after reopening the WAL against the same directory, because
/// `replay()` walks every segment regardless of finalization state.
#[tokio::test]
async fn wal_crash_recovery_keeps_unrotated_appends() {
    let wal_dir = tempdir().unwrap();
    let wal: FileWriteAheadLog<u64, String, Ser> =
        FileWriteAheadLog::open(wal_dir.path(), Ser::new(), WalRollPolicy::default()).await.unwrap();
    wal.append(Entry::data(1u64, Timestamp(1), "A".to_string())).await.unwrap();
    drop(wal);

    let reopened: FileWriteAheadLog<u64, String, Ser> =
        FileWriteAheadLog::open(wal_dir.path(), Ser::new(), WalRollPolicy::default()).await.unwrap();
    let replayed = reopened.replay().await.unwrap();
    let keys: Vec<u64> = replayed.iter().map(|e| *e.key()).collect();
    assert_eq!(keys, vec![1]);
}

mod cluster {
    //! Scenarios 3 and 6 from spec.md §8: a real three-node cluster talking
    //! over actual TCP loopback connections (no in-process shortcuts), one
    //! node going down mid-scenario, and a repartition moving content
    //! through the cluster write path.

    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use futures::StreamExt;
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use crdt_storage_domain::entities::{Entry, PartitionGroup, PartitionSchemeSnapshot};
    use crdt_storage_domain::repositories::{ChunkStore, StorageNode, WriteAheadLog};
    use crdt_storage_domain::services::MaxWinsMergeService;
    use crdt_storage_domain::value_objects::{PartitionId, Timestamp};

    use crdt_storage_node::application::{repartitioner, ClusterStorage, LocalStorageNode};
    use crdt_storage_node::infrastructure::chunk_store::FileChunkStore;
    use crdt_storage_node::infrastructure::discovery::StaticDiscovery;
    use crdt_storage_node::infrastructure::metrics::MetricsService;
    use crdt_storage_node::infrastructure::partition::RendezvousPartitionScheme;
    use crdt_storage_node::infrastructure::serializer::BincodeEntrySerializer;
    use crdt_storage_node::infrastructure::wal::{FileWriteAheadLog, WalDrainer, WalRollPolicy};
    use crdt_storage_node::infrastructure::wire::{serve, AdminHooks, StaticAddressBook};

    type K = u64;
    type S = i64;
    type Ser = BincodeEntrySerializer<K, S>;
    type Cluster = ClusterStorage<K, S, MaxWinsMergeService, Ser>;

    /// One running node: its own WAL/chunk-store directories (kept alive via
    /// the `TempDir` guards), the wire server's accept loop, and a handle to
    /// stop it. "Killing" the node closes the listening socket when the
    /// task unwinds, so a fresh connection attempt afterward gets refused
    /// exactly like a downed peer would.
    struct RunningNode {
        addr: SocketAddr,
        local: Arc<LocalStorageNode<K, S>>,
        wal: Arc<FileWriteAheadLog<K, S, Ser>>,
        chunk_store: Arc<dyn ChunkStore<K, S>>,
        server: JoinHandle<()>,
        stop: tokio::sync::watch::Sender<bool>,
        _wal_dir: TempDir,
        _chunk_dir: TempDir,
    }

    async fn start_node() -> RunningNode {
        let wal_dir = tempdir();
        let chunk_dir = tempdir();
        let wal = Arc::new(FileWriteAheadLog::open(wal_dir.path(), Ser::new(), WalRollPolicy::default()).await.unwrap());
        let chunk_store: Arc<dyn ChunkStore<K, S>> =
            Arc::new(FileChunkStore::open(chunk_dir.path(), Ser::new(), MaxWinsMergeService, false).await.unwrap());
        let local = Arc::new(LocalStorageNode::new(wal.clone() as Arc<dyn WriteAheadLog<K, S>>, chunk_store.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let metrics = Arc::new(MetricsService::new().unwrap());
        let (stop, stop_rx) = tokio::sync::watch::channel(false);
        let server = tokio::spawn(serve(listener, local.clone(), Arc::new(Ser::new()), metrics, AdminHooks::default(), stop_rx));

        RunningNode { addr, local, wal, chunk_store, server, stop, _wal_dir: wal_dir, _chunk_dir: chunk_dir }
    }

    fn tempdir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    /// Stops the accept loop and waits for it to exit, which drops the
    /// `TcpListener` and closes the port: a genuine kill, not a simulated
    /// one. Subsequent connection attempts to `addr` are refused by the OS.
    async fn kill(node: RunningNode) {
        let _ = node.stop.send(true);
        node.server.await.unwrap();
    }

    async fn drain(wal: &Arc<FileWriteAheadLog<K, S, Ser>>, chunk_store: &Arc<dyn ChunkStore<K, S>>) {
        let drainer = WalDrainer::new(wal.clone(), chunk_store.clone(), Arc::new(Ser::new()), Arc::new(MaxWinsMergeService), Duration::from_millis(10));
        wal.rotate().await.unwrap();
        drainer.drain_once().await;
    }

    fn three_node_scheme(addrs: [SocketAddr; 3], replication: u32, min_active: u32) -> (PartitionSchemeSnapshot, StaticAddressBook) {
        let ids = [PartitionId::new("p0"), PartitionId::new("p1"), PartitionId::new("p2")];
        let mut table = HashMap::new();
        for (id, addr) in ids.iter().zip(addrs.iter()) {
            table.insert(id.clone(), *addr);
        }
        let snapshot = PartitionSchemeSnapshot::new(vec![PartitionGroup::new(ids.to_vec(), replication, min_active)], 64);
        (snapshot, StaticAddressBook::new(table))
    }

    fn new_cluster(snapshot: PartitionSchemeSnapshot, address_book: StaticAddressBook) -> Cluster {
        ClusterStorage::new(
            Arc::new(StaticDiscovery::new(snapshot)),
            Arc::new(RendezvousPartitionScheme::new()),
            Arc::new(address_book),
            Arc::new(Ser::new()),
            Arc::new(MaxWinsMergeService),
            None,
            None,
        )
    }

    /// Scenario 3: three nodes, R=2. Upload 1000 keys through the cluster,
    /// kill one node, and confirm `download` still returns every key.
    /// Replication means each key survives on at least one of the two
    /// remaining nodes regardless of which one went down.
    #[tokio::test]
    async fn scenario_three_cluster_survives_one_node_down() {
        let n0 = start_node().await;
        let n1 = start_node().await;
        let n2 = start_node().await;
        let (snapshot, address_book) = three_node_scheme([n0.addr, n1.addr, n2.addr], 2, 2);

        let writer = new_cluster(snapshot.clone(), address_book);
        let entries: Vec<Entry<K, S>> = (0..1000u64).map(|k| Entry::data(k, Timestamp(1), k as i64)).collect();
        writer.upload(futures::stream::iter(entries.into_iter().map(Ok)).boxed()).await.unwrap();

        drain(&n0.wal, &n0.chunk_store).await;
        drain(&n1.wal, &n1.chunk_store).await;
        drain(&n2.wal, &n2.chunk_store).await;

        let (_, address_book) = three_node_scheme([n0.addr, n1.addr, n2.addr], 2, 2);
        kill(n1).await;

        // A freshly constructed cluster client, so no connection to the
        // downed node survives from the write path above.
        let reader = new_cluster(snapshot, address_book);
        let mut out = reader.download(Timestamp::ZERO).await.unwrap();
        let mut keys = Vec::new();
        while let Some(entry) = out.next().await {
            keys.push(*entry.unwrap().key());
        }
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 1000, "every key must survive on at least one of the two remaining replicas");

        kill(n0).await;
        kill(n2).await;
    }

    /// Scenario 6: repartition drains one partition's content and routes it
    /// fresh through the cluster write path. With replication=1 across two
    /// partitions, a key that rendezvous-hashes to the other partition must
    /// have moved there after `repartition`; content that still belongs on
    /// the source stays put.
    #[tokio::test]
    async fn scenario_six_repartition_redistributes_content_per_the_current_scheme() {
        let n0 = start_node().await;
        let n1 = start_node().await;

        let mut table = HashMap::new();
        table.insert(PartitionId::new("p0"), n0.addr);
        table.insert(PartitionId::new("p1"), n1.addr);
        let group = PartitionGroup::new(vec![PartitionId::new("p0"), PartitionId::new("p1")], 1, 1);
        let snapshot = PartitionSchemeSnapshot::new(vec![group], 64);

        // Seed content directly onto node p0, as if it had been written
        // before this key range was reassigned by a scheme change.
        let entries: Vec<Entry<K, S>> = (0..200u64).map(|k| Entry::data(k, Timestamp(1), k as i64)).collect();
        n0.local.upload(futures::stream::iter(entries.into_iter().map(Ok)).boxed()).await.unwrap();
        drain(&n0.wal, &n0.chunk_store).await;

        let cluster = new_cluster(snapshot.clone(), StaticAddressBook::new(table.clone()));
        repartitioner::repartition(&cluster, PartitionId::new("p0")).await.unwrap();

        drain(&n0.wal, &n0.chunk_store).await;
        drain(&n1.wal, &n1.chunk_store).await;

        // Every key must now be found on whichever of the two nodes the
        // rendezvous scheme currently ranks first for it, and content is
        // preserved exactly (no loss, no duplication of value).
        let scheme = RendezvousPartitionScheme::new();
        use crdt_storage_domain::repositories::PartitionScheme;
        let serializer = Ser::new();

        let mut n0_out = n0.chunk_store.download(Timestamp::ZERO).await.unwrap();
        let mut n0_keys = Vec::new();
        while let Some(e) = n0_out.next().await {
            n0_keys.push(*e.unwrap().key());
        }
        let mut n1_out = n1.chunk_store.download(Timestamp::ZERO).await.unwrap();
        let mut n1_keys = Vec::new();
        while let Some(e) = n1_out.next().await {
            n1_keys.push(*e.unwrap().key());
        }

        use crdt_storage_domain::services::EntrySerializer;
        for k in 0..200u64 {
            let key_bytes = serializer.encode_key(&k).unwrap();
            let route = scheme.route(&snapshot, &key_bytes);
            let expected_home = route.ranked.first().cloned().unwrap();
            if expected_home == PartitionId::new("p0") {
                assert!(n0_keys.contains(&k), "key {k} should remain on p0");
            } else {
                assert!(n1_keys.contains(&k), "key {k} should have moved to p1");
            }
        }
        let total = n0_keys.len() + n1_keys.len();
        assert_eq!(total, 200, "repartition must neither lose nor duplicate content");

        kill(n0).await;
        kill(n1).await;
    }
}
