// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # `crdt-node` binary
//!
//! The composition root: parses and validates the CLI (`crdt_storage_bootstrap`),
//! loads layered configuration, and for `start` wires every concrete adapter
//! (`crdt_storage_node::infrastructure`) into the two application-layer endpoints
//! (`LocalStorageNode`, optionally `ClusterStorage`) before handing control to
//! the reactor until a signal or an admin `Stop` request arrives. Every other
//! subcommand is a thin wire-protocol admin client against an already-running
//! node.
//!
//! This binary fixes the engine's generic `K`/`S` parameters to `Vec<u8>`:
//! a deployment's CRDT state is opaque bytes from this process's point of
//! view, with [`MaxWinsMergeService`] as the default merge function. A
//! deployment with a richer CRDT plugs in its own `CrdtMergeService<Vec<u8>>`
//! by forking this composition root; the domain and infrastructure layers
//! underneath are already generic over that choice.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crdt_storage_bootstrap::cli::{ValidatedCli, ValidatedCommand};
use crdt_storage_bootstrap::logger::{BootstrapLogger, ConsoleLogger};
use crdt_storage_bootstrap::shutdown::ShutdownCoordinator;
use crdt_storage_bootstrap::signals::create_signal_handler;
use crdt_storage_bootstrap::{bootstrap_cli, result_to_exit_code};

use crdt_storage_domain::error::StorageError;
use crdt_storage_domain::repositories::{ChunkStore, StorageNode, WriteAheadLog};
use crdt_storage_domain::services::MaxWinsMergeService;
use crdt_storage_domain::value_objects::PartitionId;

use crdt_storage_node::application::repartitioner;
use crdt_storage_node::application::{ClusterStorage, LocalStorageNode};
use crdt_storage_node::infrastructure::chunk_store::FileChunkStore;
use crdt_storage_node::infrastructure::config::NodeConfig;
use crdt_storage_node::infrastructure::discovery::StaticDiscovery;
use crdt_storage_node::infrastructure::logging::{self, LogFormat};
use crdt_storage_node::infrastructure::metrics::{MetricsEndpoint, MetricsService};
use crdt_storage_node::infrastructure::partition::RendezvousPartitionScheme;
use crdt_storage_node::infrastructure::serializer::BincodeEntrySerializer;
use crdt_storage_node::infrastructure::wal::{FileWriteAheadLog, WalDrainer, WalRollPolicy};
use crdt_storage_node::infrastructure::wire::{self, AdminHooks, DirectAddressBook, Request, Response};

type Key = Vec<u8>;
type State = Vec<u8>;
type Serializer = BincodeEntrySerializer<Key, State>;
type Merge = MaxWinsMergeService;
type Cluster = ClusterStorage<Key, State, Merge, Serializer>;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let bootstrap_logger = ConsoleLogger::with_prefix("crdt-node");

    let validated = match bootstrap_cli() {
        Ok(cli) => cli,
        Err(e) => {
            bootstrap_logger.error(&format!("argument validation failed: {e}"));
            return std::process::ExitCode::from(64); // EX_USAGE
        }
    };

    let result = run(validated).await;
    if let Err(e) = &result {
        bootstrap_logger.error(&format!("{e}"));
    }
    result_to_exit_code(result)
}

async fn run(cli: ValidatedCli) -> Result<(), StorageError> {
    match cli.command.clone() {
        ValidatedCommand::Start { storage_path, wal_path, bind, partition_id } => {
            run_start(&cli, storage_path, wal_path, bind, partition_id).await
        }
        ValidatedCommand::Validate { config } => {
            NodeConfig::load(Some(&config))?;
            println!("{} is valid", config.display());
            Ok(())
        }
        ValidatedCommand::Stop => {
            let response = call_admin(&cli, Request::Stop).await?;
            expect_ack(response, "StopAck")
        }
        ValidatedCommand::ConsolidateNow => {
            match call_admin(&cli, Request::ConsolidateNow).await? {
                Response::ConsolidateDone(report) => {
                    println!("consolidated={} chunks_removed={}", report.consolidated, report.chunks_removed);
                    Ok(())
                }
                other => Err(unexpected_response("ConsolidateDone", other)),
            }
        }
        ValidatedCommand::CleanupNow => match call_admin(&cli, Request::CleanupNow).await? {
            Response::CleanupDone(report) => {
                println!("chunks_removed={}", report.chunks_removed);
                Ok(())
            }
            other => Err(unexpected_response("CleanupDone", other)),
        },
        ValidatedCommand::Repartition { source } => {
            let response = call_admin(&cli, Request::Repartition { source: PartitionId::new(source) }).await?;
            expect_ack(response, "RepartitionAck")
        }
        ValidatedCommand::Ping => {
            let response = call_admin(&cli, Request::Ping).await?;
            expect_ack(response, "Pong")
        }
        ValidatedCommand::Status => match call_admin(&cli, Request::Status).await? {
            Response::StatusReport(report) => {
                println!(
                    "chunks={} wal_segments={} wal_segments_finalized={}",
                    report.chunk_count, report.wal_segment_count, report.finalized_wal_segment_count
                );
                Ok(())
            }
            other => Err(unexpected_response("StatusReport", other)),
        },
    }
}

fn expect_ack(response: Response, what: &'static str) -> Result<(), StorageError> {
    match response {
        Response::StopAck | Response::RepartitionAck | Response::Pong => {
            println!("{what}: ok");
            Ok(())
        }
        other => Err(unexpected_response(what, other)),
    }
}

fn unexpected_response(expected: &'static str, got: Response) -> StorageError {
    StorageError::protocol(format!("expected {expected}, got {got:?}"))
}

async fn call_admin(cli: &ValidatedCli, request: Request) -> Result<Response, StorageError> {
    let addr: SocketAddr = cli
        .node_addr
        .parse()
        .map_err(|e| StorageError::protocol(format!("invalid --node-addr {}: {e}", cli.node_addr)))?;
    wire::call_admin(addr, Duration::from_millis(cli.connect_timeout_ms), request).await
}

async fn run_start(
    cli: &ValidatedCli,
    storage_path_override: Option<PathBuf>,
    wal_path_override: Option<PathBuf>,
    bind_override: Option<String>,
    partition_id_override: Option<String>,
) -> Result<(), StorageError> {
    let mut config = NodeConfig::load(cli.config.as_deref())?;
    if let Some(path) = storage_path_override {
        config.storage.path = path;
    }
    if let Some(path) = wal_path_override {
        config.wal.path = path;
    }
    if let Some(bind) = bind_override {
        config.net.bind = bind;
    }
    if let Some(pid) = partition_id_override {
        config.partition_id = Some(pid);
    }

    logging::init(LogFormat::Pretty, cli.verbose);
    tracing::info!(bind = %config.net.bind, storage = %config.storage.path.display(), wal = %config.wal.path.display(), "starting crdt-node");

    let serializer = Arc::new(Serializer::new());
    let merge = Arc::new(MaxWinsMergeService);
    let metrics = Arc::new(MetricsService::new()?);

    let wal = Arc::new(
        FileWriteAheadLog::<Key, State, Serializer>::open(
            config.wal.path.clone(),
            Serializer::new(),
            WalRollPolicy { fsync_on_append: config.fsync.appends, ..WalRollPolicy::default() },
        )
        .await?,
    );
    let chunk_store: Arc<dyn ChunkStore<Key, State>> = Arc::new(
        FileChunkStore::<Key, State, Serializer, Merge>::open(
            config.storage.path.clone(),
            Serializer::new(),
            MaxWinsMergeService,
            config.storage.compression,
        )
        .await?,
    );
    let local_node = Arc::new(LocalStorageNode::new(
        wal.clone() as Arc<dyn WriteAheadLog<Key, State>>,
        chunk_store.clone(),
    ));

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let drainer = Arc::new(
        WalDrainer::new(wal.clone(), chunk_store.clone(), serializer.clone(), merge.clone(), Duration::from_millis(500))
            .with_metrics(metrics.clone()),
    );
    tokio::spawn({
        let drainer = drainer.clone();
        let stop_rx = stop_rx.clone();
        async move { drainer.run_until(stop_rx).await }
    });

    let cluster: Option<Arc<Cluster>> = if config.cluster.groups.is_empty() {
        None
    } else {
        let local_id = config.partition_id.clone().map(PartitionId::new);
        let snapshot = crdt_storage_domain::entities::PartitionSchemeSnapshot::new(
            config
                .cluster
                .groups
                .iter()
                .map(|g| {
                    crdt_storage_domain::entities::PartitionGroup::new(
                        g.partitions.iter().cloned().map(PartitionId::new).collect(),
                        g.replication,
                        g.min_active,
                    )
                })
                .collect(),
            config.cluster.buckets,
        );
        Some(Arc::new(ClusterStorage::new(
            Arc::new(StaticDiscovery::new(snapshot)),
            Arc::new(RendezvousPartitionScheme::new()),
            Arc::new(DirectAddressBook),
            serializer.clone(),
            merge.clone(),
            local_id,
            Some(local_node.clone() as Arc<dyn StorageNode<Key, State>>),
        )))
    };

    let admin = AdminHooks {
        repartition: cluster.clone().map(|cluster| -> wire::RepartitionFn {
            Arc::new(move |source| {
                let cluster = cluster.clone();
                Box::pin(async move { repartitioner::repartition(&cluster, source).await })
            })
        }),
        stop: Some(stop_tx.clone()),
    };

    spawn_consolidation_scheduler(local_node.clone(), metrics.clone(), &config, stop_rx.clone());

    tokio::spawn({
        let metrics = metrics.clone();
        let bind = config.metrics.bind.clone();
        async move {
            if let Err(e) = MetricsEndpoint::new(metrics).start(&bind).await {
                tracing::error!(error = %e, "metrics endpoint failed");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.net.bind)
        .await
        .map_err(|e| StorageError::IoError(format!("failed to bind {}: {e}", config.net.bind)))?;

    let shutdown = ShutdownCoordinator::default();
    spawn_signal_watcher(shutdown.clone(), stop_tx.clone());

    let server_task = tokio::spawn(wire::serve(listener, local_node, serializer, metrics, admin, stop_rx.clone()));

    // Block here until either an OS signal or an admin Stop request flips
    // the shared watch channel. The server's own accept loop observes the
    // same channel and unwinds its connections independently.
    let mut awaited_stop = stop_rx;
    while !*awaited_stop.borrow() {
        if awaited_stop.changed().await.is_err() {
            break;
        }
    }
    shutdown.initiate_shutdown();

    if !shutdown.wait_with_timeout(Duration::from_secs(5)).await {
        tracing::warn!("graceful shutdown grace period expired");
    }
    let _ = server_task.await;
    shutdown.complete_shutdown();
    tracing::info!("crdt-node stopped");
    Ok(())
}

/// Runs `consolidate` on the configured interval, after `initial_delay_secs`.
/// Irrelevant-chunk cleanup is intentionally left to the explicit
/// `cleanup-now` operator command rather than a second scheduled loop: the
/// two are mutually exclusive at the chunk store, and consolidation alone is
/// enough to keep chunk count bounded in steady state.
fn spawn_consolidation_scheduler(
    node: Arc<LocalStorageNode<Key, State>>,
    metrics: Arc<MetricsService>,
    config: &NodeConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let initial_delay = Duration::from_secs(config.consolidate.initial_delay_secs);
    let interval = Duration::from_secs(config.consolidate.interval_secs.max(1));
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(initial_delay) => {}
        }
        loop {
            match node.consolidate().await {
                Ok(Some(diff)) => {
                    metrics.record_consolidation();
                    tracing::info!(chunks_removed = diff.removed.len(), "consolidation pass committed");
                }
                Ok(None) => tracing::debug!("consolidation pass found nothing to do"),
                Err(e) if e.is_benign_contention() => tracing::debug!(error = %e, "consolidation deferred"),
                Err(e) => tracing::warn!(error = %e, "consolidation pass failed"),
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    });
}

/// Wires the platform's signal handler into both the grace-period
/// coordinator (for the main task's own wind-down) and the shared stop
/// channel the wire server and drainer already watch.
fn spawn_signal_watcher(shutdown: ShutdownCoordinator, stop_tx: tokio::sync::watch::Sender<bool>) {
    tokio::spawn(async move {
        let handler = create_signal_handler();
        handler
            .wait_for_signal(Box::new(move || {
                shutdown.initiate_shutdown();
                let _ = stop_tx.send(true);
            }))
            .await;
    });
}
