// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Wire Server
//!
//! This module is part of the Infrastructure layer: the length-framed TCP
//! server implementing the per-request state machine against a
//! `LocalStorageNode`.
//!
//! ```text
//! INIT → (Handshake received) → READY
//! READY → Upload → RECV_STREAM → send UploadAck → END
//! READY → Download → send DownloadStarted → SEND_STREAM → END
//! READY → Take → send TakeStarted → SEND_STREAM → await TakeAck → END
//! READY → Remove → RECV_STREAM → send RemoveAck → END
//! READY → Ping → send Pong → END
//! Any → error → send ServerError → END
//! ```
//!
//! `END` here means the connection returns to `READY` for the next
//! request. One connection serves many requests in sequence, matching
//! the client's "one connection per remote partition".

use futures::future::BoxFuture;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use crdt_storage_domain::entities::{CrdtState, Entry, Key};
use crdt_storage_domain::error::StorageError;
use crdt_storage_domain::services::EntrySerializer;
use crdt_storage_domain::value_objects::{PartitionId, Timestamp};

use super::framing::{read_bulk_entry, read_frame, write_bulk_end, write_frame};
use super::messages::{
    decode_request, encode_response, versions_compatible, CleanupReport, ConsolidateReport, NodeStatusReport, Request, Response,
    MINIMUM_SUPPORTED_VERSION, PROTOCOL_VERSION,
};
use crate::application::local_storage_node::LocalStorageNode;
use crate::infrastructure::metrics::MetricsService;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback for `Request::Repartition`, since repartitioning is a
/// `ClusterStorage` operation and `LocalStorageNode` has no notion of the
/// wider cluster. Left `None` for a node that is not cluster-aware.
pub type RepartitionFn = Arc<dyn Fn(PartitionId) -> BoxFuture<'static, Result<(), StorageError>> + Send + Sync>;

/// Hooks the wire server calls into for the operator-surface admin requests
/// that a plain `LocalStorageNode` cannot answer on its own.
#[derive(Clone, Default)]
pub struct AdminHooks {
    pub repartition: Option<RepartitionFn>,
    /// Signaled (set to `true`) when a `Request::Stop` arrives, so the
    /// binary's main task can drive graceful shutdown the same way an OS
    /// signal would.
    pub stop: Option<tokio::sync::watch::Sender<bool>>,
}

/// Accepts connections until `shutdown` fires, spawning one task per
/// connection.
pub async fn serve<K, S, Ser>(
    listener: TcpListener,
    node: Arc<LocalStorageNode<K, S>>,
    serializer: Arc<Ser>,
    metrics: Arc<MetricsService>,
    admin: AdminHooks,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) where
    K: Key,
    S: CrdtState,
    Ser: EntrySerializer<K, S> + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("wire server shutting down");
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let node = node.clone();
                        let serializer = serializer.clone();
                        let metrics = metrics.clone();
                        let admin = admin.clone();
                        tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, node, serializer, metrics, admin).await {
                                    tracing::warn!(error = %e, %peer, "connection ended with an error");
                                }
                            });
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to accept connection"),
                }
            }
        }
    }
}

async fn handle_connection<K, S, Ser>(
    mut stream: TcpStream,
    node: Arc<LocalStorageNode<K, S>>,
    serializer: Arc<Ser>,
    metrics: Arc<MetricsService>,
    admin: AdminHooks,
) -> Result<(), StorageError>
where
    K: Key,
    S: CrdtState,
    Ser: EntrySerializer<K, S> + Send + Sync + 'static,
{
    // INIT → READY
    let frame = read_frame(&mut stream).await.map_err(|e| StorageError::IoError(e.to_string()))?;
    let request = decode_request(&frame)?;
    let Request::Handshake { version } = request else {
        return Err(StorageError::protocol("first message on a connection must be Handshake"));
    };
    if !versions_compatible(PROTOCOL_VERSION, version) {
        let resp = Response::HandshakeFailure {
            minimum_version: MINIMUM_SUPPORTED_VERSION,
            message: format!("server speaks major version {}, client offered {}", PROTOCOL_VERSION.major, version.major),
        };
        send_response(&mut stream, &resp).await?;
        return Ok(());
    }
    send_response(&mut stream, &Response::HandshakeOk).await?;

    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(StorageError::IoError(e.to_string())),
        };
        let request = decode_request(&frame)?;

        let outcome = handle_request(&mut stream, &node, serializer.as_ref(), metrics.as_ref(), &admin, request).await;
        if let Err(e) = outcome {
            let _ = send_response(&mut stream, &Response::ServerError { message: e.to_string() }).await;
            return Err(e);
        }
    }
}

async fn handle_request<K, S, Ser>(
    stream: &mut TcpStream,
    node: &LocalStorageNode<K, S>,
    serializer: &Ser,
    metrics: &MetricsService,
    admin: &AdminHooks,
    request: Request,
) -> Result<(), StorageError>
where
    K: Key,
    S: CrdtState,
    Ser: EntrySerializer<K, S>,
{
    use crdt_storage_domain::repositories::StorageNode;

    match request {
        Request::Handshake {.. } => Err(StorageError::protocol("unexpected Handshake after READY")),
        Request::Upload => {
            let entries = recv_bulk_entries(stream, serializer).await?;
            node.upload(futures::stream::iter(entries.into_iter().map(Ok)).boxed()).await?;
            metrics.record_upload();
            send_response(stream, &Response::UploadAck).await
        }
        Request::Download { since } => {
            send_response(stream, &Response::DownloadStarted).await?;
            let mut entries = node.download(Timestamp(since)).await?;
            while let Some(entry) = entries.next().await {
                let entry = entry?;
                let payload = serializer.encode(&entry)?;
                write_frame(stream, &payload).await.map_err(|e| StorageError::IoError(e.to_string()))?;
            }
            metrics.record_download();
            write_bulk_end(stream).await.map_err(|e| StorageError::IoError(e.to_string()))
        }
        Request::Take => {
            send_response(stream, &Response::TakeStarted).await?;
            let mut entries = node.take().await?;
            while let Some(entry) = entries.next().await {
                let entry = entry?;
                let payload = serializer.encode(&entry)?;
                write_frame(stream, &payload).await.map_err(|e| StorageError::IoError(e.to_string()))?;
            }
            write_bulk_end(stream).await.map_err(|e| StorageError::IoError(e.to_string()))?;

            let frame = read_frame(stream).await.map_err(|e| StorageError::IoError(e.to_string()))?;
            match decode_request(&frame)? {
                Request::TakeAck => {
                    node.commit_take().await?;
                    metrics.record_take();
                    Ok(())
                }
                _ => Err(StorageError::protocol("expected TakeAck after a Take stream")),
            }
        }
        Request::TakeAck => Err(StorageError::protocol("TakeAck without a preceding Take")),
        Request::Remove => {
            let entries = recv_bulk_entries(stream, serializer).await?;
            node.remove(futures::stream::iter(entries.into_iter().map(Ok)).boxed()).await?;
            metrics.record_remove();
            send_response(stream, &Response::RemoveAck).await
        }
        Request::Ping => {
            node.ping(PING_TIMEOUT).await?;
            send_response(stream, &Response::Pong).await
        }
        Request::Status => {
            let status = node.status().await?;
            metrics.set_chunk_count(status.chunk_count as i64);
            let report = NodeStatusReport {
                chunk_count: status.chunk_count,
                wal_segment_count: status.wal_segment_count,
                finalized_wal_segment_count: status.finalized_wal_segment_count,
            };
            send_response(stream, &Response::StatusReport(report)).await
        }
        Request::ConsolidateNow => {
            let diff = node.consolidate().await?;
            metrics.record_consolidation();
            let report = ConsolidateReport {
                consolidated: diff.is_some(),
                chunks_removed: diff.map(|d| d.removed.len()).unwrap_or(0),
            };
            send_response(stream, &Response::ConsolidateDone(report)).await
        }
        Request::CleanupNow => {
            let removed = node.cleanup_irrelevant().await?;
            let report = CleanupReport { chunks_removed: removed.len() };
            send_response(stream, &Response::CleanupDone(report)).await
        }
        Request::Repartition { source } => {
            let repartition = admin
            .repartition
            .clone()
            .ok_or_else(|| StorageError::protocol("this node does not accept Repartition requests"))?;
            repartition(source).await?;
            send_response(stream, &Response::RepartitionAck).await
        }
        Request::Stop => {
            if let Some(stop_tx) = &admin.stop {
                let _ = stop_tx.send(true);
                send_response(stream, &Response::StopAck).await
            } else {
                Err(StorageError::protocol("this node does not accept Stop requests"))
            }
        }
    }
}

async fn recv_bulk_entries<K, S, Ser>(stream: &mut TcpStream, serializer: &Ser) -> Result<Vec<Entry<K, S>>, StorageError>
where
    K: Key,
    S: CrdtState,
    Ser: EntrySerializer<K, S>,
{
    let mut entries = Vec::new();
    while let Some(payload) = read_bulk_entry(stream).await.map_err(|e| StorageError::IoError(e.to_string()))? {
        entries.push(serializer.decode(&payload)?);
    }
    Ok(entries)
}

async fn send_response(stream: &mut TcpStream, response: &Response) -> Result<(), StorageError> {
    let bytes = encode_response(response)?;
    write_frame(stream, &bytes).await.map_err(|e| StorageError::IoError(e.to_string()))
}
