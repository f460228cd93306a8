// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # WAL Drainer
//!
//! The background task that scans for finalized WAL segments, normalizes
//! and collapses their entries, and hands them to the chunk store.
//! Runs directly against segment files rather than through the
//! `WriteAheadLog` trait: per-segment deletion after a successful upload
//! needs the individual segment's path, which the trait's aggregate
//! `replay()` deliberately does not expose.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use crdt_storage_domain::entities::{CrdtState, Entry, Key, WalSegment};
use crdt_storage_domain::error::StorageError;
use crdt_storage_domain::repositories::ChunkStore;
use crdt_storage_domain::services::{CrdtMergeService, EntrySerializer};

use super::file_wal::FileWriteAheadLog;
use super::record::read_records_tolerant;
use crate::infrastructure::entry_reduce::k_way_merge;
use crate::infrastructure::metrics::MetricsService;

pub struct WalDrainer<K, S, Ser, M> {
    wal: Arc<FileWriteAheadLog<K, S, Ser>>,
    chunk_store: Arc<dyn ChunkStore<K, S>>,
    serializer: Arc<Ser>,
    merge: Arc<M>,
    retry_backoff: Duration,
    metrics: Option<Arc<MetricsService>>,
}

impl<K, S, Ser, M> WalDrainer<K, S, Ser, M>
where
    K: Key,
    S: CrdtState,
    Ser: EntrySerializer<K, S> + Send + Sync + 'static,
    M: CrdtMergeService<S> + Send + Sync + 'static,
{
    pub fn new(
        wal: Arc<FileWriteAheadLog<K, S, Ser>>,
        chunk_store: Arc<dyn ChunkStore<K, S>>,
        serializer: Arc<Ser>,
        merge: Arc<M>,
        retry_backoff: Duration,
    ) -> Self {
        Self { wal, chunk_store, serializer, merge, retry_backoff, metrics: None }
    }

    /// Reports each successfully drained segment to `metrics` as a WAL
    /// rotation leaving the backlog.
    pub fn with_metrics(mut self, metrics: Arc<MetricsService>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Drains every currently-finalized segment once, in lexical order.
    /// Returns the number of segments successfully uploaded and deleted. A
    /// segment that fails to upload is left in place for the next pass.
    /// The chunk store's merge semantics make a replay of an
    /// already-applied segment idempotent.
    pub async fn drain_once(&self) -> usize {
        let mut segments: Vec<WalSegment> = self.wal.segments().await.into_iter().filter(|s| s.finalized).collect();
        segments.sort_by_key(|s| s.order_key());

        let mut drained = 0;
        for segment in segments {
            match self.drain_segment(&segment).await {
                Ok(()) => {
                    if let Err(e) = self.wal.discard(segment.clone()).await {
                        tracing::warn!(error = %e, segment = ?segment.order_key(), "drained segment but failed to delete it");
                    }
                    if let Some(metrics) = &self.metrics {
                        metrics.record_wal_rotation();
                    }
                    drained += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, segment = ?segment.order_key(), "WAL segment upload failed, will retry");
                }
            }
        }
        drained
    }

    async fn drain_segment(&self, segment: &WalSegment) -> Result<(), StorageError> {
        let bytes = tokio::fs::read(&segment.path).await?;
        let mut entries: Vec<Entry<K, S>> = read_records_tolerant(&bytes)
        .iter()
        .map(|r| self.serializer.decode(r))
        .collect::<Result<_, _>>()?;

        // "streams entries through a stable sort by K... to collapse
        // duplicates": writes to the same key within one segment
        // may have arrived out of timestamp order.
        entries.sort_by(|a, b| a.key().cmp(b.key()));
        let reduced = k_way_merge(vec![entries], self.merge.as_ref());
        if reduced.is_empty() {
            return Ok(());
        }

        let upload_stream = stream::iter(reduced.into_iter().map(Ok)).boxed();
        self.chunk_store.upload(upload_stream).await
    }

    /// Runs `drain_once` on a fixed interval until `shutdown` resolves.
    /// Each pass that drains nothing still waits `retry_backoff`
    /// before trying again.
    pub async fn run_until(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.retry_backoff) => {
                    let drained = self.drain_once().await;
                    tracing::debug!(drained, "WAL drain pass complete");
                }
            }
        }
    }
}
