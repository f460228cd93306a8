// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Prometheus metric registration and update methods for a running node.
//!
//! Counts the ambient operations this engine's ops surface cares about:
//! uploads, downloads, takes, removes, consolidations, WAL rotations, and
//! discovery ticks, plus gauges for chunk count, WAL backlog, and the live
//! replica count per partition group.

use std::sync::Arc;

use prometheus::{Gauge, IntCounter, IntGauge, Opts, Registry};

use crdt_storage_domain::error::StorageError;

fn metrics_err(what: &str, e: prometheus::Error) -> StorageError {
    StorageError::InternalError(format!("failed to {what}: {e}"))
}

#[derive(Clone)]
pub struct MetricsService {
    registry: Arc<Registry>,

    uploads_total: IntCounter,
    downloads_total: IntCounter,
    takes_total: IntCounter,
    removes_total: IntCounter,
    consolidations_total: IntCounter,
    wal_rotations_total: IntCounter,
    discovery_ticks_total: IntCounter,
    incomplete_cluster_errors_total: IntCounter,

    chunk_count: IntGauge,
    wal_backlog_bytes: IntGauge,
    live_replicas: Gauge,
}

impl MetricsService {
    pub fn new() -> Result<Self, StorageError> {
        let registry = Registry::new();

        let uploads_total = IntCounter::with_opts(
            Opts::new("uploads_total", "Total entries uploaded").namespace("crdt_node"),
        )
        .map_err(|e| metrics_err("create uploads_total", e))?;
        let downloads_total = IntCounter::with_opts(
            Opts::new("downloads_total", "Total download streams served").namespace("crdt_node"),
        )
        .map_err(|e| metrics_err("create downloads_total", e))?;
        let takes_total = IntCounter::with_opts(
            Opts::new("takes_total", "Total take operations served").namespace("crdt_node"),
        )
        .map_err(|e| metrics_err("create takes_total", e))?;
        let removes_total = IntCounter::with_opts(
            Opts::new("removes_total", "Total remove operations served").namespace("crdt_node"),
        )
        .map_err(|e| metrics_err("create removes_total", e))?;
        let consolidations_total = IntCounter::with_opts(
            Opts::new("consolidations_total", "Total chunk consolidation passes run").namespace("crdt_node"),
        )
        .map_err(|e| metrics_err("create consolidations_total", e))?;
        let wal_rotations_total = IntCounter::with_opts(
            Opts::new("wal_rotations_total", "Total write-ahead log segment rotations").namespace("crdt_node"),
        )
        .map_err(|e| metrics_err("create wal_rotations_total", e))?;
        let discovery_ticks_total = IntCounter::with_opts(
            Opts::new("discovery_ticks_total", "Total discovery snapshot updates observed").namespace("crdt_node"),
        )
        .map_err(|e| metrics_err("create discovery_ticks_total", e))?;
        let incomplete_cluster_errors_total = IntCounter::with_opts(
            Opts::new("incomplete_cluster_errors_total", "Total operations rejected for insufficient live replicas")
            .namespace("crdt_node"),
        )
        .map_err(|e| metrics_err("create incomplete_cluster_errors_total", e))?;

        let chunk_count = IntGauge::with_opts(
            Opts::new("chunk_count", "Number of chunk files currently on disk").namespace("crdt_node"),
        )
        .map_err(|e| metrics_err("create chunk_count", e))?;
        let wal_backlog_bytes = IntGauge::with_opts(
            Opts::new("wal_backlog_bytes", "Bytes of write-ahead log not yet drained into chunks").namespace("crdt_node"),
        )
        .map_err(|e| metrics_err("create wal_backlog_bytes", e))?;
        let live_replicas = Gauge::with_opts(
            Opts::new("live_replicas", "Live replica count across active partition groups").namespace("crdt_node"),
        )
        .map_err(|e| metrics_err("create live_replicas", e))?;

        registry
        .register(Box::new(uploads_total.clone()))
        .map_err(|e| metrics_err("register uploads_total", e))?;
        registry
        .register(Box::new(downloads_total.clone()))
        .map_err(|e| metrics_err("register downloads_total", e))?;
        registry
        .register(Box::new(takes_total.clone()))
        .map_err(|e| metrics_err("register takes_total", e))?;
        registry
        .register(Box::new(removes_total.clone()))
        .map_err(|e| metrics_err("register removes_total", e))?;
        registry
        .register(Box::new(consolidations_total.clone()))
        .map_err(|e| metrics_err("register consolidations_total", e))?;
        registry
        .register(Box::new(wal_rotations_total.clone()))
        .map_err(|e| metrics_err("register wal_rotations_total", e))?;
        registry
        .register(Box::new(discovery_ticks_total.clone()))
        .map_err(|e| metrics_err("register discovery_ticks_total", e))?;
        registry
        .register(Box::new(incomplete_cluster_errors_total.clone()))
        .map_err(|e| metrics_err("register incomplete_cluster_errors_total", e))?;
        registry
        .register(Box::new(chunk_count.clone()))
        .map_err(|e| metrics_err("register chunk_count", e))?;
        registry
        .register(Box::new(wal_backlog_bytes.clone()))
        .map_err(|e| metrics_err("register wal_backlog_bytes", e))?;
        registry
        .register(Box::new(live_replicas.clone()))
        .map_err(|e| metrics_err("register live_replicas", e))?;

        Ok(Self {
                registry: Arc::new(registry),
                uploads_total,
                downloads_total,
                takes_total,
                removes_total,
                consolidations_total,
                wal_rotations_total,
                discovery_ticks_total,
                incomplete_cluster_errors_total,
                chunk_count,
                wal_backlog_bytes,
                live_replicas,
            })
    }

    pub fn record_upload(&self) {
        self.uploads_total.inc();
    }

    pub fn record_download(&self) {
        self.downloads_total.inc();
    }

    pub fn record_take(&self) {
        self.takes_total.inc();
    }

    pub fn record_remove(&self) {
        self.removes_total.inc();
    }

    pub fn record_consolidation(&self) {
        self.consolidations_total.inc();
    }

    pub fn record_wal_rotation(&self) {
        self.wal_rotations_total.inc();
    }

    pub fn record_discovery_tick(&self) {
        self.discovery_ticks_total.inc();
    }

    pub fn record_incomplete_cluster(&self) {
        self.incomplete_cluster_errors_total.inc();
    }

    pub fn set_chunk_count(&self, count: i64) {
        self.chunk_count.set(count);
    }

    pub fn set_wal_backlog_bytes(&self, bytes: i64) {
        self.wal_backlog_bytes.set(bytes);
    }

    pub fn set_live_replicas(&self, count: f64) {
        self.live_replicas.set(count);
    }

    pub fn render(&self) -> Result<String, StorageError> {
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        encoder
        .encode_to_string(&families)
        .map_err(|e| StorageError::InternalError(format!("failed to encode metrics: {e}")))
    }
}

impl Default for MetricsService {
    fn default() -> Self {
        Self::new().expect("metric registration with fixed, non-conflicting names cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_metrics_in_prometheus_text_format() {
        let service = MetricsService::new().unwrap();
        service.record_upload();
        service.record_upload();
        service.set_chunk_count(7);

        let text = service.render().unwrap();
        assert!(text.contains("crdt_node_uploads_total 2"));
        assert!(text.contains("crdt_node_chunk_count 7"));
    }

    #[test]
    fn counters_start_at_zero() {
        let service = MetricsService::new().unwrap();
        let text = service.render().unwrap();
        assert!(text.contains("crdt_node_downloads_total 0"));
    }
}
