// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Node Configuration
//!
//! Layered configuration for a running node: `config/default.toml` <
//! a caller-supplied file (`--config`, or `config/<env>.toml`) < environment
//! variables prefixed `CRDT_`. Every key named by the enumerated
//! configuration list has a baked-in default, so a node starts with
//! nothing but `crdt-node start` and no files on disk.
//!
//! Uses struct-per-section settings with a `Default` impl covering every
//! field, reached through the `config` crate's layered builder.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crdt_storage_domain::error::StorageError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub compression: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalConfig {
    pub path: PathBuf,
    pub channel_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsolidateConfig {
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
}

/// One partition group's replication policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClusterGroupConfig {
    pub partitions: Vec<String>,
    pub replication: u32,
    pub min_active: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    pub buckets: u32,
    #[serde(default)]
    pub groups: Vec<ClusterGroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetConfig {
    pub bind: String,
    pub connect_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub packet_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsyncConfig {
    pub uploads: bool,
    pub directories: bool,
    pub appends: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsConfig {
    pub bind: String,
}

/// A running node's full configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// This node's own partition id, if it participates in a cluster.
    #[serde(default)]
    pub partition_id: Option<String>,
    pub storage: StorageConfig,
    pub wal: WalConfig,
    pub consolidate: ConsolidateConfig,
    pub cluster: ClusterConfig,
    pub net: NetConfig,
    pub fsync: FsyncConfig,
    pub metrics: MetricsConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            partition_id: None,
            storage: StorageConfig { path: PathBuf::from("data/chunks"), compression: false },
            wal: WalConfig { path: PathBuf::from("data/wal"), channel_depth: 1024 },
            consolidate: ConsolidateConfig { interval_secs: 300, initial_delay_secs: 30 },
            cluster: ClusterConfig { buckets: 256, groups: Vec::new() },
            net: NetConfig {
                bind: "127.0.0.1:7878".to_string(),
                connect_timeout_ms: 5000,
                reconnect_interval_ms: 1000,
                packet_size: 65536,
            },
            fsync: FsyncConfig { uploads: true, directories: true, appends: true },
            metrics: MetricsConfig { bind: "127.0.0.1:9090".to_string() },
        }
    }
}

impl NodeConfig {
    /// Loads configuration layering, in increasing precedence:
    /// 1. Built-in defaults (this struct's `Default` impl).
    /// 2. `config/default.toml`, if present.
    /// 3. `config_path`, if the caller supplied one (`--config`).
    /// 4. Environment variables prefixed `CRDT_` (e.g. `CRDT_STORAGE_PATH`,
    /// `CRDT_NET_BIND`), section and field separated by `__` (e.g.
    /// `CRDT_WAL__CHANNEL_DEPTH` for `wal.channel_depth`), so a multi-word
    /// leaf field name is never split into extra path segments.
    pub fn load(config_path: Option<&Path>) -> Result<Self, StorageError> {
        let defaults = NodeConfig::default();
        let mut builder = Config::builder()
        .set_default("storage.path", path_str(&defaults.storage.path))
        .map_err(config_err)?
        .set_default("storage.compression", defaults.storage.compression)
        .map_err(config_err)?
        .set_default("wal.path", path_str(&defaults.wal.path))
        .map_err(config_err)?
        .set_default("wal.channel_depth", defaults.wal.channel_depth as i64)
        .map_err(config_err)?
        .set_default("consolidate.interval_secs", defaults.consolidate.interval_secs as i64)
        .map_err(config_err)?
        .set_default("consolidate.initial_delay_secs", defaults.consolidate.initial_delay_secs as i64)
        .map_err(config_err)?
        .set_default("cluster.buckets", defaults.cluster.buckets as i64)
        .map_err(config_err)?
        .set_default("net.bind", defaults.net.bind.clone())
        .map_err(config_err)?
        .set_default("net.connect_timeout_ms", defaults.net.connect_timeout_ms as i64)
        .map_err(config_err)?
        .set_default("net.reconnect_interval_ms", defaults.net.reconnect_interval_ms as i64)
        .map_err(config_err)?
        .set_default("net.packet_size", defaults.net.packet_size as i64)
        .map_err(config_err)?
        .set_default("fsync.uploads", defaults.fsync.uploads)
        .map_err(config_err)?
        .set_default("fsync.directories", defaults.fsync.directories)
        .map_err(config_err)?
        .set_default("fsync.appends", defaults.fsync.appends)
        .map_err(config_err)?
        .set_default("metrics.bind", defaults.metrics.bind.clone())
        .map_err(config_err)?
        .add_source(File::with_name("config/default").required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(Environment::with_prefix("CRDT").separator("__"));

        let settings = builder.build().map_err(config_err)?;
        settings.try_deserialize().map_err(config_err)
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn config_err(err: config::ConfigError) -> StorageError {
    StorageError::InvalidConfiguration(err.to_string())
}
