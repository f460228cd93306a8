// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # CLI Parser
//!
//! Command-line interface parsing using clap.
//!
//! This module defines the CLI structure and handles argument parsing.
//! Security validation happens in the validator module after parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Main CLI structure
#[derive(Parser, Debug, Clone)]
#[command(name = "crdt-node")]
#[command(about = concat!("CRDT Storage Engine node v", env!("CARGO_PKG_VERSION")))]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (layered under config/default.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address of a running node to target for operator commands
    ///
    /// Used by `ping`, `status`, `consolidate-now`, `cleanup-now`, and
    /// `repartition`, which speak the wire protocol to an already-running
    /// node rather than starting a new one.
    #[arg(long, default_value = "127.0.0.1:7878")]
    pub node_addr: String,

    /// Connection timeout in milliseconds for operator commands
    #[arg(long, default_value = "5000")]
    pub connect_timeout_ms: u64,
}

/// CLI subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the node: open storage, bind the wire server, run until signaled
    Start {
        /// Root directory for chunk files (overrides storage.path)
        #[arg(long)]
        storage_path: Option<PathBuf>,

        /// Directory for WAL segments (overrides wal.path)
        #[arg(long)]
        wal_path: Option<PathBuf>,

        /// Address to bind the wire server to (overrides net.bind)
        #[arg(long)]
        bind: Option<String>,

        /// This node's partition id within its partition group
        #[arg(long)]
        partition_id: Option<String>,
    },

    /// Ask a running node to stop gracefully
    Stop,

    /// Trigger chunk consolidation immediately, bypassing the scheduler
    ConsolidateNow,

    /// Trigger a pass that removes chunks wholly dominated by tombstones
    CleanupNow,

    /// Move a partition's local content through the cluster write path
    Repartition {
        /// Partition id whose local content should be redistributed
        source: String,
    },

    /// Liveness check: round-trip a Ping to the node and report success
    Ping,

    /// Print chunk count, WAL backlog, and replica health as seen by the node
    Status,

    /// Validate a configuration file without starting the node
    Validate {
        /// Configuration file to validate
        config: PathBuf,
    },
}

/// Parse CLI arguments
///
/// This is the entry point for CLI parsing. It uses clap to parse
/// arguments and returns the parsed CLI structure.
///
/// # Returns
///
/// Parsed `Cli` structure with all arguments
///
/// # Panics
///
/// Clap will exit the process with appropriate error message if parsing fails
pub fn parse_cli() -> Cli {
    Cli::parse()
}
