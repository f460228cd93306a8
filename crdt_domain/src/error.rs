// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! A single hierarchical error type for the CRDT storage domain, following the
//! same shape as the rest of this lineage's error handling: `thiserror` for
//! zero-cost, cloneable, categorized errors; conversions from the standard
//! library at the edges; a `category()`/`is_recoverable()` pair so
//! infrastructure code (retries, metrics, logging) can reason about an error
//! without matching on every variant.
//!
//! ## Error Categories
//!
//! - **Protocol**: malformed frames, handshake mismatches, keys presented out
//!   of ascending order to `upload`/`remove`.
//! - **Cluster**: not enough live replicas to satisfy a partition group's
//!   read/write threshold.
//! - **Concurrency**: benign contention signals (`ChunksAlreadyLocked`) that
//!   callers back off from rather than treat as failures.
//! - **Storage**: chunk/WAL I/O, offset/size contract violations, not-found.
//! - **System**: configuration, internal invariants.

use thiserror::Error;

/// Domain-specific errors for the CRDT storage engine.
///
/// Mirrors the error kinds enumerated in the system's error-handling design:
/// `ProtocolError`, `IoError`, `IncompleteCluster`, `ChunksAlreadyLocked`,
/// `IllegalOffset`/`SizeMismatch`, and `NotFound`, plus the configuration and
/// internal-invariant kinds every complete crate in this lineage carries.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("io error: {0}")]
    IoError(String),

    #[error("incomplete cluster: {0}")]
    IncompleteCluster(String),

    #[error("chunks already locked: {0}")]
    ChunksAlreadyLocked(String),

    #[error("illegal offset: {0}")]
    IllegalOffset(String),

    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl StorageError {
    /// Creates a protocol error from any displayable message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Creates an incomplete-cluster error.
    pub fn incomplete_cluster(msg: impl Into<String>) -> Self {
        Self::IncompleteCluster(msg.into())
    }

    /// Creates a not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether the error represents a transient condition safe to retry.
    ///
    /// `ChunksAlreadyLocked` is deliberately excluded: it is benign but callers
    /// back off rather than "retry" in the sense the other variants mean.
    /// The consolidator checks `is_recoverable` to decide whether to log at
    /// warning level (unexpected I/O) or debug level (lock contention).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StorageError::IoError(_) | StorageError::IncompleteCluster(_))
    }

    /// Whether the error is a benign concurrency signal rather than a failure.
    pub fn is_benign_contention(&self) -> bool {
        matches!(self, StorageError::ChunksAlreadyLocked(_))
    }

    /// Gets the error category for metrics/logging.
    pub fn category(&self) -> &'static str {
        match self {
            StorageError::ProtocolError(_) => "protocol",
            StorageError::IoError(_) => "io",
            StorageError::IncompleteCluster(_) => "cluster",
            StorageError::ChunksAlreadyLocked(_) => "concurrency",
            StorageError::IllegalOffset(_) => "contract",
            StorageError::SizeMismatch(_) => "contract",
            StorageError::NotFound(_) => "not_found",
            StorageError::InvalidConfiguration(_) => "configuration",
            StorageError::SerializationError(_) => "serialization",
            StorageError::InternalError(_) => "internal",
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(err.to_string())
        } else {
            StorageError::IoError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}
