// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Control message taxonomy. Encoded with `bincode`; bulk entry
//! data travels as a separate length-prefixed stream (see
//! [`super::framing`]), never inline in these messages.

use serde::{Deserialize, Serialize};

use crdt_storage_domain::value_objects::PartitionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

/// The version this build speaks.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };
/// The oldest version this build still accepts a handshake from.
pub const MINIMUM_SUPPORTED_VERSION: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

/// A point-in-time summary of a node's WAL and chunk store, returned for
/// `Request::Status`. Deliberately a wire-only type rather than a domain
/// entity: it exists to answer "is this node healthy and how full is it",
/// not to describe storage semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatusReport {
    pub chunk_count: usize,
    pub wal_segment_count: usize,
    pub finalized_wal_segment_count: usize,
}

/// Outcome of a `Request::ConsolidateNow` pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidateReport {
    pub consolidated: bool,
    pub chunks_removed: usize,
}

/// Outcome of a `Request::CleanupNow` pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub chunks_removed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Handshake { version: ProtocolVersion },
    Upload,
    Download { since: u64 },
    Take,
    TakeAck,
    Remove,
    Ping,
    /// Operator-surface admin requests. See `cli::parser`'s doc comment on
    /// `node_addr`: these speak to an already-running node rather than
    /// starting a new one.
    Status,
    ConsolidateNow,
    CleanupNow,
    Repartition { source: PartitionId },
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    HandshakeOk,
    HandshakeFailure { minimum_version: ProtocolVersion, message: String },
    UploadAck,
    DownloadStarted,
    TakeStarted,
    RemoveAck,
    Pong,
    StatusReport(NodeStatusReport),
    ConsolidateDone(ConsolidateReport),
    CleanupDone(CleanupReport),
    RepartitionAck,
    StopAck,
    ServerError { message: String },
}

pub fn encode_request(req: &Request) -> Result<Vec<u8>, crdt_storage_domain::error::StorageError> {
    bincode::serialize(req).map_err(|e| crdt_storage_domain::error::StorageError::SerializationError(e.to_string()))
}

pub fn decode_request(bytes: &[u8]) -> Result<Request, crdt_storage_domain::error::StorageError> {
    bincode::deserialize(bytes).map_err(|e| crdt_storage_domain::error::StorageError::SerializationError(e.to_string()))
}

pub fn encode_response(resp: &Response) -> Result<Vec<u8>, crdt_storage_domain::error::StorageError> {
    bincode::serialize(resp).map_err(|e| crdt_storage_domain::error::StorageError::SerializationError(e.to_string()))
}

pub fn decode_response(bytes: &[u8]) -> Result<Response, crdt_storage_domain::error::StorageError> {
    bincode::deserialize(bytes).map_err(|e| crdt_storage_domain::error::StorageError::SerializationError(e.to_string()))
}

/// Whether `candidate` can talk to a peer speaking `ours`: same major
/// version, any minor.
pub fn versions_compatible(ours: ProtocolVersion, candidate: ProtocolVersion) -> bool {
    ours.major == candidate.major
}
