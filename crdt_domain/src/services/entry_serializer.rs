// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Entry Serializer Contract
//!
//! Given `(Kcodec, Scodec)`, produces a fixed, forward-compatible binary
//! encoding of `Data`/`Tombstone` entries. The domain states the
//! contract; the infrastructure layer's `bincode`-based implementation
//! (`crdt_storage_node::infrastructure::serializer`) fulfils it the way the wire
//! protocol and chunk files both need. This trait states the contract
//! only; it carries no encoding logic of its own.

use crate::entities::{CrdtState, Entry, Key};
use crate::error::StorageError;

/// Encodes and decodes `Entry<K, S>` values to/from a stable binary form.
///
/// Implementations must be forward-compatible across minor versions:
/// old readers must be able to skip fields they don't recognize rather than
/// fail outright, though this engine does not yet define an extension
/// mechanism beyond that requirement.
pub trait EntrySerializer<K: Key, S: CrdtState>: Send + Sync {
    /// Encodes one entry to its wire/file form.
    fn encode(&self, entry: &Entry<K, S>) -> Result<Vec<u8>, StorageError>;

    /// Decodes one entry from its wire/file form.
    fn decode(&self, bytes: &[u8]) -> Result<Entry<K, S>, StorageError>;

    /// Encodes just a key, used for chunk header `minKey`/`maxKey` fields and
    /// for the rendezvous hash function's key bytes.
    fn encode_key(&self, key: &K) -> Result<Vec<u8>, StorageError>;
}
