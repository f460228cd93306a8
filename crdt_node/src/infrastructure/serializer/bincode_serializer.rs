// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! `bincode`-based fulfilment of `EntrySerializer`, used by both the chunk
//! store (entry bodies, key bytes for chunk headers and rendezvous hashing)
//! and the wire protocol's bulk-data stream.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

use crdt_storage_domain::entities::{CrdtState, Entry, Key};
use crdt_storage_domain::error::StorageError;
use crdt_storage_domain::services::EntrySerializer;

/// Encodes `Entry<K, S>` with `bincode`'s default configuration.
///
/// `bincode` gives a compact, allocation-free-on-decode encoding at the cost
/// of forward compatibility across field reordering.
pub struct BincodeEntrySerializer<K, S> {
    _marker: PhantomData<(K, S)>,
}

impl<K, S> BincodeEntrySerializer<K, S> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<K, S> Default for BincodeEntrySerializer<K, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, S> EntrySerializer<K, S> for BincodeEntrySerializer<K, S>
where
    K: Key + Serialize + DeserializeOwned,
    S: CrdtState + Serialize + DeserializeOwned,
{
    fn encode(&self, entry: &Entry<K, S>) -> Result<Vec<u8>, StorageError> {
        bincode::serialize(entry).map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Entry<K, S>, StorageError> {
        bincode::deserialize(bytes).map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    fn encode_key(&self, key: &K) -> Result<Vec<u8>, StorageError> {
        bincode::serialize(key).map_err(|e| StorageError::SerializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crdt_storage_domain::value_objects::Timestamp;

    #[test]
    fn round_trips_a_data_entry() {
        let ser: BincodeEntrySerializer<u64, i64> = BincodeEntrySerializer::new();
        let entry = Entry::data(7u64, Timestamp(3), 42i64);
        let bytes = ser.encode(&entry).unwrap();
        let decoded = ser.decode(&bytes).unwrap();
        assert_eq!(entry, decoded);
    }

    #[test]
    fn round_trips_a_tombstone() {
        let ser: BincodeEntrySerializer<u64, i64> = BincodeEntrySerializer::new();
        let entry: Entry<u64, i64> = Entry::tombstone(7u64, Timestamp(3));
        let bytes = ser.encode(&entry).unwrap();
        assert_eq!(ser.decode(&bytes).unwrap(), entry);
    }

    #[test]
    fn key_encoding_is_stable_for_equal_keys() {
        let ser: BincodeEntrySerializer<u64, i64> = BincodeEntrySerializer::new();
        assert_eq!(ser.encode_key(&5u64).unwrap(), ser.encode_key(&5u64).unwrap());
    }
}
