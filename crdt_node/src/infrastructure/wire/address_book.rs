// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Partition-Id-To-Address Resolution
//!
//! The partition scheme routes by opaque `PartitionId`; the cluster storage
//! layer needs a network address to actually dial a replica. This trait is
//! the seam between the two: `DirectAddressBook` treats a partition id as
//! its own `host:port` (the simplest deployment, and the one this engine
//! ships by default); `StaticAddressBook` supports a fixed id-to-address
//! table for deployments where ids are stable but addresses are not.
//!
//! This resolves the source's open question about whether a storage
//! connection should reset when a partition's address changes but its id
//! doesn't: since `ClusterStorage` keys its connection cache by
//! `PartitionId` alone and re-resolves an address only when *establishing* a
//! new connection (not on every call), an address change behind a stable id
//! is invisible until the existing connection breaks on its own. See
//! DESIGN.md for the recorded decision.

use std::collections::HashMap;
use std::net::SocketAddr;

use crdt_storage_domain::value_objects::PartitionId;

pub trait PartitionAddressBook: Send + Sync {
    fn resolve(&self, id: &PartitionId) -> Option<SocketAddr>;
}

/// Parses the partition id itself as a `host:port` address.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectAddressBook;

impl PartitionAddressBook for DirectAddressBook {
    fn resolve(&self, id: &PartitionId) -> Option<SocketAddr> {
        id.as_str().parse().ok()
    }
}

/// A fixed id-to-address table, for deployments where partition ids are
/// logical names distinct from their current network location.
#[derive(Debug, Default, Clone)]
pub struct StaticAddressBook {
    table: HashMap<PartitionId, SocketAddr>,
}

impl StaticAddressBook {
    pub fn new(table: HashMap<PartitionId, SocketAddr>) -> Self {
        Self { table }
    }
}

impl PartitionAddressBook for StaticAddressBook {
    fn resolve(&self, id: &PartitionId) -> Option<SocketAddr> {
        self.table.get(id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_address_book_parses_the_id_as_a_socket_addr() {
        let book = DirectAddressBook;
        let id = PartitionId::new("127.0.0.1:7878");
        assert_eq!(book.resolve(&id), Some("127.0.0.1:7878".parse().unwrap()));
    }

    #[test]
    fn direct_address_book_rejects_a_non_address_id() {
        let book = DirectAddressBook;
        assert_eq!(book.resolve(&PartitionId::new("shard-a")), None);
    }

    #[test]
    fn static_address_book_resolves_from_its_table() {
        let mut table = HashMap::new();
        table.insert(PartitionId::new("shard-a"), "10.0.0.1:7878".parse().unwrap());
        let book = StaticAddressBook::new(table);
        assert_eq!(book.resolve(&PartitionId::new("shard-a")), Some("10.0.0.1:7878".parse().unwrap()));
        assert_eq!(book.resolve(&PartitionId::new("shard-b")), None);
    }
}
