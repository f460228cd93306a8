// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Partition and partition-group entities.
//!
//! These are plain data, externally managed via discovery: the domain
//! only needs to describe the shape of a scheme, not compute rendezvous
//! rankings. That algorithm lives in the infrastructure layer
//! (`crdt_storage_node::infrastructure::partition`) since it is "how", not "what".

use crate::value_objects::PartitionId;
use serde::{Deserialize, Serialize};

/// A group of partitions sharing a replication policy.
///
/// Multiple groups may coexist to provide "partitioning over partitioning"
/// (e.g. regions x shards, per the glossary).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionGroup {
    pub partitions: Vec<PartitionId>,
    pub replication: u32,
    pub min_active: u32,
    pub active: bool,
}

impl PartitionGroup {
    pub fn new(partitions: Vec<PartitionId>, replication: u32, min_active: u32) -> Self {
        Self {
            partitions,
            replication,
            min_active,
            active: true,
        }
    }

    pub fn contains(&self, id: &PartitionId) -> bool {
        self.partitions.iter().any(|p| p == id)
    }
}

/// A full partition scheme: the set of groups a discovery tick delivers.
///
/// Replaced atomically on each discovery tick; in-flight operations
/// capture a snapshot (a cheap `Clone`, since the contents are just ids and
/// small integers) at start and complete against it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PartitionSchemeSnapshot {
    pub groups: Vec<PartitionGroup>,
    pub buckets: u32,
}

impl PartitionSchemeSnapshot {
    pub fn new(groups: Vec<PartitionGroup>, buckets: u32) -> Self {
        Self { groups, buckets }
    }

    /// All partition ids the scheme can route to, across every group.
    pub fn all_partition_ids(&self) -> Vec<PartitionId> {
        self.groups.iter().flat_map(|g| g.partitions.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_partition_ids_spans_every_group() {
        let scheme = PartitionSchemeSnapshot::new(
            vec![
                PartitionGroup::new(vec![PartitionId::new("a"), PartitionId::new("b")], 2, 1),
                PartitionGroup::new(vec![PartitionId::new("c")], 1, 1),
                ],
            256,
        );
        let ids: Vec<String> = scheme.all_partition_ids().into_iter().map(|p| p.0).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn group_contains_checks_membership() {
        let group = PartitionGroup::new(vec![PartitionId::new("a")], 1, 1);
        assert!(group.contains(&PartitionId::new("a")));
        assert!(!group.contains(&PartitionId::new("z")));
    }
}
