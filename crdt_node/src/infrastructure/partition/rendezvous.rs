// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Rendezvous Hashing Partition Scheme
//!
//! Fulfils `crdt_storage_domain::repositories::PartitionScheme`:
//! `B` fixed hash buckets, each bucket ranking every partition in a group by
//! `g(partitionId, bucket)` and keeping the top `replication` entries. A key
//! is mapped to one bucket via `h(key) mod B`, so every node computes the
//! same ranking for the same key without coordination.
//!
//! A partition not present in the snapshot's group is, by construction, not
//! ranked. Membership (who is "alive") is entirely Discovery's concern;
//! this scheme only ever sees the partitions Discovery currently lists.
//!
//! Hashing uses `xxhash-rust`'s `xxh3_64`, the fast non-cryptographic hash
//! already in this lineage's dependency stack for chunk/WAL checksums'
//! sibling concern (content addressing), reseeded per call site so `h` and
//! `g` don't correlate.

use xxhash_rust::xxh3::xxh3_64_with_seed;

use crdt_storage_domain::entities::PartitionSchemeSnapshot;
use crdt_storage_domain::repositories::{PartitionScheme, Route};
use crdt_storage_domain::value_objects::PartitionId;

const KEY_SEED: u64 = 0;
const BUCKET_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// `h(key) -> u32`: maps arbitrary key bytes onto a bucket index.
fn h(key_bytes: &[u8], buckets: u32) -> u32 {
    if buckets == 0 {
        return 0;
    }
    (xxh3_64_with_seed(key_bytes, KEY_SEED) % buckets as u64) as u32
}

/// `g(partitionId, bucket) -> u64`: a pseudo-random score ranking a
/// partition's claim on a bucket.
fn g(partition_id: &PartitionId, bucket: u32) -> u64 {
    let mut buf = Vec::with_capacity(partition_id.as_str().len() + 4);
    buf.extend_from_slice(partition_id.as_str().as_bytes());
    buf.extend_from_slice(&bucket.to_le_bytes());
    xxh3_64_with_seed(&buf, BUCKET_SEED)
}

/// Stateless rendezvous-hashing router: `B` buckets, `g`-ranked partitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct RendezvousPartitionScheme;

impl RendezvousPartitionScheme {
    pub fn new() -> Self {
        Self
    }
}

impl PartitionScheme for RendezvousPartitionScheme {
    fn route(&self, snapshot: &PartitionSchemeSnapshot, key_bytes: &[u8]) -> Route {
        let bucket = h(key_bytes, snapshot.buckets);
        let mut ranked = Vec::new();
        for group in &snapshot.groups {
            if !group.active {
                continue;
            }
            let mut scored: Vec<(u64, &PartitionId)> =
            group.partitions.iter().map(|pid| (g(pid, bucket), pid)).collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
            let take = (group.replication as usize).min(scored.len());
            ranked.extend(scored.into_iter().take(take).map(|(_, pid)| pid.clone()));
        }
        Route { ranked }
    }

    fn min_active_for(&self, snapshot: &PartitionSchemeSnapshot, _key_bytes: &[u8]) -> usize {
        snapshot.groups.iter().filter(|g| g.active).map(|g| g.min_active as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crdt_storage_domain::entities::PartitionGroup;
    use proptest::prelude::*;

    fn snapshot(partitions: &[&str], replication: u32, min_active: u32, buckets: u32) -> PartitionSchemeSnapshot {
        let group = PartitionGroup::new(partitions.iter().map(|s| PartitionId::new(*s)).collect(), replication, min_active);
        PartitionSchemeSnapshot::new(vec![group], buckets)
    }

    #[test]
    fn route_is_deterministic_for_the_same_snapshot_and_key() {
        let scheme = RendezvousPartitionScheme::new();
        let snap = snapshot(&["p0", "p1", "p2", "p3"], 2, 1, 64);
        let a = scheme.route(&snap, b"key-123");
        let b = scheme.route(&snap, b"key-123");
        assert_eq!(a, b);
    }

    #[test]
    fn route_never_exceeds_group_replication() {
        let scheme = RendezvousPartitionScheme::new();
        let snap = snapshot(&["p0", "p1", "p2"], 2, 1, 16);
        for i in 0..200 {
            let key = format!("key-{i}");
            let route = scheme.route(&snap, key.as_bytes());
            assert!(route.ranked.len() <= 2);
        }
    }

    #[test]
    fn route_skips_inactive_groups() {
        let scheme = RendezvousPartitionScheme::new();
        let mut snap = snapshot(&["p0", "p1"], 2, 1, 16);
        snap.groups[0].active = false;
        let route = scheme.route(&snap, b"anything");
        assert!(route.ranked.is_empty());
    }

    #[test]
    fn min_active_for_sums_active_groups_thresholds() {
        let scheme = RendezvousPartitionScheme::new();
        let g1 = PartitionGroup::new(vec![PartitionId::new("a")], 1, 1);
        let mut g2 = PartitionGroup::new(vec![PartitionId::new("b")], 1, 2);
        g2.active = false;
        let snap = PartitionSchemeSnapshot::new(vec![g1, g2], 16);
        assert_eq!(scheme.min_active_for(&snap, b"k"), 1);
    }

    proptest! {
        /// Removing one partition from an N-partition group should only
        /// reshuffle a bounded fraction of keys' top ranking, not all of
        /// them: the whole point of rendezvous over modulo hashing.
        #[test]
        fn removing_one_partition_reshuffles_a_bounded_fraction_of_keys(seed in 0u64..10_000) {
            let scheme = RendezvousPartitionScheme::new();
            let partitions: Vec<String> = (0..10).map(|i| format!("p{i}")).collect();
            let refs: Vec<&str> = partitions.iter().map(|s| s.as_str()).collect();
            let full = snapshot(&refs, 1, 1, 64);

            let reduced_refs: Vec<&str> = refs[..9].to_vec();
            let reduced = snapshot(&reduced_refs, 1, 1, 64);

            let sample_size = 500;
            let mut reassigned = 0;
            for i in 0..sample_size {
                let key = format!("probe-{}-{}", seed, i);
                let before = scheme.route(&full, key.as_bytes());
                let after = scheme.route(&reduced, key.as_bytes());
                if before.ranked != after.ranked {
                    reassigned += 1;
                }
            }
            let fraction = reassigned as f64 / sample_size as f64;
            // Expect roughly 1/10 reassigned; allow generous slack for a
            // single-bucket-table sample rather than asserting the exact
            // theoretical value.
            prop_assert!(fraction < 0.35, "reassigned fraction {fraction} too high for a single node removal");
        }
    }
}
