// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Shared entry-merging logic used by the chunk store's `download`/
//! `consolidate`, the WAL drainer, and the cluster storage read reducer:
//! every place the design calls for "a k-way merge with the CRDT merge for
//! equal keys".
//!
//! Kept as one module rather than four copies: the tombstone-dominance rule
//! is easy to get subtly wrong, and every caller needs exactly the same
//! answer for it.

use crdt_storage_domain::entities::{CrdtState, Entry, Key};
use crdt_storage_domain::services::CrdtMergeService;

/// Combines two entries known to share a key, applying the domain's
/// dominance rule: a tombstone removes data with an equal-or-lower
/// timestamp; data with a strictly higher timestamp survives a tombstone;
/// two tombstones keep the later timestamp; two data entries defer to the
/// injected CRDT merge.
pub fn merge_pair<K, S, M>(a: Entry<K, S>, b: Entry<K, S>, merge: &M) -> Entry<K, S>
where
    K: Key,
    S: CrdtState,
    M: CrdtMergeService<S> + ?Sized,
{
    debug_assert_eq!(a.key(), b.key());
    match (a, b) {
        (Entry::Tombstone { key, timestamp: t1 }, Entry::Tombstone { timestamp: t2, .. }) => {
            Entry::tombstone(key, t1.max(t2))
        }
        (Entry::Tombstone { key, timestamp: t_tomb }, Entry::Data { timestamp: t_data, state, .. })
        | (Entry::Data { key, timestamp: t_data, state }, Entry::Tombstone { timestamp: t_tomb, .. }) => {
            if t_data > t_tomb {
                Entry::data(key, t_data, state)
            } else {
                Entry::tombstone(key, t_tomb)
            }
        }
        (
            Entry::Data { key, timestamp: t1, state: s1 },
            Entry::Data { timestamp: t2, state: s2, .. },
        ) => {
            let (state, timestamp) = merge.merge(s1, t1, s2, t2);
            Entry::data(key, timestamp, state)
        }
    }
}

/// Merges several key-sorted, duplicate-free entry lists into one key-sorted,
/// duplicate-free list, applying [`merge_pair`] whenever the same key
/// appears in more than one input. Inputs need not all share an ordering for
/// entries of *different* keys across lists, only within each list.
///
/// This performs the merge eagerly in memory rather than lazily streaming,
/// trading a bounded-by-chunk-size memory footprint for a much simpler
/// implementation; each individual chunk file is itself bounded by the
/// consolidation strategy, which keeps this proportional to one chunk's
/// worth of entries rather than the whole store.
pub fn k_way_merge<K, S, M>(lists: Vec<Vec<Entry<K, S>>>, merge: &M) -> Vec<Entry<K, S>>
where
    K: Key,
    S: CrdtState,
    M: CrdtMergeService<S> + ?Sized,
{
    use std::collections::BTreeMap;

    let mut by_key: BTreeMap<K, Entry<K, S>> = BTreeMap::new();
    for list in lists {
        for entry in list {
            let key = entry.key().clone();
            match by_key.remove(&key) {
                Some(existing) => {
                    by_key.insert(key, merge_pair(existing, entry, merge));
                }
                None => {
                    by_key.insert(key, entry);
                }
            }
        }
    }
    by_key.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crdt_storage_domain::services::MaxWinsMergeService;
    use crdt_storage_domain::value_objects::Timestamp;

    #[test]
    fn tombstone_dominates_lower_or_equal_timestamp_data() {
        let svc = MaxWinsMergeService;
        let data = Entry::data(1u64, Timestamp(5), 10i64);
        let tomb: Entry<u64, i64> = Entry::tombstone(1u64, Timestamp(5));
        assert!(merge_pair(data, tomb, &svc).is_tombstone());
    }

    #[test]
    fn data_with_strictly_higher_timestamp_survives_tombstone() {
        let svc = MaxWinsMergeService;
        let tomb: Entry<u64, i64> = Entry::tombstone(1u64, Timestamp(5));
        let data = Entry::data(1u64, Timestamp(6), 10i64);
        let merged = merge_pair(tomb, data, &svc);
        assert!(!merged.is_tombstone());
        assert_eq!(merged.timestamp(), Timestamp(6));
    }

    #[test]
    fn two_data_entries_defer_to_crdt_merge() {
        let svc = MaxWinsMergeService;
        let a = Entry::data(1u64, Timestamp(1), 3i64);
        let b = Entry::data(1u64, Timestamp(2), 9i64);
        let merged = merge_pair(a, b, &svc);
        assert_eq!(merged.state(), Some(&9i64));
        assert_eq!(merged.timestamp(), Timestamp(2));
    }

    #[test]
    fn k_way_merge_collapses_duplicate_keys_across_lists() {
        let svc = MaxWinsMergeService;
        let list_a = vec![Entry::data(1u64, Timestamp(1), 1i64), Entry::data(3u64, Timestamp(1), 3i64)];
        let list_b = vec![Entry::data(1u64, Timestamp(2), 5i64), Entry::data(2u64, Timestamp(1), 2i64)];
        let merged = k_way_merge(vec![list_a, list_b], &svc);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].key(), &1u64);
        assert_eq!(merged[0].state(), Some(&5i64));
    }
}
