// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # The CRDT Merge Contract
//!
//! This module defines `CrdtMergeService`, the externally supplied function
//! every other component in this engine builds on.
//! The domain does not know or care what the state `S` represents, only
//! that `merge` is associative, commutative, and idempotent, and that
//! `extract` can produce a delta since a watermark for `download(since)`.
//!
//! ## Implementation Requirements
//!
//! Implementations must uphold, for any `s1`, `s2`, `s3`:
//!
//! - **Associativity**: `merge(merge(s1, s2), s3) == merge(s1, merge(s2, s3))`
//! - **Commutativity**: `merge(s1, s2) == merge(s2, s1)`
//! - **Idempotence**: `merge(s1, s1) == s1`
//!
//! Tombstones are handled one level up, in `Entry`/the chunk store's k-way
//! merge: "tombstones dominate data with lower timestamp; data with
//! higher timestamp dominate tombstones" is a rule about *entries*, not
//! about the opaque state `S`, so it is not part of this trait.
//!
//! ## Architecture Note
//!
//! This trait is deliberately synchronous: merging is CPU-bound, not
//! I/O-bound, and belongs in the domain layer as "what", leaving "how
//! it's scheduled" (on the reactor thread vs a worker) to infrastructure.

use crate::entities::CrdtState;
use crate::value_objects::Timestamp;

/// The CRDT function a deployment supplies to give meaning to the otherwise
/// opaque state `S` stored alongside every key.
pub trait CrdtMergeService<S: CrdtState>: Send + Sync {
    /// Associatively, commutatively, idempotently combines two states
    /// observed at the given timestamps, returning the merged state and its
    /// timestamp, `max(t1, t2)`, per the cluster reducer's rule for combining
    /// replicas' responses for the same key.
    fn merge(&self, s1: S, t1: Timestamp, s2: S, t2: Timestamp) -> (S, Timestamp);

    /// Returns the delta of `s` since `since_timestamp`, or `None` if nothing
    /// changed since that watermark. Used by `download`/`take` with a `since`
    /// token.
    fn extract(&self, s: &S, since_timestamp: Timestamp) -> Option<S>;
}

/// A last-writer-wins register: the state with the higher timestamp always
/// wins outright, and only a timestamp tie falls back to `S::max` as a
/// deterministic tiebreak (so the result is still well-defined when two
/// replicas legitimately wrote at the same timestamp).
///
/// This is the simplest real CRDT this engine ships, useful for tests and as
/// a default when a deployment has nothing more specific. `extract` always
/// returns the full state: an LWW register has no natural notion of "delta
/// since a watermark" beyond the entry's own timestamp, which the chunk
/// store already filters on.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxWinsMergeService;

impl<S: CrdtState + Ord> CrdtMergeService<S> for MaxWinsMergeService {
    fn merge(&self, s1: S, t1: Timestamp, s2: S, t2: Timestamp) -> (S, Timestamp) {
        match t1.cmp(&t2) {
            std::cmp::Ordering::Greater => (s1, t1),
            std::cmp::Ordering::Less => (s2, t2),
            std::cmp::Ordering::Equal => (s1.max(s2), t1),
        }
    }

    fn extract(&self, s: &S, _since_timestamp: Timestamp) -> Option<S> {
        Some(s.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_wins_merge_is_commutative() {
        let svc = MaxWinsMergeService;
        let (a, ta) = svc.merge(3, Timestamp(1), 7, Timestamp(2));
        let (b, tb) = svc.merge(7, Timestamp(2), 3, Timestamp(1));
        assert_eq!((a, ta), (b, tb));
    }

    #[test]
    fn max_wins_merge_is_idempotent() {
        let svc = MaxWinsMergeService;
        let (a, ta) = svc.merge(5, Timestamp(9), 5, Timestamp(9));
        assert_eq!((a, ta), (5, Timestamp(9)));
    }

    #[test]
    fn max_wins_merge_is_associative() {
        let svc = MaxWinsMergeService;
        let (ab, tab) = svc.merge(1, Timestamp(1), 2, Timestamp(2));
        let (ab_c, t_abc) = svc.merge(ab, tab, 3, Timestamp(3));

        let (bc, tbc) = svc.merge(2, Timestamp(2), 3, Timestamp(3));
        let (a_bc, t_a_bc) = svc.merge(1, Timestamp(1), bc, tbc);

        assert_eq!((ab_c, t_abc), (a_bc, t_a_bc));
    }

    #[test]
    fn extract_returns_full_state_for_max_wins() {
        let svc = MaxWinsMergeService;
        assert_eq!(svc.extract(&42, Timestamp(100)), Some(42));
    }

    proptest::proptest! {
        #[test]
        fn max_wins_merge_laws_hold_for_arbitrary_ints(
            a in proptest::prelude::any::<i64>(),
            b in proptest::prelude::any::<i64>(),
            c in proptest::prelude::any::<i64>(),
            ta in 0u64..1000,
            tb in 0u64..1000,
            tc in 0u64..1000,
        ) {
            let svc = MaxWinsMergeService;
            let (ta, tb, tc) = (Timestamp(ta), Timestamp(tb), Timestamp(tc));

            // commutative
            let (m1, _) = svc.merge(a, ta, b, tb);
            let (m2, _) = svc.merge(b, tb, a, ta);
            proptest::prop_assert_eq!(m1, m2);

            // idempotent
            let (m3, t3) = svc.merge(a, ta, a, ta);
            proptest::prop_assert_eq!((m3, t3), (a, ta));

            // associative
            let (ab, tab) = svc.merge(a, ta, b, tb);
            let (ab_c, t_abc) = svc.merge(ab, tab, c, tc);
            let (bc, tbc) = svc.merge(b, tb, c, tc);
            let (a_bc, t_a_bc) = svc.merge(a, ta, bc, tbc);
            proptest::prop_assert_eq!((ab_c, t_abc), (a_bc, t_a_bc));
        }
    }
}
