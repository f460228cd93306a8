// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Logical timestamp value object.
//!
//! A `Timestamp` is the `u64` watermark every `Data`/`Tombstone` entry carries.
//! It has no relation to wall-clock time beyond being monotonic per key across
//! merges: callers that want wall-clock semantics encode
//! that into the timestamp themselves (e.g. millis-since-epoch).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A monotonic logical timestamp attached to every CRDT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The watermark that matches every entry (`download(0)`).
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn new(value: u64) -> Self {
        Timestamp(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Returns the later of the two timestamps, used when combining entries
    /// for the same key: `merge(s1, max t1, s2, max t2)`.
    pub fn max(self, other: Timestamp) -> Timestamp {
        Timestamp(self.0.max(other.0))
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Timestamp(value)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_the_since_watermark_that_matches_everything() {
        assert_eq!(Timestamp::ZERO.get(), 0);
    }

    #[test]
    fn max_picks_the_later_timestamp() {
        assert_eq!(Timestamp(5).max(Timestamp(10)), Timestamp(10));
        assert_eq!(Timestamp(10).max(Timestamp(5)), Timestamp(10));
    }

    #[test]
    fn ordering_is_numeric() {
        let mut ts = vec![Timestamp(5), Timestamp(1), Timestamp(3)];
        ts.sort();
        assert_eq!(ts, vec![Timestamp(1), Timestamp(3), Timestamp(5)]);
    }
}
