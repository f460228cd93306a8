// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! `ChunkLocker`: mutual exclusion between `take`, `consolidate`, and
//! `cleanup_irrelevant`, plus the alternating hot/cold consolidation
//! strategy selector.
//!
//! `ReaderRegistry` is the companion piece spec.md §4.1's Atomicity clause
//! requires: "step 3 must be deferred until open readers release". A
//! `download`/`take` holds a [`ReaderGuard`] over every chunk id in its
//! snapshot for the whole streaming read; a consolidation or cleanup pass
//! that wants to unlink one of those files instead defers the unlink until
//! the guard drops and the count reaches zero.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crdt_storage_domain::error::StorageError;
use crdt_storage_domain::value_objects::ChunkId;

/// Which set of chunks the next `consolidate()` call should target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockerStrategy {
    /// The few most-recently-written chunks: high overlap, small cost.
    Hot,
    /// The long tail of old chunks: large merged output, reclaims space.
    Cold,
}

/// Tracks in-flight chunk-level and store-level locks.
///
/// Three conditions are mutually exclusive at the store level: an
/// outstanding `take`, a running `consolidate`, and a running
/// `cleanup_irrelevant`. Within
/// a single `consolidate`, the specific chunk ids chosen are locked
/// individually so two consolidation passes targeting disjoint chunk
/// ranges could in principle run concurrently. This engine always runs
/// at most one at a time in practice (driven by a single background task
/// per node), but the per-chunk lock is kept because it is what observers
/// (e.g. a future concurrent consolidator) actually need to check.
pub struct ChunkLocker {
    locked_chunks: Mutex<HashSet<ChunkId>>,
    take_in_progress: AtomicBool,
    maintenance_in_progress: AtomicBool,
    next_strategy_is_hot: AtomicBool,
}

impl Default for ChunkLocker {
    fn default() -> Self {
        Self {
            locked_chunks: Mutex::new(HashSet::new()),
            take_in_progress: AtomicBool::new(false),
            maintenance_in_progress: AtomicBool::new(false),
            next_strategy_is_hot: AtomicBool::new(true),
        }
    }
}

impl ChunkLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the strategy for the next consolidation pass and flips the
    /// alternator for the one after it.
    pub fn next_strategy(&self) -> LockerStrategy {
        let is_hot = self.next_strategy_is_hot.fetch_xor(true, Ordering::SeqCst);
        if is_hot {
            LockerStrategy::Hot
        } else {
            LockerStrategy::Cold
        }
    }

    /// Locks `ids` for the duration of one consolidation, failing with
    /// `ChunksAlreadyLocked` if any are already locked by another pass, and
    /// reserving the store-level maintenance flag shared with
    /// `cleanup_irrelevant`.
    pub fn try_begin_consolidation(&self, ids: &[ChunkId]) -> Result<(), StorageError> {
        if self
        .maintenance_in_progress
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
        {
            return Err(StorageError::ChunksAlreadyLocked(
                    "a consolidation or cleanup is already in progress".into(),
                ));
        }
        let mut locked = self.locked_chunks.lock();
        if ids.iter().any(|id| locked.contains(id)) {
            drop(locked);
            self.maintenance_in_progress.store(false, Ordering::SeqCst);
            return Err(StorageError::ChunksAlreadyLocked("one or more selected chunks are already locked".into()));
        }
        locked.extend(ids.iter().copied());
        Ok(())
    }

    pub fn end_consolidation(&self, ids: &[ChunkId]) {
        let mut locked = self.locked_chunks.lock();
        for id in ids {
            locked.remove(id);
        }
        drop(locked);
        self.maintenance_in_progress.store(false, Ordering::SeqCst);
    }

    /// Reserves the store-level maintenance flag for a `cleanup_irrelevant`
    /// pass, mutually exclusive with consolidation.
    pub fn try_begin_cleanup(&self) -> Result<(), StorageError> {
        self.maintenance_in_progress
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .map(|_| ())
        .map_err(|_| StorageError::ChunksAlreadyLocked("a consolidation or cleanup is already in progress".into()))
    }

    pub fn end_cleanup(&self) {
        self.maintenance_in_progress.store(false, Ordering::SeqCst);
    }

    /// Marks a `take` as outstanding, failing if one already is.
    pub fn try_begin_take(&self) -> Result<(), StorageError> {
        self.take_in_progress
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .map(|_| ())
        .map_err(|_| StorageError::ChunksAlreadyLocked("a take is already outstanding".into()))
    }

    pub fn end_take(&self) {
        self.take_in_progress.store(false, Ordering::SeqCst);
    }

    pub fn has_outstanding_take(&self) -> bool {
        self.take_in_progress.load(Ordering::SeqCst)
    }
}

/// Tracks how many in-flight reads (`download`/`take`) currently hold each
/// chunk file open, and defers any unlink a consolidation or cleanup pass
/// wants to perform on a chunk that still has readers until they release it.
#[derive(Default)]
pub struct ReaderRegistry {
    open_counts: Mutex<HashMap<ChunkId, usize>>,
    deferred_deletes: Mutex<HashMap<ChunkId, PathBuf>>,
}

impl ReaderRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks `ids` as having one more open reader each, for the duration of
    /// the returned guard.
    pub fn acquire(self: &Arc<Self>, ids: Vec<ChunkId>) -> ReaderGuard {
        let mut counts = self.open_counts.lock();
        for id in &ids {
            *counts.entry(*id).or_insert(0) += 1;
        }
        ReaderGuard { registry: self.clone(), ids }
    }

    /// Requests that `path` (naming chunk `id`) be unlinked. If no reader
    /// currently holds `id` open, the path is returned for the caller to
    /// delete immediately; otherwise the delete is recorded and performed
    /// automatically once the last reader's guard drops.
    pub fn delete_when_unreferenced(&self, id: ChunkId, path: PathBuf) -> Option<PathBuf> {
        let counts = self.open_counts.lock();
        if counts.get(&id).copied().unwrap_or(0) == 0 {
            Some(path)
        } else {
            self.deferred_deletes.lock().insert(id, path);
            None
        }
    }
}

/// RAII handle on a set of chunk ids being read. Dropping it releases every
/// id and, for any that reached zero readers and have a deferred delete
/// pending, spawns the actual unlink.
pub struct ReaderGuard {
    registry: Arc<ReaderRegistry>,
    ids: Vec<ChunkId>,
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        let mut counts = self.registry.open_counts.lock();
        let mut freed = Vec::new();
        for id in &self.ids {
            if let Some(count) = counts.get_mut(id) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(id);
                    freed.push(*id);
                }
            }
        }
        drop(counts);
        if freed.is_empty() {
            return;
        }
        let mut deferred = self.registry.deferred_deletes.lock();
        let paths: Vec<PathBuf> = freed.into_iter().filter_map(|id| deferred.remove(&id)).collect();
        drop(deferred);
        if paths.is_empty() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                for path in paths {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        tracing::warn!(path = %path.display(), error = %e, "deferred chunk delete failed");
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_alternates_starting_hot() {
        let locker = ChunkLocker::new();
        assert_eq!(locker.next_strategy(), LockerStrategy::Hot);
        assert_eq!(locker.next_strategy(), LockerStrategy::Cold);
        assert_eq!(locker.next_strategy(), LockerStrategy::Hot);
    }

    #[test]
    fn overlapping_consolidation_is_rejected() {
        let locker = ChunkLocker::new();
        let ids = [ChunkId(1), ChunkId(2)];
        locker.try_begin_consolidation(&ids).unwrap();
        let err = locker.try_begin_consolidation(&[ChunkId(2)]).unwrap_err();
        assert!(err.is_benign_contention());
        locker.end_consolidation(&ids);
        locker.try_begin_consolidation(&[ChunkId(2)]).unwrap();
    }

    #[test]
    fn consolidation_and_cleanup_are_mutually_exclusive() {
        let locker = ChunkLocker::new();
        locker.try_begin_cleanup().unwrap();
        assert!(locker.try_begin_consolidation(&[ChunkId(1)]).is_err());
        locker.end_cleanup();
        locker.try_begin_consolidation(&[ChunkId(1)]).unwrap();
    }

    #[test]
    fn only_one_take_at_a_time() {
        let locker = ChunkLocker::new();
        locker.try_begin_take().unwrap();
        assert!(locker.try_begin_take().is_err());
        locker.end_take();
        locker.try_begin_take().unwrap();
    }

    #[test]
    fn delete_is_immediate_when_no_reader_holds_the_chunk() {
        let registry = ReaderRegistry::new();
        let path = registry.delete_when_unreferenced(ChunkId(1), PathBuf::from("1.chunk"));
        assert_eq!(path, Some(PathBuf::from("1.chunk")));
    }

    #[test]
    fn delete_is_deferred_while_a_reader_guard_is_outstanding() {
        let registry = ReaderRegistry::new();
        let guard = registry.acquire(vec![ChunkId(1)]);
        let path = registry.delete_when_unreferenced(ChunkId(1), PathBuf::from("1.chunk"));
        assert_eq!(path, None, "a live reader must block the immediate-delete path");
        drop(guard);
    }
}
