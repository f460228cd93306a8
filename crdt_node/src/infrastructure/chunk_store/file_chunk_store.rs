// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Filesystem Chunk Store
//!
//! This module is part of the Infrastructure layer, providing the concrete
//! implementation of `ChunkStore` backed by a directory of immutable,
//! content-addressed files.
//!
//! ## Layout
//!
//! One directory holds every chunk for one store: `<id:020>.chunk` files,
//! each a header (`count`, `minKey`, `maxKey`) followed by length-prefixed
//! entry records, the whole body optionally zstd-framed. A committed chunk
//! is written to a `.chunk.tmp-<id>` sibling first, fsynced, then renamed
//! into place. A crash between those steps leaves only an orphan temp file,
//! never a half-written `.chunk`.
//!
//! ## Consolidation
//!
//! `consolidate()` alternates between the hot and cold selection strategies
//! via [`ChunkLocker::next_strategy`]; both strategies pick from chunks not
//! already locked by an overlapping pass and require at least two
//! candidates to make progress.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crdt_storage_domain::entities::{ChunkMetadata, CrdtState, Entry, Key};
use crdt_storage_domain::error::StorageError;
use crdt_storage_domain::repositories::{ChunkStore, ConsolidationDiff, EntryStream};
use crdt_storage_domain::services::{CrdtMergeService, EntrySerializer};
use crdt_storage_domain::value_objects::{AtomicChunkIdSource, ChunkId, Timestamp};

use super::header::{read_records, write_record, ChunkHeader};
use super::locker::{ChunkLocker, LockerStrategy, ReaderRegistry};
use crate::infrastructure::entry_reduce::k_way_merge;

const CHUNK_EXTENSION: &str = "chunk";
/// How many of the most recently written chunks the hot strategy considers.
const HOT_WINDOW: usize = 4;

/// A `ChunkStore` backed by a directory of immutable files on the local
/// filesystem.
pub struct FileChunkStore<K, S, Ser, M> {
    dir: PathBuf,
    serializer: Arc<Ser>,
    merge: Arc<M>,
    compression: bool,
    id_source: AtomicChunkIdSource,
    chunks: Arc<RwLock<Vec<ChunkMetadata>>>,
    locker: Arc<ChunkLocker>,
    /// Reference-counts chunk files currently being streamed out by a
    /// `download`/`take`, so `consolidate`/`cleanup_irrelevant` never unlink
    /// a file a concurrent reader is still awaiting bytes from (spec.md
    /// §4.1 Atomicity / §5 Shared resources).
    readers: Arc<ReaderRegistry>,
    /// Chunk ids present at the start of the outstanding `take`, if any.
    /// Only these are deleted on `commit_take`, so an `upload` racing with
    /// an in-flight take never loses data it never promised to hand over.
    take_snapshot: RwLock<Option<Vec<ChunkId>>>,
    _marker: PhantomData<(K, S)>,
}

impl<K, S, Ser, M> FileChunkStore<K, S, Ser, M>
where
    K: Key,
    S: CrdtState,
    Ser: EntrySerializer<K, S> + Send + Sync + 'static,
    M: CrdtMergeService<S> + Send + Sync + 'static,
{
    /// Opens (creating if absent) a chunk store rooted at `dir`, scanning
    /// existing chunk files to rebuild the in-memory chunk set and resume
    /// the id source after the highest id found on disk. Orphaned temp
    /// files from an interrupted commit are removed.
    pub async fn open(dir: impl Into<PathBuf>, serializer: Ser, merge: M, compression: bool) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut chunks = Vec::new();
        let mut highest: Option<ChunkId> = None;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            if file_name.contains(".tmp-") {
                tracing::warn!(path = %path.display(), "removing orphaned chunk temp file from an interrupted commit");
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }

            if path.extension().and_then(|e| e.to_str()) != Some(CHUNK_EXTENSION) {
                continue;
            }

            let id = match path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<u64>().ok()) {
                Some(id) => ChunkId(id),
                None => continue,
            };

            let bytes = tokio::fs::read(&path).await?;
            let byte_len = bytes.len() as u64;
            let decoded = decompress_if_needed(bytes, compression)?;
            let (header, _) = ChunkHeader::decode(&decoded)?;

            highest = Some(highest.map_or(id, |h| h.max(id)));
            chunks.push(ChunkMetadata::new(id, header.count, header.min_key, header.max_key, byte_len));
        }

        chunks.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(Self {
                dir,
                serializer: Arc::new(serializer),
                merge: Arc::new(merge),
                compression,
                id_source: AtomicChunkIdSource::starting_after(highest),
                chunks: Arc::new(RwLock::new(chunks)),
                locker: Arc::new(ChunkLocker::new()),
                readers: ReaderRegistry::new(),
                take_snapshot: RwLock::new(None),
                _marker: PhantomData,
            })
    }

    fn chunk_path(&self, id: ChunkId) -> PathBuf {
        self.dir.join(format!("{}.{}", id.file_stem(), CHUNK_EXTENSION))
    }

    fn temp_path(&self, id: ChunkId) -> PathBuf {
        self.dir.join(format!("{}.{}.tmp-{}", id.file_stem(), CHUNK_EXTENSION, id.get()))
    }

    /// Reads every entry out of one committed chunk file.
    async fn read_chunk_entries(&self, id: ChunkId) -> Result<Vec<Entry<K, S>>, StorageError> {
        read_chunk_entries_at(&self.chunk_path(id), self.serializer.as_ref(), self.compression).await
    }

    /// Writes `entries` (already sorted and deduplicated by key) to a new
    /// chunk file named from a freshly minted id, committing it with
    /// temp-file-then-rename, and returns its metadata.
    async fn commit_chunk(&self, entries: &[Entry<K, S>]) -> Result<ChunkMetadata, StorageError> {
        let id = self.id_source.next_id();
        let min_key = self.serializer.encode_key(entries.first().expect("non-empty").key())?;
        let max_key = self.serializer.encode_key(entries.last().expect("non-empty").key())?;

        let header = ChunkHeader { count: entries.len() as u32, min_key: min_key.clone(), max_key: max_key.clone() };
        let mut body = header.encode();
        for entry in entries {
            let payload = self.serializer.encode(entry)?;
            write_record(&mut body, &payload);
        }
        let body = compress_if_needed(body, self.compression)?;

        let temp = self.temp_path(id);
        let final_path = self.chunk_path(id);
        {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&temp, &final_path).await.inspect_err(|_| {
                tracing::error!(chunk = id.get(), "failed to commit chunk, removing temp file");
            })?;

        Ok(ChunkMetadata::new(id, entries.len() as u32, min_key, max_key, body.len() as u64))
    }

    /// Deletes `id`'s chunk file now if no reader currently has it open, or
    /// defers the unlink to whenever the last open reader's guard releases.
    async fn delete_committed_chunk(&self, id: ChunkId) {
        let path = self.chunk_path(id);
        if let Some(path) = self.readers.delete_when_unreferenced(id, path) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to delete chunk file");
            }
        }
    }

    /// Selects consolidation candidates per the given strategy from chunks
    /// not currently locked by another pass.
    fn select_candidates(&self, strategy: LockerStrategy, locked: &[ChunkId]) -> Vec<ChunkMetadata> {
        let chunks = self.chunks.read();
        let mut eligible: Vec<ChunkMetadata> = chunks.iter().filter(|c| !locked.contains(&c.id)).cloned().collect();
        match strategy {
            LockerStrategy::Hot => {
                eligible.sort_by(|a, b| b.id.cmp(&a.id));
                eligible.truncate(HOT_WINDOW);
            }
            LockerStrategy::Cold => {
                eligible.sort_by(|a, b| a.id.cmp(&b.id));
                let tail_len = eligible.len().saturating_sub(HOT_WINDOW);
                eligible.truncate(tail_len.max(2).min(eligible.len()));
            }
        }
        eligible
    }
}

async fn read_chunk_entries_at<K, S, Ser>(path: &Path, serializer: &Ser, compression: bool) -> Result<Vec<Entry<K, S>>, StorageError>
where
    K: Key,
    S: CrdtState,
    Ser: EntrySerializer<K, S> + ?Sized,
{
    let bytes = tokio::fs::read(path).await?;
    let decoded = decompress_if_needed(bytes, compression)?;
    let (header, offset) = ChunkHeader::decode(&decoded)?;
    let records = read_records(&decoded, offset)?;
    if records.len() != header.count as usize {
        return Err(StorageError::SizeMismatch(format!(
                    "chunk {} header declares {} entries, found {}",
                    path.display(),
                    header.count,
                    records.len()
                )));
    }
    records.iter().map(|r| serializer.decode(r)).collect()
}

fn compress_if_needed(body: Vec<u8>, compression: bool) -> Result<Vec<u8>, StorageError> {
    if !compression {
        return Ok(body);
    }
    zstd::stream::encode_all(&body[..], 0).map_err(|e| StorageError::IoError(format!("zstd encode: {e}")))
}

fn decompress_if_needed(body: Vec<u8>, compression: bool) -> Result<Vec<u8>, StorageError> {
    if !compression {
        return Ok(body);
    }
    zstd::stream::decode_all(&body[..]).map_err(|e| StorageError::IoError(format!("zstd decode: {e}")))
}

#[async_trait]
impl<K, S, Ser, M> ChunkStore<K, S> for FileChunkStore<K, S, Ser, M>
where
    K: Key,
    S: CrdtState,
    Ser: EntrySerializer<K, S> + Send + Sync + 'static,
    M: CrdtMergeService<S> + Send + Sync + 'static,
{
    async fn upload(&self, mut entries: EntryStream<'_, K, S>) -> Result<(), StorageError> {
        let mut collected: Vec<Entry<K, S>> = Vec::new();
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            if let Some(last) = collected.last() {
                if entry.key() <= last.key() {
                    return Err(StorageError::protocol("upload requires strictly ascending keys"));
                }
            }
            collected.push(entry);
        }
        if collected.is_empty() {
            return Ok(());
        }
        let meta = self.commit_chunk(&collected).await?;
        self.chunks.write().push(meta);
        Ok(())
    }

    async fn download(&self, since: Timestamp) -> Result<EntryStream<'_, K, S>, StorageError> {
        let snapshot = self.chunks.read().clone();
        let dir = self.dir.clone();
        let serializer = self.serializer.clone();
        let merge = self.merge.clone();
        let compression = self.compression;

        // Held across every chunk-file read below so a concurrent
        // `consolidate`/`cleanup_irrelevant` can't unlink one of these files
        // out from under us between awaits; see `ReaderRegistry`.
        let _reader_guard = self.readers.acquire(snapshot.iter().map(|c| c.id).collect());

        let mut lists = Vec::with_capacity(snapshot.len());
        for meta in &snapshot {
            let path = dir.join(format!("{}.{}", meta.id.file_stem(), CHUNK_EXTENSION));
            lists.push(read_chunk_entries_at(&path, serializer.as_ref(), compression).await?);
        }
        let merged = k_way_merge(lists, merge.as_ref());
        let filtered: Vec<Entry<K, S>> = merged
            .into_iter()
            .filter(|e| e.timestamp() > since)
            .filter_map(|e| match e {
                Entry::Data { key, timestamp, state } => {
                    merge.extract(&state, since).map(|delta| Entry::Data { key, timestamp, state: delta })
                }
                tombstone @ Entry::Tombstone { .. } => Some(tombstone),
            })
            .collect();
        let out: BoxStream<'_, Result<Entry<K, S>, StorageError>> = stream::iter(filtered.into_iter().map(Ok)).boxed();
        Ok(out)
    }

    async fn take(&self) -> Result<EntryStream<'_, K, S>, StorageError> {
        self.locker.try_begin_take()?;
        *self.take_snapshot.write() = Some(self.chunks.read().iter().map(|c| c.id).collect());
        match self.download(Timestamp::ZERO).await {
            Ok(s) => Ok(s),
            Err(e) => {
                *self.take_snapshot.write() = None;
                self.locker.end_take();
                Err(e)
            }
        }
    }

    async fn commit_take(&self) -> Result<(), StorageError> {
        let ids = self
        .take_snapshot
        .write()
        .take()
        .ok_or_else(|| StorageError::protocol("commit_take called with no outstanding take"))?;
        self.chunks.write().retain(|c| !ids.contains(&c.id));
        for id in &ids {
            self.delete_committed_chunk(*id).await;
        }
        self.locker.end_take();
        Ok(())
    }

    async fn remove(&self, mut tombstones: EntryStream<'_, K, S>) -> Result<(), StorageError> {
        let mut collected: Vec<Entry<K, S>> = Vec::new();
        while let Some(entry) = tombstones.next().await {
            let entry = entry?;
            if !entry.is_tombstone() {
                return Err(StorageError::protocol("remove() only accepts tombstones"));
            }
            if let Some(last) = collected.last() {
                if entry.key() <= last.key() {
                    return Err(StorageError::protocol("remove requires strictly ascending keys"));
                }
            }
            collected.push(entry);
        }
        if collected.is_empty() {
            return Ok(());
        }
        let meta = self.commit_chunk(&collected).await?;
        self.chunks.write().push(meta);
        Ok(())
    }

    async fn consolidate(&self) -> Result<Option<ConsolidationDiff>, StorageError> {
        let strategy = self.locker.next_strategy();
        let candidates = self.select_candidates(strategy, &[]);
        if candidates.len() < 2 {
            return Ok(None);
        }
        let ids: Vec<ChunkId> = candidates.iter().map(|c| c.id).collect();
        self.locker.try_begin_consolidation(&ids)?;

        let result = async {
            let mut lists = Vec::with_capacity(candidates.len());
            for meta in &candidates {
                lists.push(self.read_chunk_entries(meta.id).await?);
            }
            let merged = k_way_merge(lists, self.merge.as_ref());
            if merged.is_empty() {
                return Ok(None);
            }
            let added = self.commit_chunk(&merged).await?;

            {
                let mut chunks = self.chunks.write();
                chunks.retain(|c| !ids.contains(&c.id));
                chunks.push(added.clone());
            }
            for id in &ids {
                self.delete_committed_chunk(*id).await;
            }
            Ok(Some(ConsolidationDiff { added, removed: candidates.clone() }))
        }
        .await;

        self.locker.end_consolidation(&ids);
        result
    }

    async fn cleanup_irrelevant(&self) -> Result<Vec<ChunkMetadata>, StorageError> {
        self.locker.try_begin_cleanup()?;
        let result = async {
            let snapshot = self.chunks.read().clone();
            let mut lists = Vec::with_capacity(snapshot.len());
            for meta in &snapshot {
                lists.push((meta.id, self.read_chunk_entries(meta.id).await?));
            }
            // A chunk is irrelevant once every one of its keys is dominated
            // by a tombstone or by a newer entry for the same key elsewhere
            // in the store.
            let merged: std::collections::BTreeMap<K, Entry<K, S>> =
            k_way_merge(lists.iter().map(|(_, e)| e.clone()).collect(), self.merge.as_ref())
            .into_iter()
            .map(|e| (e.key().clone(), e))
            .collect();

            let mut removable = Vec::new();
            for (id, entries) in &lists {
                let all_superseded = entries.iter().all(|e| {
                        merged
                        .get(e.key())
                        .map(|latest| latest.timestamp() > e.timestamp() || latest.is_tombstone())
                        .unwrap_or(true)
                    });
                if all_superseded {
                    removable.push(*id);
                }
            }

            let removed_meta: Vec<ChunkMetadata> =
            snapshot.iter().filter(|c| removable.contains(&c.id)).cloned().collect();
            if !removed_meta.is_empty() {
                self.chunks.write().retain(|c| !removable.contains(&c.id));
                for id in &removable {
                    self.delete_committed_chunk(*id).await;
                }
            }
            Ok(removed_meta)
        }
        .await;
        self.locker.end_cleanup();
        result
    }

    async fn chunk_metadata(&self) -> Vec<ChunkMetadata> {
        self.chunks.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::serializer::BincodeEntrySerializer;
    use crdt_storage_domain::services::MaxWinsMergeService;
    use futures::stream;
    use tempfile::tempdir;

    async fn open_store(
        dir: &Path,
    ) -> FileChunkStore<u64, i64, BincodeEntrySerializer<u64, i64>, MaxWinsMergeService> {
        FileChunkStore::open(dir, BincodeEntrySerializer::new(), MaxWinsMergeService, false)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let entries = vec![
            Ok(Entry::data(1u64, Timestamp(1), 10i64)),
            Ok(Entry::data(2u64, Timestamp(1), 20i64)),
            ];
        store.upload(stream::iter(entries).boxed()).await.unwrap();

        let mut out = store.download(Timestamp::ZERO).await.unwrap();
        let mut seen = Vec::new();
        while let Some(e) = out.next().await {
            seen.push(e.unwrap());
        }
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].key(), &1u64);
    }

    #[tokio::test]
    async fn upload_rejects_non_ascending_keys() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let entries = vec![
            Ok(Entry::data(2u64, Timestamp(1), 10i64)),
            Ok(Entry::data(1u64, Timestamp(1), 20i64)),
            ];
        let err = store.upload(stream::iter(entries).boxed()).await.unwrap_err();
        assert_eq!(err.category(), "protocol");
    }

    #[tokio::test]
    async fn download_since_filters_older_entries() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store
        .upload(stream::iter(vec![Ok(Entry::data(1u64, Timestamp(5), 1i64))]).boxed())
        .await
        .unwrap();
        let mut out = store.download(Timestamp(10)).await.unwrap();
        assert!(out.next().await.is_none());
    }

    #[tokio::test]
    async fn take_then_commit_clears_the_store() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store
        .upload(stream::iter(vec![Ok(Entry::data(1u64, Timestamp(1), 1i64))]).boxed())
        .await
        .unwrap();

        let mut taken = store.take().await.unwrap();
        while taken.next().await.is_some() {}
        drop(taken);
        store.commit_take().await.unwrap();
        assert!(store.chunk_metadata().await.is_empty());
    }

    #[tokio::test]
    async fn second_take_fails_while_first_outstanding() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let _first = store.take().await.unwrap();
        let err = store.take().await.unwrap_err();
        assert!(err.is_benign_contention());
    }

    #[tokio::test]
    async fn consolidate_merges_overlapping_chunks() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        for i in 0..3u64 {
            store
            .upload(stream::iter(vec![Ok(Entry::data(1u64, Timestamp(i + 1), i as i64))]).boxed())
            .await
            .unwrap();
        }
        assert_eq!(store.chunk_metadata().await.len(), 3);
        let diff = store.consolidate().await.unwrap().expect("should consolidate");
        assert_eq!(diff.removed.len(), 3);
        let remaining = store.chunk_metadata().await;
        assert_eq!(remaining.len(), 1);

        let mut out = store.download(Timestamp::ZERO).await.unwrap();
        let merged_entry = out.next().await.unwrap().unwrap();
        assert_eq!(merged_entry.state(), Some(&2i64));
    }

    #[tokio::test]
    async fn consolidate_defers_deleting_a_chunk_still_open_for_a_reader() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        for i in 0..3u64 {
            store
            .upload(stream::iter(vec![Ok(Entry::data(1u64, Timestamp(i + 1), i as i64))]).boxed())
            .await
            .unwrap();
        }
        let old_ids: Vec<ChunkId> = store.chunk_metadata().await.iter().map(|c| c.id).collect();

        // Simulate a `download` that is still mid-read over these chunks.
        let guard = store.readers.acquire(old_ids.clone());
        store.consolidate().await.unwrap().expect("should consolidate");
        for id in &old_ids {
            assert!(store.chunk_path(*id).exists(), "consolidate must not unlink a chunk a live reader holds open");
        }

        drop(guard);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        for id in &old_ids {
            assert!(!store.chunk_path(*id).exists(), "chunk should be unlinked once the reader releases it");
        }
    }

    #[tokio::test]
    async fn reopening_the_store_resumes_the_id_source_and_chunk_set() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path()).await;
            store
            .upload(stream::iter(vec![Ok(Entry::data(1u64, Timestamp(1), 1i64))]).boxed())
            .await
            .unwrap();
        }
        let reopened = open_store(dir.path()).await;
        assert_eq!(reopened.chunk_metadata().await.len(), 1);
    }
}
