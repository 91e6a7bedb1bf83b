//! In-memory [`StorageEngine`] implementation backed by [`DashMap`].
//!
//! Provides concurrent read/write access without external locking.
//! Suitable for development, testing, and production workloads where
//! all data fits in memory.

use dashmap::DashMap;
use rand::Rng;

use crate::storage::engine::{FetchResult, IterationCursor, StorageEngine};
use crate::storage::record::Record;

/// In-memory storage backed by [`DashMap`] for concurrent read access.
///
/// All operations are lock-free for readers and use fine-grained sharding
/// internally (via `DashMap`) for writers. This makes it well-suited for
/// read-heavy workloads typical of CRDT data grids.
pub struct HashMapStorage {
    entries: DashMap<String, Record>,
}

impl HashMapStorage {
    /// Creates a new, empty `HashMapStorage`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for HashMapStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes a cursor's opaque state into a `u64` offset.
///
/// Empty state (from `IterationCursor::start()`) is treated as offset 0.
fn decode_cursor_offset(cursor: &IterationCursor) -> u64 {
    if cursor.state.is_empty() {
        0
    } else {
        let mut buf = [0u8; 8];
        let len = cursor.state.len().min(8);
        buf[..len].copy_from_slice(&cursor.state[..len]);
        u64::from_le_bytes(buf)
    }
}

/// Encodes an offset into cursor state bytes (little-endian `u64`).
fn encode_cursor_offset(offset: u64) -> Vec<u8> {
    offset.to_le_bytes().to_vec()
}

impl StorageEngine for HashMapStorage {
    fn put(&self, key: &str, record: Record) -> Option<Record> {
        self.entries.insert(key.to_string(), record)
    }

    fn get(&self, key: &str) -> Option<Record> {
        self.entries.get(key).map(|r| r.clone())
    }

    fn remove(&self, key: &str) -> Option<Record> {
        self.entries.remove(key).map(|(_, r)| r)
    }

    fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn destroy(&self) {
        self.clear();
    }

    fn estimated_cost(&self) -> u64 {
        self.entries.iter().map(|r| r.value().metadata.cost).sum()
    }

    fn snapshot_iter(&self) -> Vec<(String, Record)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn random_samples(&self, sample_count: usize) -> Vec<(String, Record)> {
        if sample_count == 0 {
            return Vec::new();
        }

        let mut rng = rand::rng();
        let mut reservoir: Vec<(String, Record)> = Vec::with_capacity(sample_count);

        for (i, entry) in self.entries.iter().enumerate() {
            let pair = (entry.key().clone(), entry.value().clone());
            if i < sample_count {
                reservoir.push(pair);
            } else {
                // Replace an existing sample with probability sample_count / (i + 1)
                let j = rng.random_range(0..=i);
                if j < sample_count {
                    reservoir[j] = pair;
                }
            }
        }

        reservoir
    }

    fn fetch_keys(&self, cursor: &IterationCursor, size: usize) -> FetchResult<String> {
        let snapshot = self.snapshot_iter();
        let total = snapshot.len();
        // Cursor offsets are always small (bounded by storage size), so truncation is safe.
        #[allow(clippy::cast_possible_truncation)]
        let offset = decode_cursor_offset(cursor) as usize;

        let items: Vec<String> = snapshot
            .into_iter()
            .skip(offset)
            .take(size)
            .map(|(k, _)| k)
            .collect();

        let new_offset = offset + items.len();
        let finished = new_offset >= total;

        FetchResult {
            items,
            next_cursor: IterationCursor {
                state: encode_cursor_offset(new_offset as u64),
                finished,
            },
        }
    }

    fn fetch_entries(
        &self,
        cursor: &IterationCursor,
        size: usize,
    ) -> FetchResult<(String, Record)> {
        let snapshot = self.snapshot_iter();
        let total = snapshot.len();
        // Cursor offsets are always small (bounded by storage size), so truncation is safe.
        #[allow(clippy::cast_possible_truncation)]
        let offset = decode_cursor_offset(cursor) as usize;

        let items: Vec<(String, Record)> =
            snapshot.into_iter().skip(offset).take(size).collect();

        let new_offset = offset + items.len();
        let finished = new_offset >= total;

        FetchResult {
            items,
            next_cursor: IterationCursor {
                state: encode_cursor_offset(new_offset as u64),
                finished,
            },
        }
    }
}
