use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

use parking_lot::Mutex;

/// A bucket holds at most `bucket_size` entries whose hashes agree on the
/// low `depth` bits.
struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K: Eq, V> Bucket<K, V> {
    fn new(depth: usize, capacity: usize) -> Self {
        Self {
            depth,
            items: Vec::with_capacity(capacity),
        }
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn remove(&mut self, key: &K) -> bool {
        if let Some(pos) = self.items.iter().position(|(k, _)| k == key) {
            self.items.remove(pos);
            true
        } else {
            false
        }
    }
}

/// Directory state. Buckets live in a slab so that multiple directory slots
/// can share one bucket by index; split buckets reuse their old slab slot
/// for the low half and push the high half at the end.
struct TableState<K, V> {
    global_depth: usize,
    num_buckets: usize,
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// In-memory extendible hash table, used by the buffer pool as its page
/// table (page id -> frame id).
///
/// The directory holds `2^global_depth` slots; slots whose indices agree on
/// the low `local_depth` bits of a bucket all point at that bucket. A full
/// bucket splits in place when its local depth is below the global depth,
/// and doubles the directory first when the depths are equal. Buckets are
/// never merged.
///
/// All public operations serialize on a single exclusive latch. The hasher
/// is pluggable the way `std::collections::HashMap`'s is, so tests can pin
/// directory shapes with a deterministic hash.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    bucket_size: usize,
    hash_builder: S,
    state: Mutex<TableState<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V, RandomState>
where
    K: Hash + Eq,
    V: Clone,
{
    /// Creates a table with a single depth-0 bucket of the given capacity.
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq,
    V: Clone,
    S: BuildHasher,
{
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            bucket_size,
            hash_builder,
            state: Mutex::new(TableState {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![0],
                buckets: vec![Bucket::new(0, bucket_size)],
            }),
        }
    }

    /// Looks up the value bound to `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let state = self.state.lock();
        let idx = self.index_of(&state, key);
        state.buckets[state.dir[idx]].find(key).cloned()
    }

    /// Inserts or overwrites the binding for `key`.
    pub fn insert(&self, key: K, value: V) {
        let mut state = self.state.lock();
        loop {
            let idx = self.index_of(&state, &key);
            let slot = state.dir[idx];
            {
                let bucket = &mut state.buckets[slot];
                if let Some(pos) = bucket.items.iter().position(|(k, _)| *k == key) {
                    bucket.items[pos].1 = value;
                    return;
                }
                if bucket.items.len() < self.bucket_size {
                    bucket.items.push((key, value));
                    return;
                }
            }

            // Full bucket: grow the directory first if the bucket already
            // spans every matching slot pattern, then split and retry.
            if state.buckets[slot].depth == state.global_depth {
                self.double_directory(&mut state);
            }
            let idx = self.index_of(&state, &key);
            self.split_bucket(&mut state, idx);
        }
    }

    /// Removes the binding for `key`, reporting whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut state = self.state.lock();
        let idx = self.index_of(&state, key);
        let slot = state.dir[idx];
        state.buckets[slot].remove(key)
    }

    pub fn global_depth(&self) -> usize {
        self.state.lock().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        let state = self.state.lock();
        state.buckets[state.dir[dir_index]].depth
    }

    pub fn num_buckets(&self) -> usize {
        self.state.lock().num_buckets
    }

    fn hash_of(&self, key: &K) -> usize {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish() as usize
    }

    fn index_of(&self, state: &TableState<K, V>, key: &K) -> usize {
        self.hash_of(key) & ((1 << state.global_depth) - 1)
    }

    fn double_directory(&self, state: &mut TableState<K, V>) {
        let old_len = state.dir.len();
        state.global_depth += 1;
        // New upper half mirrors the existing slots: slot i and
        // i + old_len share the same low bits.
        for i in 0..old_len {
            let slot = state.dir[i];
            state.dir.push(slot);
        }
    }

    /// Splits the bucket behind directory slot `dir_index` into two buckets
    /// of one greater depth, partitioning its entries by the next hash bit.
    fn split_bucket(&self, state: &mut TableState<K, V>, dir_index: usize) {
        let slot = state.dir[dir_index];
        let depth = state.buckets[slot].depth;
        debug_assert!(depth < state.global_depth);

        let signature = dir_index & ((1 << depth) - 1);
        let items = std::mem::take(&mut state.buckets[slot].items);

        let mut low = Vec::with_capacity(self.bucket_size);
        let mut high = Vec::with_capacity(self.bucket_size);
        for (k, v) in items {
            if (self.hash_of(&k) >> depth) & 1 == 0 {
                low.push((k, v));
            } else {
                high.push((k, v));
            }
        }

        state.buckets[slot].depth = depth + 1;
        state.buckets[slot].items = low;

        let high_slot = state.buckets.len();
        let mut high_bucket = Bucket::new(depth + 1, self.bucket_size);
        high_bucket.items = high;
        state.buckets.push(high_bucket);

        // Every directory slot that pointed at the old bucket now chooses
        // between the two halves by bit `depth` of its index.
        for i in 0..state.dir.len() {
            if i & ((1 << depth) - 1) == signature && (i >> depth) & 1 == 1 {
                state.dir[i] = high_slot;
            }
        }
        state.num_buckets += 1;
    }
}
