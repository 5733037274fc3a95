use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use parking_lot::Mutex;

/// Extendible hash table used as the buffer pool's page-table directory.
///
/// The directory is a vector of indices into a bucket arena; several
/// directory slots may alias the same bucket while its local depth is
/// below the global depth. All operations are serialized by one mutex;
/// they are short, and the common case is a single bucket probe.
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<Directory<K, V>>,
}

struct Directory<K, V> {
    global_depth: usize,
    bucket_size: usize,
    num_buckets: usize,
    /// dir[i] is an index into `buckets`
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V>
where
    K: PartialEq,
{
    fn new(depth: usize) -> Self {
        Self {
            depth,
            items: Vec::new(),
        }
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn remove(&mut self, key: &K) -> bool {
        if let Some(pos) = self.items.iter().position(|(k, _)| k == key) {
            self.items.remove(pos);
            return true;
        }
        false
    }

    /// Insert or overwrite; returns false when the bucket is full.
    fn insert(&mut self, key: K, value: V, capacity: usize) -> bool {
        if let Some(item) = self.items.iter_mut().find(|(k, _)| *k == key) {
            item.1 = value;
            return true;
        }
        if self.items.len() >= capacity {
            return false;
        }
        self.items.push((key, value));
        true
    }
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        Self {
            inner: Mutex::new(Directory {
                global_depth: 0,
                bucket_size,
                num_buckets: 1,
                dir: vec![0],
                buckets: vec![Bucket::new(0)],
            }),
        }
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        inner.buckets[inner.dir[dir_index]].depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().num_buckets
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let index = inner.index_of(key);
        inner.buckets[inner.dir[index]].find(key).cloned()
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let index = inner.index_of(key);
        let bucket = inner.dir[index];
        inner.buckets[bucket].remove(key)
    }

    /// Insert a key-value pair, overwriting any previous value.
    ///
    /// A full target bucket is split until the insert fits; a pathological
    /// hash distribution can require several rounds, each of which either
    /// frees a slot or raises the global depth.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        loop {
            let index = inner.index_of(&key);
            let bucket = inner.dir[index];
            let capacity = inner.bucket_size;
            if inner.buckets[bucket].insert(key.clone(), value.clone(), capacity) {
                return;
            }
            inner.split(index);
        }
    }
}

impl<K, V> Directory<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn index_of(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & ((1 << self.global_depth) - 1)
    }

    /// Split the bucket behind directory slot `index`.
    fn split(&mut self, index: usize) {
        let bucket = self.dir[index];
        self.buckets[bucket].depth += 1;
        if self.buckets[bucket].depth > self.global_depth {
            self.grow();
        }
        let depth = self.buckets[bucket].depth;

        // Allocate the image bucket and point every directory slot that
        // shares the old bucket's extended mask at it.
        let image = self.buckets.len();
        self.buckets.push(Bucket::new(depth));
        self.num_buckets += 1;

        let image_index = index ^ (1 << (depth - 1));
        let stride = 1 << depth;
        let low = image_index & (stride - 1);
        for slot in (low..self.dir.len()).step_by(stride) {
            self.dir[slot] = image;
        }

        // Redistribute the old bucket's entries under the extended mask.
        let items = std::mem::take(&mut self.buckets[bucket].items);
        for (k, v) in items {
            let slot = self.index_of(&k);
            let target = self.dir[slot];
            self.buckets[target].items.push((k, v));
        }
    }

    /// Double the directory; each new slot initially mirrors its pair.
    fn grow(&mut self) {
        for i in 0..(1 << self.global_depth) {
            let b = self.dir[i];
            self.dir.push(b);
        }
        self.global_depth += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_low_bits(key: u32, bits: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & ((1 << bits) - 1)
    }

    /// Find a key whose hash has the given low two bits. DefaultHasher is
    /// deterministic when constructed with `new`, so the search is stable.
    fn key_with_low_bits(bits: usize) -> u32 {
        (0u32..).find(|k| hash_low_bits(*k, 2) == bits).unwrap()
    }

    #[test]
    fn test_find_insert_remove() {
        let table = ExtendibleHashTable::<u32, u32>::new(4);
        assert_eq!(table.find(&1), None);

        table.insert(1, 100);
        table.insert(2, 200);
        assert_eq!(table.find(&1), Some(100));
        assert_eq!(table.find(&2), Some(200));

        // Duplicate key overwrites: a page id maps to exactly one frame
        table.insert(1, 111);
        assert_eq!(table.find(&1), Some(111));

        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
    }

    #[test]
    fn test_split_grows_directory() {
        // Bucket size 2, depth starts at 0. Insert one key per low-2-bit
        // class; the directory must double twice to separate them.
        let table = ExtendibleHashTable::<u32, u32>::new(2);
        let keys: Vec<u32> = (0..4).map(key_with_low_bits).collect();
        for (i, &k) in keys.iter().enumerate() {
            table.insert(k, (i as u32 + 1) * 10);
        }

        assert_eq!(table.global_depth(), 2);
        assert_eq!(table.num_buckets(), 4);
        assert_eq!(table.find(&keys[2]), Some(30));
        for (i, &k) in keys.iter().enumerate() {
            assert_eq!(table.find(&k), Some((i as u32 + 1) * 10));
        }
    }

    #[test]
    fn test_directory_invariants_under_load() {
        let table = ExtendibleHashTable::<u32, u32>::new(2);
        for i in 0..256 {
            table.insert(i, i * 2);
        }
        for i in 0..256 {
            assert_eq!(table.find(&i), Some(i * 2));
        }

        let inner = table.inner.lock();
        assert_eq!(inner.dir.len(), 1 << inner.global_depth);
        for (slot, &bucket) in inner.dir.iter().enumerate() {
            let depth = inner.buckets[bucket].depth;
            assert!(depth <= inner.global_depth);
            // Every slot matching this bucket's low local-depth bits must
            // point at the same bucket.
            let mask = (1 << depth) - 1;
            for (other_slot, &other_bucket) in inner.dir.iter().enumerate() {
                if other_slot & mask == slot & mask {
                    assert_eq!(other_bucket, bucket);
                }
            }
        }
    }

    #[test]
    fn test_local_depth_accessor() {
        let table = ExtendibleHashTable::<u32, u32>::new(2);
        for i in 0..16 {
            table.insert(i, i);
        }
        for slot in 0..(1 << table.global_depth()) {
            assert!(table.local_depth(slot) <= table.global_depth());
        }
    }
}
