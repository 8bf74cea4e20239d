use bytes::{Buf, BufMut};

use crate::common::config::PAGE_SIZE;
use crate::storage::index::key::{FixedCodec, KeyComparator};

// In-file layout:
//  ------------------------------------------------------
// | Size (4) | MaxSize (4) | Entries (max_size * entry) |
//  ------------------------------------------------------
const BUCKET_METADATA_SIZE: usize = 8;

/// Leaf level of the extendible hash table: a fixed-capacity array of
/// key/value entries. Uniqueness within a bucket is enforced through the
/// comparator passed to each operation.
pub struct HashTableBucketPage<K, V> {
    max_size: u32,
    entries: Vec<(K, V)>,
}

/// Largest capacity a bucket of this entry size can declare.
pub fn bucket_array_size<K: FixedCodec, V: FixedCodec>() -> usize {
    (PAGE_SIZE - BUCKET_METADATA_SIZE) / (K::ENCODED_SIZE + V::ENCODED_SIZE)
}

impl<K: FixedCodec, V: FixedCodec> HashTableBucketPage<K, V> {
    pub fn init(max_size: u32) -> Self {
        assert!(
            max_size as usize <= bucket_array_size::<K, V>(),
            "bucket capacity {} does not fit a page",
            max_size
        );
        assert!(max_size > 0);

        Self {
            max_size,
            entries: Vec::with_capacity(max_size as usize),
        }
    }

    pub fn decode(data: &[u8]) -> Self {
        let mut buf = data;

        let size = buf.get_u32_le();
        let max_size = buf.get_u32_le();

        let mut entries = Vec::with_capacity(size as usize);
        for _ in 0..size {
            let key = K::decode_from(&mut buf);
            let value = V::decode_from(&mut buf);
            entries.push((key, value));
        }

        Self { max_size, entries }
    }

    pub fn encode(&self, data: &mut [u8]) {
        let mut buf = data;

        buf.put_u32_le(self.entries.len() as u32);
        buf.put_u32_le(self.max_size);

        for (key, value) in &self.entries {
            key.encode_into(&mut buf);
            value.encode_into(&mut buf);
        }
    }

    /// Linear scan, first match wins.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> Option<&V> {
        self.entries
            .iter()
            .find(|(entry_key, _)| cmp.eq(entry_key, key))
            .map(|(_, value)| value)
    }

    /// Appends the entry. Fails when the bucket is full or the key is
    /// already present.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: K, value: V, cmp: &C) -> bool {
        if self.is_full() {
            return false;
        }
        if self.lookup(&key, cmp).is_some() {
            return false;
        }

        self.entries.push((key, value));
        true
    }

    /// Removes by key, swapping the last entry into the hole.
    pub fn remove<C: KeyComparator<K>>(&mut self, key: &K, cmp: &C) -> bool {
        let Some(idx) = self
            .entries
            .iter()
            .position(|(entry_key, _)| cmp.eq(entry_key, key))
        else {
            return false;
        };

        self.entries.swap_remove(idx);
        true
    }

    /// Removes the entry at `bucket_idx`, swapping the last entry into the
    /// hole, and returns it.
    pub fn remove_at(&mut self, bucket_idx: u32) -> (K, V) {
        self.entries.swap_remove(bucket_idx as usize)
    }

    pub fn key_at(&self, bucket_idx: u32) -> &K {
        &self.entries[bucket_idx as usize].0
    }

    pub fn value_at(&self, bucket_idx: u32) -> &V {
        &self.entries[bucket_idx as usize].1
    }

    pub fn entry_at(&self, bucket_idx: u32) -> (&K, &V) {
        let (key, value) = &self.entries[bucket_idx as usize];
        (key, value)
    }

    pub fn size(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() as u32 == self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::config::PAGE_SIZE;
    use crate::storage::index::key::{OrdComparator, Rid};

    #[test]
    fn insert_rejects_duplicates_and_overflow() {
        let cmp = OrdComparator::<i32>::default();
        let mut bucket = HashTableBucketPage::<i32, Rid>::init(2);

        assert!(bucket.insert(1, Rid::new(1, 0), &cmp));
        assert!(!bucket.insert(1, Rid::new(9, 9), &cmp), "duplicate key");
        assert!(bucket.insert(2, Rid::new(1, 1), &cmp));
        assert!(bucket.is_full());
        assert!(!bucket.insert(3, Rid::new(1, 2), &cmp), "bucket full");

        assert_eq!(bucket.lookup(&1, &cmp), Some(&Rid::new(1, 0)));
        assert_eq!(bucket.lookup(&3, &cmp), None);
    }

    #[test]
    fn remove_swaps_with_last() {
        let cmp = OrdComparator::<i32>::default();
        let mut bucket = HashTableBucketPage::<i32, Rid>::init(4);
        for key in 0..4 {
            assert!(bucket.insert(key, Rid::new(0, key as u32), &cmp));
        }

        assert!(bucket.remove(&0, &cmp));
        assert_eq!(bucket.size(), 3);
        // Entry 3 took slot 0.
        assert_eq!(*bucket.key_at(0), 3);

        assert!(!bucket.remove(&0, &cmp), "already gone");
        assert_eq!(bucket.lookup(&3, &cmp), Some(&Rid::new(0, 3)));
    }

    #[test]
    fn codec_round_trips() {
        let cmp = OrdComparator::<i32>::default();
        let mut bucket = HashTableBucketPage::<i32, Rid>::init(8);
        for key in 0..5 {
            assert!(bucket.insert(key, Rid::new(key as u32, 0), &cmp));
        }

        let mut page = vec![0u8; PAGE_SIZE];
        bucket.encode(&mut page);
        let decoded = HashTableBucketPage::<i32, Rid>::decode(&page);

        assert_eq!(decoded.size(), 5);
        assert_eq!(decoded.max_size(), 8);
        for key in 0..5 {
            assert_eq!(decoded.lookup(&key, &cmp), Some(&Rid::new(key as u32, 0)));
        }
    }

    #[test]
    fn capacity_is_bounded_by_the_page() {
        assert!(bucket_array_size::<i32, Rid>() >= 256);
    }
}
