use std::{cmp::Ordering, marker::PhantomData};

use bytes::{Buf, BufMut};

use crate::common::config::PageId;

/// Fixed-width little-endian encoding for the key and value types the
/// hash index stores. Bucket pages pack entries back to back, so the
/// encoded size has to be a compile-time constant.
pub trait FixedCodec: Sized {
    const ENCODED_SIZE: usize;

    fn encode_into(&self, buf: &mut &mut [u8]);
    fn decode_from(buf: &mut &[u8]) -> Self;
}

impl FixedCodec for i32 {
    const ENCODED_SIZE: usize = 4;

    fn encode_into(&self, buf: &mut &mut [u8]) {
        buf.put_i32_le(*self);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        buf.get_i32_le()
    }
}

impl FixedCodec for u32 {
    const ENCODED_SIZE: usize = 4;

    fn encode_into(&self, buf: &mut &mut [u8]) {
        buf.put_u32_le(*self);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        buf.get_u32_le()
    }
}

impl FixedCodec for i64 {
    const ENCODED_SIZE: usize = 8;

    fn encode_into(&self, buf: &mut &mut [u8]) {
        buf.put_i64_le(*self);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        buf.get_i64_le()
    }
}

impl FixedCodec for u64 {
    const ENCODED_SIZE: usize = 8;

    fn encode_into(&self, buf: &mut &mut [u8]) {
        buf.put_u64_le(*self);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        buf.get_u64_le()
    }
}

/// Location of a tuple: the page holding it plus the slot within the page.
/// This is what the index stores as its value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

impl FixedCodec for Rid {
    const ENCODED_SIZE: usize = 8;

    fn encode_into(&self, buf: &mut &mut [u8]) {
        buf.put_u32_le(self.page_id);
        buf.put_u32_le(self.slot_num);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        let page_id = buf.get_u32_le();
        let slot_num = buf.get_u32_le();
        Self { page_id, slot_num }
    }
}

/// Key equality/ordering carried by the hash table instance rather than a
/// process-wide singleton.
pub trait KeyComparator<K> {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering;

    fn eq(&self, lhs: &K, rhs: &K) -> bool {
        self.compare(lhs, rhs) == Ordering::Equal
    }
}

/// Comparator for keys with a natural order.
pub struct OrdComparator<K> {
    _marker: PhantomData<K>,
}

impl<K> Default for OrdComparator<K> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<K: Ord> KeyComparator<K> for OrdComparator<K> {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        lhs.cmp(rhs)
    }
}

/// Hash function carried by the hash table instance. The top bits of the
/// result pick the directory, the bottom bits pick the bucket.
pub trait KeyHasher<K> {
    fn hash_key(&self, key: &K) -> u32;
}

/// Default hasher: CRC32 over the encoded key bytes.
#[derive(Default)]
pub struct Crc32Hasher;

impl<K: FixedCodec> KeyHasher<K> for Crc32Hasher {
    fn hash_key(&self, key: &K) -> u32 {
        let mut encoded = vec![0u8; K::ENCODED_SIZE];
        let mut cursor = &mut encoded[..];
        key.encode_into(&mut cursor);
        crc32fast::hash(&encoded)
    }
}

/// Uses the key itself as its hash. Handy for deterministic tests where
/// directory and bucket routing must be predictable.
#[derive(Default)]
pub struct IdentityHasher;

impl KeyHasher<u32> for IdentityHasher {
    fn hash_key(&self, key: &u32) -> u32 {
        *key
    }
}

impl KeyHasher<i32> for IdentityHasher {
    fn hash_key(&self, key: &i32) -> u32 {
        *key as u32
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rid_codec_round_trips() {
        let rid = Rid::new(42, 7);

        let mut encoded = vec![0u8; Rid::ENCODED_SIZE];
        let mut cursor = &mut encoded[..];
        rid.encode_into(&mut cursor);

        let mut cursor = &encoded[..];
        assert_eq!(Rid::decode_from(&mut cursor), rid);
    }

    #[test]
    fn crc32_hash_is_stable_per_key() {
        let hasher = Crc32Hasher;
        let a = KeyHasher::<i32>::hash_key(&hasher, &17);
        let b = KeyHasher::<i32>::hash_key(&hasher, &17);
        let c = KeyHasher::<i32>::hash_key(&hasher, &18);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn identity_hash_exposes_routing_bits() {
        let hasher = IdentityHasher;
        assert_eq!(hasher.hash_key(&0b1011u32), 0b1011);
    }
}
