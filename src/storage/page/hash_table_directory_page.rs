use std::collections::HashMap;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::config::PageId;

/// Deepest directory the fixed page layout can hold. 512 bucket slots:
/// 1024 would leave no room for the depth metadata and the local depths.
pub const HASH_DIRECTORY_MAX_DEPTH: u32 = 9;
pub const HASH_DIRECTORY_ARRAY_SIZE: usize = 1 << HASH_DIRECTORY_MAX_DEPTH;

// In-file layout:
//  -------------------------------------------------------------------------------
// | MaxDepth (4) | GlobalDepth (4) | LocalDepths (512) | BucketPageIds (512 * 4) |
//  -------------------------------------------------------------------------------
const LOCAL_DEPTHS_OFFSET: usize = 8;
const BUCKET_PAGE_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + HASH_DIRECTORY_ARRAY_SIZE;

/// Middle level of the extendible hash table.
///
/// Only the first `2^global_depth` slots are live. Slots whose indices
/// differ only in bits at or above their local depth alias the same
/// bucket page and carry the same local depth.
pub struct HashTableDirectoryPage {
    max_depth: u32,
    global_depth: u32,
    local_depths: [u8; HASH_DIRECTORY_ARRAY_SIZE],
    bucket_page_ids: [PageId; HASH_DIRECTORY_ARRAY_SIZE],
}

impl HashTableDirectoryPage {
    pub fn init(max_depth: u32) -> Self {
        assert!(max_depth <= HASH_DIRECTORY_MAX_DEPTH);

        Self {
            max_depth,
            global_depth: 0,
            local_depths: [0; HASH_DIRECTORY_ARRAY_SIZE],
            bucket_page_ids: [0; HASH_DIRECTORY_ARRAY_SIZE],
        }
    }

    pub fn decode(data: &[u8]) -> Self {
        let mut cursor = Cursor::new(data);

        let max_depth = cursor.read_u32::<LittleEndian>().expect("truncated directory page");
        let global_depth = cursor.read_u32::<LittleEndian>().expect("truncated directory page");

        let mut local_depths = [0u8; HASH_DIRECTORY_ARRAY_SIZE];
        for depth in local_depths.iter_mut() {
            *depth = cursor.read_u8().expect("truncated directory page");
        }

        let mut bucket_page_ids = [0 as PageId; HASH_DIRECTORY_ARRAY_SIZE];
        for slot in bucket_page_ids.iter_mut() {
            *slot = cursor.read_u32::<LittleEndian>().expect("truncated directory page");
        }

        Self {
            max_depth,
            global_depth,
            local_depths,
            bucket_page_ids,
        }
    }

    pub fn encode(&self, data: &mut [u8]) {
        let mut cursor = Cursor::new(data);

        cursor
            .write_u32::<LittleEndian>(self.max_depth)
            .expect("directory page overflow");
        cursor
            .write_u32::<LittleEndian>(self.global_depth)
            .expect("directory page overflow");

        debug_assert_eq!(cursor.position() as usize, LOCAL_DEPTHS_OFFSET);
        for &depth in self.local_depths.iter() {
            cursor.write_u8(depth).expect("directory page overflow");
        }

        debug_assert_eq!(cursor.position() as usize, BUCKET_PAGE_IDS_OFFSET);
        for &page_id in self.bucket_page_ids.iter() {
            cursor
                .write_u32::<LittleEndian>(page_id)
                .expect("directory page overflow");
        }
    }

    /// Bucket slot for a hash: its bottom `global_depth` bits.
    pub fn hash_to_bucket_index(&self, hash: u32) -> u32 {
        hash & self.global_depth_mask()
    }

    pub fn bucket_page_id(&self, bucket_idx: u32) -> PageId {
        self.bucket_page_ids[bucket_idx as usize]
    }

    pub fn set_bucket_page_id(&mut self, bucket_idx: u32, bucket_page_id: PageId) {
        self.bucket_page_ids[bucket_idx as usize] = bucket_page_id;
    }

    /// The slot that splits off of `bucket_idx` at its current local
    /// depth: the index with the next depth bit flipped.
    pub fn split_image_index(&self, bucket_idx: u32) -> u32 {
        bucket_idx ^ (1 << self.local_depth(bucket_idx))
    }

    /// Mask of `global_depth` ones from the LSB upwards.
    pub fn global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth) - 1
    }

    /// Same as `global_depth_mask` but for the local depth at `bucket_idx`.
    pub fn local_depth_mask(&self, bucket_idx: u32) -> u32 {
        (1u32 << self.local_depth(bucket_idx)) - 1
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    /// Doubles the live directory: every new slot inherits the bucket and
    /// local depth of the slot it mirrors one bit below.
    pub fn incr_global_depth(&mut self) {
        assert!(self.global_depth < self.max_depth, "directory is at max depth");

        let old_size = 1usize << self.global_depth;
        for new_idx in old_size..old_size * 2 {
            let origin_idx = new_idx - old_size;
            self.bucket_page_ids[new_idx] = self.bucket_page_ids[origin_idx];
            self.local_depths[new_idx] = self.local_depths[origin_idx];
        }

        self.global_depth += 1;
    }

    /// Caller checks `can_shrink` first.
    pub fn decr_global_depth(&mut self) {
        assert!(self.global_depth > 0);
        self.global_depth -= 1;
    }

    /// The directory may halve only when every live local depth sits
    /// strictly below the global depth.
    pub fn can_shrink(&self) -> bool {
        self.local_depths[..self.size() as usize]
            .iter()
            .all(|&depth| (depth as u32) < self.global_depth)
    }

    /// Number of live slots.
    pub fn size(&self) -> u32 {
        1 << self.global_depth
    }

    pub fn max_size(&self) -> u32 {
        1 << self.max_depth
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn local_depth(&self, bucket_idx: u32) -> u32 {
        self.local_depths[bucket_idx as usize] as u32
    }

    pub fn set_local_depth(&mut self, bucket_idx: u32, local_depth: u8) {
        self.local_depths[bucket_idx as usize] = local_depth;
    }

    pub fn incr_local_depth(&mut self, bucket_idx: u32) {
        self.local_depths[bucket_idx as usize] += 1;
    }

    pub fn decr_local_depth(&mut self, bucket_idx: u32) {
        self.local_depths[bucket_idx as usize] -= 1;
    }

    /// Asserts the structural invariants: every local depth bounded by the
    /// global depth, every bucket referenced by exactly
    /// `2^(global_depth - local_depth)` slots, and aliased slots agreeing
    /// on their local depth.
    pub fn verify_integrity(&self) {
        let mut page_id_to_count: HashMap<PageId, u32> = HashMap::new();
        let mut page_id_to_depth: HashMap<PageId, u32> = HashMap::new();

        for idx in 0..self.size() {
            let page_id = self.bucket_page_id(idx);
            let depth = self.local_depth(idx);

            assert!(
                depth <= self.global_depth,
                "local depth {} at slot {} exceeds global depth {}",
                depth,
                idx,
                self.global_depth
            );

            *page_id_to_count.entry(page_id).or_insert(0) += 1;
            if let Some(&seen) = page_id_to_depth.get(&page_id) {
                assert_eq!(
                    seen, depth,
                    "slots sharing bucket page {} disagree on local depth",
                    page_id
                );
            } else {
                page_id_to_depth.insert(page_id, depth);
            }
        }

        for (page_id, count) in page_id_to_count {
            let depth = page_id_to_depth[&page_id];
            assert_eq!(
                count,
                1 << (self.global_depth - depth),
                "bucket page {} has the wrong number of directory entries",
                page_id
            );
        }
    }
}
