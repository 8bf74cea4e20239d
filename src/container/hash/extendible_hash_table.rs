use std::{marker::PhantomData, sync::Arc};

use log::trace;

use crate::{
    buffer::buffer_pool_manager::BufferPoolManager,
    common::config::{PageId, INVALID_PAGE_ID},
    storage::{
        index::key::{FixedCodec, KeyComparator, KeyHasher},
        page::{
            hash_table_bucket_page::{bucket_array_size, HashTableBucketPage},
            hash_table_directory_page::{HashTableDirectoryPage, HASH_DIRECTORY_MAX_DEPTH},
            hash_table_header_page::{HashTableHeaderPage, HASH_HEADER_MAX_DEPTH},
            page_guard::WriteGuard,
        },
    },
};

/// Disk-backed extendible hash table: one header page routing the top
/// hash bits to directory pages, each routing the bottom bits to bucket
/// pages. All page access goes through the buffer pool under a strict
/// header -> directory -> bucket latch order.
///
/// Keys are unique. Buckets split on overflow, growing their directory as
/// needed; an insert fails only once its directory is saturated at
/// `directory_max_depth`. Empty buckets are not merged back.
pub struct DiskExtendibleHashTable<K, V, C, H> {
    bpm: Arc<BufferPoolManager>,
    cmp: C,
    hash_fn: H,

    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u32,

    _marker: PhantomData<(K, V)>,
}

impl<K, V, C, H> DiskExtendibleHashTable<K, V, C, H>
where
    K: FixedCodec + Clone,
    V: FixedCodec + Clone,
    C: KeyComparator<K>,
    H: KeyHasher<K>,
{
    /// Creates a fresh table, allocating and initializing its header page.
    /// `None` when the buffer pool cannot back the header.
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        cmp: C,
        hash_fn: H,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: u32,
    ) -> Option<Self> {
        assert!(header_max_depth <= HASH_HEADER_MAX_DEPTH);
        assert!(directory_max_depth <= HASH_DIRECTORY_MAX_DEPTH);
        assert!(
            bucket_max_size as usize <= bucket_array_size::<K, V>(),
            "bucket capacity does not fit a page"
        );

        let header_page_id = {
            let header_basic = bpm.new_page_guarded()?;
            let page_id = header_basic.page_id();
            let mut header_guard = header_basic.upgrade_write();

            let header = HashTableHeaderPage::init(header_max_depth);
            header.encode(header_guard.data_mut());
            page_id
        };

        Some(Self {
            bpm,
            cmp,
            hash_fn,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            _marker: PhantomData,
        })
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Inserts a unique key. `false` on a duplicate, on pool exhaustion,
    /// or when the routed bucket is full and its directory cannot grow.
    pub fn insert(&self, key: &K, value: &V) -> bool {
        let hash = self.hash_fn.hash_key(key);
        let bpm = self.bpm.as_ref();

        let Some(mut header_guard) = bpm.fetch_page_write(self.header_page_id) else {
            return false;
        };
        let mut header = HashTableHeaderPage::decode(header_guard.data());
        let directory_idx = header.hash_to_directory_index(hash);
        let directory_page_id = header.directory_page_id(directory_idx);

        if directory_page_id == INVALID_PAGE_ID {
            return self.insert_to_new_directory(
                &mut header_guard,
                &mut header,
                directory_idx,
                key,
                value,
            );
        }

        let Some(mut directory_guard) = bpm.fetch_page_write(directory_page_id) else {
            return false;
        };
        let mut directory = HashTableDirectoryPage::decode(directory_guard.data());

        let mut bucket_idx = directory.hash_to_bucket_index(hash);
        let mut bucket_page_id = directory.bucket_page_id(bucket_idx);
        let Some(mut bucket_guard) = bpm.fetch_page_write(bucket_page_id) else {
            return false;
        };
        let mut bucket = HashTableBucketPage::<K, V>::decode(bucket_guard.data());

        if !bucket.is_full() {
            let inserted = bucket.insert(key.clone(), value.clone(), &self.cmp);
            if inserted {
                bucket.encode(bucket_guard.data_mut());
            }
            return inserted;
        }

        // Duplicates are rejected before any structural change.
        if bucket.lookup(key, &self.cmp).is_some() {
            return false;
        }

        // Split until the routed bucket has room. With adversarial hashing
        // one split may move every entry to the same side, so this loops.
        loop {
            let local_depth = directory.local_depth(bucket_idx);
            if local_depth == directory.global_depth()
                && directory.global_depth() == directory.max_depth()
            {
                // Keep the structural changes of earlier rounds.
                directory.encode(directory_guard.data_mut());
                bucket.encode(bucket_guard.data_mut());
                return false;
            }

            let Some(new_bucket_basic) = bpm.new_page_guarded() else {
                directory.encode(directory_guard.data_mut());
                bucket.encode(bucket_guard.data_mut());
                return false;
            };
            let new_bucket_page_id = new_bucket_basic.page_id();
            let mut new_bucket_guard = new_bucket_basic.upgrade_write();
            let mut new_bucket = HashTableBucketPage::<K, V>::init(self.bucket_max_size);

            if local_depth == directory.global_depth() {
                directory.incr_local_depth(bucket_idx);
                directory.incr_global_depth();
            } else {
                directory.incr_local_depth(bucket_idx);
            }

            let new_local_depth = directory.local_depth(bucket_idx);
            let new_mask = directory.local_depth_mask(bucket_idx);
            let new_bucket_idx = bucket_idx ^ (1 << (new_local_depth - 1));

            trace!(
                "splitting bucket page {} at depth {} into page {}",
                bucket_page_id,
                new_local_depth,
                new_bucket_page_id
            );

            Self::update_directory_mapping(
                &mut directory,
                bucket_idx,
                bucket_page_id,
                new_bucket_page_id,
                new_local_depth,
            );
            self.migrate_entries(&mut bucket, &mut new_bucket, new_bucket_idx, new_mask);

            let routes_to_new = (hash & new_mask) == (new_bucket_idx & new_mask);
            let target_full = if routes_to_new {
                new_bucket.is_full()
            } else {
                bucket.is_full()
            };

            if !target_full {
                if routes_to_new {
                    new_bucket.insert(key.clone(), value.clone(), &self.cmp);
                } else {
                    bucket.insert(key.clone(), value.clone(), &self.cmp);
                }
                bucket.encode(bucket_guard.data_mut());
                new_bucket.encode(new_bucket_guard.data_mut());
                directory.encode(directory_guard.data_mut());
                return true;
            }

            // The crowded side is split again next round; the other side
            // is final, persist it now.
            if routes_to_new {
                bucket.encode(bucket_guard.data_mut());
                bucket_guard = new_bucket_guard;
                bucket = new_bucket;
                bucket_page_id = new_bucket_page_id;
            } else {
                new_bucket.encode(new_bucket_guard.data_mut());
            }
            bucket_idx = directory.hash_to_bucket_index(hash);
        }
    }

    /// All values stored under `key` (zero or one, keys being unique).
    pub fn get_value(&self, key: &K) -> Vec<V> {
        let hash = self.hash_fn.hash_key(key);
        let bpm = self.bpm.as_ref();

        let Some(header_guard) = bpm.fetch_page_read(self.header_page_id) else {
            return Vec::new();
        };
        let header = HashTableHeaderPage::decode(header_guard.data());
        let directory_page_id = header.directory_page_id(header.hash_to_directory_index(hash));
        drop(header_guard);

        if directory_page_id == INVALID_PAGE_ID {
            return Vec::new();
        }

        let Some(directory_guard) = bpm.fetch_page_read(directory_page_id) else {
            return Vec::new();
        };
        let directory = HashTableDirectoryPage::decode(directory_guard.data());
        let bucket_page_id = directory.bucket_page_id(directory.hash_to_bucket_index(hash));
        drop(directory_guard);

        let Some(bucket_guard) = bpm.fetch_page_read(bucket_page_id) else {
            return Vec::new();
        };
        let bucket = HashTableBucketPage::<K, V>::decode(bucket_guard.data());

        match bucket.lookup(key, &self.cmp) {
            Some(value) => vec![value.clone()],
            None => Vec::new(),
        }
    }

    /// Removes `key`. The emptied bucket is left in place.
    pub fn remove(&self, key: &K) -> bool {
        let hash = self.hash_fn.hash_key(key);
        let bpm = self.bpm.as_ref();

        let Some(header_guard) = bpm.fetch_page_read(self.header_page_id) else {
            return false;
        };
        let header = HashTableHeaderPage::decode(header_guard.data());
        let directory_page_id = header.directory_page_id(header.hash_to_directory_index(hash));
        drop(header_guard);

        if directory_page_id == INVALID_PAGE_ID {
            return false;
        }

        let Some(directory_guard) = bpm.fetch_page_read(directory_page_id) else {
            return false;
        };
        let directory = HashTableDirectoryPage::decode(directory_guard.data());
        let bucket_page_id = directory.bucket_page_id(directory.hash_to_bucket_index(hash));
        drop(directory_guard);

        let Some(mut bucket_guard) = bpm.fetch_page_write(bucket_page_id) else {
            return false;
        };
        let mut bucket = HashTableBucketPage::<K, V>::decode(bucket_guard.data());

        let removed = bucket.remove(key, &self.cmp);
        if removed {
            bucket.encode(bucket_guard.data_mut());
        }
        removed
    }

    /// Walks every allocated directory and asserts its structural
    /// invariants. Test support.
    pub fn verify_integrity(&self) {
        let bpm = self.bpm.as_ref();

        let header_guard = bpm
            .fetch_page_read(self.header_page_id)
            .expect("header page unavailable");
        let header = HashTableHeaderPage::decode(header_guard.data());
        drop(header_guard);

        for directory_idx in 0..header.max_size() {
            let directory_page_id = header.directory_page_id(directory_idx);
            if directory_page_id == INVALID_PAGE_ID {
                continue;
            }

            let directory_guard = bpm
                .fetch_page_read(directory_page_id)
                .expect("directory page unavailable");
            HashTableDirectoryPage::decode(directory_guard.data()).verify_integrity();
        }
    }

    // First insert routed to an unallocated header slot: materialize a
    // directory at depth 0 with a single bucket at local depth 0.
    fn insert_to_new_directory(
        &self,
        header_guard: &mut WriteGuard<'_>,
        header: &mut HashTableHeaderPage,
        directory_idx: u32,
        key: &K,
        value: &V,
    ) -> bool {
        let bpm = self.bpm.as_ref();

        let Some(directory_basic) = bpm.new_page_guarded() else {
            return false;
        };
        let directory_page_id = directory_basic.page_id();
        let mut directory_guard = directory_basic.upgrade_write();
        let mut directory = HashTableDirectoryPage::init(self.directory_max_depth);

        if !self.insert_to_new_bucket(&mut directory, 0, key, value) {
            return false;
        }

        directory.encode(directory_guard.data_mut());
        header.set_directory_page_id(directory_idx, directory_page_id);
        header.encode(header_guard.data_mut());
        true
    }

    fn insert_to_new_bucket(
        &self,
        directory: &mut HashTableDirectoryPage,
        bucket_idx: u32,
        key: &K,
        value: &V,
    ) -> bool {
        let bpm = self.bpm.as_ref();

        let Some(bucket_basic) = bpm.new_page_guarded() else {
            return false;
        };
        let bucket_page_id = bucket_basic.page_id();
        let mut bucket_guard = bucket_basic.upgrade_write();

        let mut bucket = HashTableBucketPage::<K, V>::init(self.bucket_max_size);
        if !bucket.insert(key.clone(), value.clone(), &self.cmp) {
            return false;
        }
        bucket.encode(bucket_guard.data_mut());

        directory.set_bucket_page_id(bucket_idx, bucket_page_id);
        directory.set_local_depth(bucket_idx, 0);
        true
    }

    // Rewrites every slot aliasing the bucket that just split: all of them
    // take the new local depth, and the half on the split-image side of
    // bit (depth - 1) is repointed at the new bucket page.
    fn update_directory_mapping(
        directory: &mut HashTableDirectoryPage,
        old_bucket_idx: u32,
        old_bucket_page_id: PageId,
        new_bucket_page_id: PageId,
        new_local_depth: u32,
    ) {
        let split_bit = 1u32 << (new_local_depth - 1);

        for idx in 0..directory.size() {
            if directory.bucket_page_id(idx) != old_bucket_page_id {
                continue;
            }

            directory.set_local_depth(idx, new_local_depth as u8);
            if (idx & split_bit) != (old_bucket_idx & split_bit) {
                directory.set_bucket_page_id(idx, new_bucket_page_id);
            }
        }
    }

    // Moves every entry routed to the split image under the new mask.
    fn migrate_entries(
        &self,
        old_bucket: &mut HashTableBucketPage<K, V>,
        new_bucket: &mut HashTableBucketPage<K, V>,
        new_bucket_idx: u32,
        mask: u32,
    ) {
        let target = new_bucket_idx & mask;

        let mut idx = 0;
        while idx < old_bucket.size() {
            if self.hash_fn.hash_key(old_bucket.key_at(idx)) & mask == target {
                let (key, value) = old_bucket.remove_at(idx);
                new_bucket.insert(key, value, &self.cmp);
            } else {
                idx += 1;
            }
        }
    }
}
