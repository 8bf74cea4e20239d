pub mod test {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::{
        buffer::buffer_pool_manager::BufferPoolManager,
        common::config::INVALID_PAGE_ID,
        container::hash::extendible_hash_table::DiskExtendibleHashTable,
        storage::{
            disk::manager::DiskManager,
            index::key::{Crc32Hasher, IdentityHasher, OrdComparator, Rid},
            page::{
                hash_table_directory_page::HashTableDirectoryPage,
                hash_table_header_page::HashTableHeaderPage,
            },
        },
    };

    type IdentityTable = DiskExtendibleHashTable<u32, u32, OrdComparator<u32>, IdentityHasher>;

    fn setup(pool_size: usize) -> (TempDir, Arc<BufferPoolManager>) {
        let _ = env_logger::builder().is_test(true).try_init();

        let dir = TempDir::new().unwrap();
        let disk_manager = Arc::new(DiskManager::new(dir.path().join("test.db")).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(pool_size, disk_manager, 2));
        (dir, bpm)
    }

    fn identity_table(
        bpm: &Arc<BufferPoolManager>,
        header_depth: u32,
        directory_depth: u32,
        bucket_size: u32,
    ) -> IdentityTable {
        DiskExtendibleHashTable::new(
            Arc::clone(bpm),
            OrdComparator::default(),
            IdentityHasher,
            header_depth,
            directory_depth,
            bucket_size,
        )
        .unwrap()
    }

    // Snapshot of the directory that serves hashes with top bits = 0.
    fn first_directory(bpm: &BufferPoolManager, table: &IdentityTable) -> HashTableDirectoryPage {
        let header_guard = bpm.fetch_page_read(table.header_page_id()).unwrap();
        let header = HashTableHeaderPage::decode(header_guard.data());
        let directory_page_id = header.directory_page_id(0);
        drop(header_guard);

        assert_ne!(directory_page_id, INVALID_PAGE_ID);
        let directory_guard = bpm.fetch_page_read(directory_page_id).unwrap();
        HashTableDirectoryPage::decode(directory_guard.data())
    }

    #[test]
    fn insert_then_lookup_then_remove() {
        let (_dir, bpm) = setup(16);
        let table = identity_table(&bpm, 2, 3, 4);

        assert!(table.insert(&1, &10));
        assert!(table.insert(&2, &20));

        assert_eq!(table.get_value(&1), vec![10]);
        assert_eq!(table.get_value(&2), vec![20]);
        assert_eq!(table.get_value(&3), Vec::<u32>::new());

        assert!(table.remove(&1));
        assert_eq!(table.get_value(&1), Vec::<u32>::new());
        assert_eq!(table.get_value(&2), vec![20]);

        assert!(!table.remove(&1), "already removed");
        assert!(!table.remove(&3), "never inserted");
        table.verify_integrity();
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let (_dir, bpm) = setup(16);
        let table = identity_table(&bpm, 2, 3, 2);

        assert!(table.insert(&7, &70));
        assert!(!table.insert(&7, &71), "duplicate in a bucket with room");
        assert_eq!(table.get_value(&7), vec![70]);

        // Fill the bucket so the duplicate check happens on the split path.
        assert!(table.insert(&15, &150));
        assert!(!table.insert(&7, &72), "duplicate in a full bucket");
        assert_eq!(table.get_value(&7), vec![70]);
        table.verify_integrity();
    }

    #[test]
    fn overflow_splits_the_bucket_by_the_low_bit() {
        let (_dir, bpm) = setup(16);
        let table = identity_table(&bpm, 2, 3, 2);

        // All three keys carry zero top bits, so one directory serves them.
        assert!(table.insert(&1, &0xA1));
        assert!(table.insert(&5, &0xA5));
        assert!(table.insert(&9, &0xA9));

        for key in [1u32, 5, 9] {
            assert_eq!(table.get_value(&key), vec![0xA0 + key], "key {}", key);
        }

        let directory = first_directory(&bpm, &table);
        assert!(directory.global_depth() >= 1, "the directory grew");
        directory.verify_integrity();

        // Distinct routes exist for the two low-bit classes once depth > 0.
        let even_bucket = directory.bucket_page_id(directory.hash_to_bucket_index(0));
        let odd_bucket = directory.bucket_page_id(directory.hash_to_bucket_index(1));
        assert_ne!(even_bucket, odd_bucket);
    }

    #[test]
    fn unsplittable_keys_saturate_the_directory() {
        let (_dir, bpm) = setup(32);
        let table = identity_table(&bpm, 0, 3, 2);

        // Identical low-3 bits everywhere: splitting can never separate
        // these, so the third insert drives the directory to max depth and
        // fails.
        assert!(table.insert(&0, &1));
        assert!(table.insert(&8, &2));
        assert!(!table.insert(&16, &3));

        assert_eq!(table.get_value(&0), vec![1]);
        assert_eq!(table.get_value(&8), vec![2]);
        assert_eq!(table.get_value(&16), Vec::<u32>::new());
        table.verify_integrity();

        let directory = first_directory(&bpm, &table);
        assert_eq!(directory.global_depth(), 3, "growth stopped at max depth");
    }

    #[test]
    fn repeated_splits_eventually_separate_skewed_keys() {
        let (_dir, bpm) = setup(32);
        let table = identity_table(&bpm, 0, 4, 2);

        // 0, 8 and 16 share their low three bits; only the fourth bit
        // tells 8 apart, so the insert of 16 must split four times.
        assert!(table.insert(&0, &1));
        assert!(table.insert(&8, &2));
        assert!(table.insert(&16, &3));

        assert_eq!(table.get_value(&0), vec![1]);
        assert_eq!(table.get_value(&8), vec![2]);
        assert_eq!(table.get_value(&16), vec![3]);
        table.verify_integrity();

        let directory = first_directory(&bpm, &table);
        assert_eq!(directory.global_depth(), 4);
    }

    #[test]
    fn the_sixty_fifth_insert_fails_and_loses_nothing() {
        let (_dir, bpm) = setup(64);
        let table = identity_table(&bpm, 2, 3, 2);

        // Four directories (top two bits) times eight buckets (low three
        // bits) times capacity two: 64 keys fill the table completely.
        let mut keys = Vec::new();
        for top in 0..4u32 {
            for low in 0..8u32 {
                for mid in 0..2u32 {
                    keys.push((top << 30) | (mid << 3) | low);
                }
            }
        }
        assert_eq!(keys.len(), 64);

        for &key in &keys {
            assert!(table.insert(&key, &key), "insert of {:#x}", key);
        }

        // Any further key collides in a saturated bucket.
        assert!(!table.insert(&(1 << 4), &0), "table is full");

        for &key in &keys {
            assert_eq!(table.get_value(&key), vec![key], "lookup of {:#x}", key);
        }
        assert_eq!(table.get_value(&(1 << 4)), Vec::<u32>::new());
        table.verify_integrity();
    }

    #[test]
    fn mapping_invariant_under_churn_with_real_hashing() {
        let (_dir, bpm) = setup(128);
        let table = DiskExtendibleHashTable::<i32, Rid, _, _>::new(
            Arc::clone(&bpm),
            OrdComparator::default(),
            Crc32Hasher,
            1,
            9,
            8,
        )
        .unwrap();

        for key in 0..200i32 {
            assert!(table.insert(&key, &Rid::new(key as u32, 0)), "insert {}", key);
        }
        table.verify_integrity();

        for key in 0..200i32 {
            assert_eq!(table.get_value(&key), vec![Rid::new(key as u32, 0)]);
        }

        // Remove the even half and make sure only it disappears.
        for key in (0..200i32).step_by(2) {
            assert!(table.remove(&key));
        }
        for key in 0..200i32 {
            if key % 2 == 0 {
                assert_eq!(table.get_value(&key), Vec::<Rid>::new());
            } else {
                assert_eq!(table.get_value(&key), vec![Rid::new(key as u32, 0)]);
            }
        }

        // Removed keys can come back with fresh values.
        for key in (0..200i32).step_by(2) {
            assert!(table.insert(&key, &Rid::new(key as u32, 1)));
        }
        for key in (0..200i32).step_by(2) {
            assert_eq!(table.get_value(&key), vec![Rid::new(key as u32, 1)]);
        }
        table.verify_integrity();
    }

    #[test]
    fn concurrent_inserts_from_disjoint_ranges() {
        let (_dir, bpm) = setup(128);
        let table = DiskExtendibleHashTable::<i32, Rid, _, _>::new(
            Arc::clone(&bpm),
            OrdComparator::default(),
            Crc32Hasher,
            1,
            9,
            8,
        )
        .unwrap();

        std::thread::scope(|scope| {
            for worker in 0..4i32 {
                let table = &table;
                scope.spawn(move || {
                    for key in (worker * 50)..(worker * 50 + 50) {
                        assert!(table.insert(&key, &Rid::new(key as u32, 0)));
                    }
                });
            }
        });

        for key in 0..200i32 {
            assert_eq!(table.get_value(&key), vec![Rid::new(key as u32, 0)]);
        }
        table.verify_integrity();
    }
}
