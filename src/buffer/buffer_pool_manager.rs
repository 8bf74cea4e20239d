use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, RwLock},
};

use hashlink::LinkedHashMap;

use crate::{
    buffer::replacer::{LRUKReplacer, Replacer},
    common::config::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE},
    storage::{
        disk::{
            manager::DiskManager,
            scheduler::{DiskData, DiskRequest, DiskScheduler},
        },
        page::page_guard::{PageGuard, ReadGuard, WriteGuard},
    },
};

/// One preallocated slot of the buffer pool. The buffer is reused across
/// logical pages; the `RwLock` doubles as the per-page reader/writer latch.
pub struct FrameHeader {
    pub(crate) data: RwLock<Box<[u8]>>,
}

impl FrameHeader {
    fn new() -> Self {
        Self {
            data: RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()),
        }
    }
}

// Bookkeeping for the page currently held by a frame. Guarded by the pool
// mutex, never by the page latch.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolState {
    // Covers exactly the frames holding a resident page.
    page_table: LinkedHashMap<PageId, FrameId>,
    // Frames holding no logical page.
    free_frames: VecDeque<FrameId>,
    metas: Vec<FrameMeta>,
    next_page_id: PageId,
}

/// Fixed-size page cache over a single disk file.
///
/// All page acquisition goes through here. One mutex guards the page
/// table, free list and per-frame pin counts / dirty bits; page latches
/// are only ever taken by guard constructors after that mutex is
/// released.
pub struct BufferPoolManager {
    num_frames: usize,
    frames: Vec<FrameHeader>,
    state: Mutex<PoolState>,

    // The replacer carries its own lock and is always called while the
    // pool mutex is held.
    replacer: LRUKReplacer,
    disk_scheduler: DiskScheduler,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(num_frames: usize, disk_manager: Arc<DiskManager>, replacer_k: usize) -> Self {
        let frames = (0..num_frames).map(|_| FrameHeader::new()).collect();

        let metas = (0..num_frames)
            .map(|_| FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            })
            .collect();

        // Initially every frame is free.
        let free_frames = (0..num_frames as FrameId).collect();

        Self {
            num_frames,
            frames,
            state: Mutex::new(PoolState {
                page_table: LinkedHashMap::new(),
                free_frames,
                metas,
                next_page_id: 0,
            }),
            replacer: LRUKReplacer::new(num_frames, replacer_k),
            disk_scheduler: DiskScheduler::new(Arc::clone(&disk_manager)),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.num_frames
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Creates a brand-new zeroed page, pinned once. `None` when every
    /// frame is pinned.
    pub fn new_page(&self) -> Option<PageId> {
        self.new_frame().map(|(page_id, _)| page_id)
    }

    /// `new_page`, wrapped in a guard that unpins on drop.
    pub fn new_page_guarded(&self) -> Option<PageGuard<'_>> {
        let (page_id, frame_id) = self.new_frame()?;
        Some(PageGuard::new(self, &self.frames[frame_id as usize], page_id))
    }

    pub fn fetch_page_basic(&self, page_id: PageId) -> Option<PageGuard<'_>> {
        let frame_id = self.fetch_frame(page_id)?;
        Some(PageGuard::new(self, &self.frames[frame_id as usize], page_id))
    }

    pub fn fetch_page_read(&self, page_id: PageId) -> Option<ReadGuard<'_>> {
        Some(self.fetch_page_basic(page_id)?.upgrade_read())
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> Option<WriteGuard<'_>> {
        Some(self.fetch_page_basic(page_id)?.upgrade_write())
    }

    /// Drops one pin. The dirty flag is OR-combined: a clean unpin never
    /// clears a previously set dirty bit. Fails on an unknown page or a
    /// page that is not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock().unwrap();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let meta = &mut state.metas[frame_id as usize];
        if meta.pin_count == 0 {
            return false;
        }

        meta.pin_count -= 1;
        meta.is_dirty |= is_dirty;

        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes the page back to disk and clears its dirty bit. The page
    /// stays resident.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        assert!(page_id != INVALID_PAGE_ID, "flushing the invalid page id");

        let mut state = self.state.lock().unwrap();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        self.flush_frame(&mut state, frame_id);
        true
    }

    /// Flushes every resident page, in residency order.
    pub fn flush_all_pages(&self) {
        let mut state = self.state.lock().unwrap();

        let frame_ids: Vec<FrameId> = state.page_table.values().copied().collect();
        for frame_id in frame_ids {
            self.flush_frame(&mut state, frame_id);
        }
    }

    /// Drops a page from the pool. Succeeds trivially when the page is not
    /// resident, fails when it is pinned. Disk space is not reclaimed.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock().unwrap();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };

        let meta = &state.metas[frame_id as usize];
        if meta.pin_count > 0 {
            return false;
        }
        if meta.is_dirty {
            self.flush_frame(&mut state, frame_id);
        }

        self.frames[frame_id as usize].data.write().unwrap().fill(0);

        state.page_table.remove(&page_id);
        self.replacer.remove(frame_id);

        let meta = &mut state.metas[frame_id as usize];
        meta.page_id = INVALID_PAGE_ID;
        meta.is_dirty = false;

        state.free_frames.push_back(frame_id);
        true
    }

    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock().unwrap();
        let &frame_id = state.page_table.get(&page_id)?;
        Some(state.metas[frame_id as usize].pin_count)
    }

    // Monotonic page id allocation; disk offsets follow directly from it.
    fn allocate_page(state: &mut PoolState) -> PageId {
        let page_id = state.next_page_id;
        state.next_page_id += 1;
        page_id
    }

    /// Picks a frame for a new resident page: the free list first,
    /// otherwise an eviction victim (flushed if dirty, its stale mapping
    /// removed).
    fn acquire_frame(&self, state: &mut PoolState) -> Option<FrameId> {
        if let Some(frame_id) = state.free_frames.pop_front() {
            return Some(frame_id);
        }

        let frame_id = self.replacer.evict()?;

        if state.metas[frame_id as usize].is_dirty {
            self.flush_frame(state, frame_id);
        }
        let old_page_id = state.metas[frame_id as usize].page_id;
        state.page_table.remove(&old_page_id);

        Some(frame_id)
    }

    fn new_frame(&self) -> Option<(PageId, FrameId)> {
        let mut state = self.state.lock().unwrap();

        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = Self::allocate_page(&mut state);

        // No guard can reference this frame any more, so the latch is free.
        self.frames[frame_id as usize].data.write().unwrap().fill(0);

        let meta = &mut state.metas[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Some((page_id, frame_id))
    }

    /// Pins `page_id` into a frame, reading it from disk on a miss.
    fn fetch_frame(&self, page_id: PageId) -> Option<FrameId> {
        let mut state = self.state.lock().unwrap();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            // Resident: the dirty bit is left untouched.
            state.metas[frame_id as usize].pin_count += 1;
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Some(frame_id);
        }

        let frame_id = self.acquire_frame(&mut state)?;

        let buffer = Arc::new(Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()));
        let (done, promise) = DiskScheduler::create_promise();
        self.disk_scheduler.schedule(DiskRequest {
            is_write: false,
            data: DiskData::Read(Arc::clone(&buffer)),
            page_id,
            done,
        });
        let _ = promise.recv();

        self.frames[frame_id as usize]
            .data
            .write()
            .unwrap()
            .copy_from_slice(&buffer.lock().unwrap());

        let meta = &mut state.metas[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Some(frame_id)
    }

    // Synchronous write-back of one frame through the scheduler. Clears
    // the dirty bit.
    fn flush_frame(&self, state: &mut PoolState, frame_id: FrameId) {
        let page_id = state.metas[frame_id as usize].page_id;
        debug_assert!(page_id != INVALID_PAGE_ID, "flushing a free frame");

        let page_data = self.frames[frame_id as usize].data.read().unwrap().clone();

        let (done, promise) = DiskScheduler::create_promise();
        self.disk_scheduler.schedule(DiskRequest {
            is_write: true,
            data: DiskData::Write(page_data),
            page_id,
            done,
        });
        let _ = promise.recv();

        state.metas[frame_id as usize].is_dirty = false;
    }
}
