use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use crate::{
    buffer::buffer_pool_manager::{BufferPoolManager, FrameHeader},
    common::config::PageId,
};

/// Scoped handle on a pinned page.
///
/// The pin was taken by the buffer pool operation that built the guard;
/// dropping the guard gives it back exactly once, marking the page dirty
/// iff a mutable accessor was used. Guards are move-only and a moved-from
/// guard is inert, so a double unpin cannot be expressed.
///
/// The basic guard holds no latch: `data`/`data_mut` latch the frame for
/// the duration of the call only. Upgrading consumes the guard and hands
/// the pin to a latched variant.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: &'a FrameHeader,
    page_id: PageId,
    is_dirty: bool,
    active: bool,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame: &'a FrameHeader,
        page_id: PageId,
    ) -> Self {
        Self {
            bpm,
            frame,
            page_id,
            is_dirty: false,
            active: true,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.frame.data.read().unwrap()
    }

    pub fn data_mut(&mut self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.is_dirty = true;
        self.frame.data.write().unwrap()
    }

    /// Takes the shared page latch and transfers the pin.
    pub fn upgrade_read(mut self) -> ReadGuard<'a> {
        let (bpm, frame, page_id, is_dirty) = (self.bpm, self.frame, self.page_id, self.is_dirty);
        self.active = false;
        drop(self);

        ReadGuard {
            bpm,
            page_id,
            is_dirty,
            data: Some(frame.data.read().unwrap()),
        }
    }

    /// Takes the exclusive page latch and transfers the pin.
    pub fn upgrade_write(mut self) -> WriteGuard<'a> {
        let (bpm, frame, page_id, is_dirty) = (self.bpm, self.frame, self.page_id, self.is_dirty);
        self.active = false;
        drop(self);

        WriteGuard {
            bpm,
            page_id,
            is_dirty,
            data: Some(frame.data.write().unwrap()),
        }
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            self.bpm.unpin_page(self.page_id, self.is_dirty);
        }
    }
}

/// Pinned page held under the shared latch. Readers may coexist; writers
/// are excluded for the guard's whole lifetime.
pub struct ReadGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    is_dirty: bool,
    data: Option<RwLockReadGuard<'a, Box<[u8]>>>,
}

impl ReadGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref().unwrap()
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        // Latch first, pin second.
        self.data.take();
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

/// Pinned page held under the exclusive latch.
pub struct WriteGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    is_dirty: bool,
    data: Option<RwLockWriteGuard<'a, Box<[u8]>>>,
}

impl WriteGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref().unwrap()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        self.data.as_mut().unwrap()
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.data.take();
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}
