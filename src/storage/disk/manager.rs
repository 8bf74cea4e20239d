use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
};

use anyhow::{Context, Result};
use log::debug;

use crate::common::config::{PageId, PAGE_SIZE};

/// Synchronous fixed-size page I/O against a single database file.
///
/// Every page lives at offset `page_id * PAGE_SIZE`. Reads past the end of
/// the file are not an error; the missing tail is zero-filled. Writes past
/// the end extend the file.
pub struct DiskManager {
    // All file access goes through this mutex.
    db_io: Mutex<File>,
    file_path: PathBuf,

    num_writes: AtomicU32,
    num_flushes: AtomicU32,
}

impl DiskManager {
    /// Opens the database file at `path`, creating it if it does not exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db_io = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("failed to open database file {}", path.display()))?;

        Ok(Self {
            db_io: Mutex::new(db_io),
            file_path: path.to_path_buf(),
            num_writes: AtomicU32::new(0),
            num_flushes: AtomicU32::new(0),
        })
    }

    /// Writes one page worth of data and syncs it to disk.
    pub fn write_page(&self, page_id: PageId, page_data: &[u8]) -> Result<()> {
        debug_assert_eq!(page_data.len(), PAGE_SIZE);

        let mut db_io = self.db_io.lock().unwrap();
        let offset = page_id as u64 * PAGE_SIZE as u64;

        self.num_writes.fetch_add(1, Ordering::Relaxed);

        db_io
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("I/O error while seeking page {}", page_id))?;
        db_io
            .write_all(page_data)
            .with_context(|| format!("I/O error while writing page {}", page_id))?;

        // Keep the disk file in sync with what callers observed as written.
        db_io
            .sync_data()
            .with_context(|| format!("error flushing page {}", page_id))?;
        self.num_flushes.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    /// Reads one page worth of data. A read past the end of the file
    /// zero-fills the remainder of `page_data` and succeeds.
    pub fn read_page(&self, page_id: PageId, page_data: &mut [u8]) -> Result<()> {
        debug_assert_eq!(page_data.len(), PAGE_SIZE);

        let mut db_io = self.db_io.lock().unwrap();
        let offset = page_id as u64 * PAGE_SIZE as u64;

        db_io
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("I/O error while seeking page {}", page_id))?;

        let mut total = 0;
        while total < PAGE_SIZE {
            let n = db_io
                .read(&mut page_data[total..])
                .with_context(|| format!("I/O error while reading page {}", page_id))?;
            if n == 0 {
                break;
            }
            total += n;
        }

        if total < PAGE_SIZE {
            debug!("short read of page {}, zero-filling {} bytes", page_id, PAGE_SIZE - total);
            page_data[total..].fill(0);
        }

        Ok(())
    }

    /// Current size of the backing file in bytes.
    pub fn file_size(&self) -> Result<u64> {
        let db_io = self.db_io.lock().unwrap();
        let metadata = db_io
            .metadata()
            .with_context(|| format!("failed to stat {}", self.file_path.display()))?;
        Ok(metadata.len())
    }

    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn num_flushes(&self) -> u32 {
        self.num_flushes.load(Ordering::Relaxed)
    }
}
