use std::{
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread::JoinHandle,
};

use log::error;

use crate::common::config::PageId;
use crate::storage::disk::manager::DiskManager;

/// Payload of a disk request.
///
/// Writes carry their own copy of the page bytes; reads carry a shared
/// buffer the worker fills before signalling completion.
pub enum DiskData {
    Write(Box<[u8]>),
    Read(Arc<Mutex<Box<[u8]>>>),
}

/// A single read or write forwarded to the disk manager.
pub struct DiskRequest {
    /// Flag indicating whether the request is a write or a read.
    pub is_write: bool,

    pub data: DiskData,

    /// ID of the page being read from / written to disk.
    pub page_id: PageId,

    /// Completion signal, fulfilled by the worker once the disk call returns.
    pub done: Sender<bool>,
}

/// Serializes disk I/O behind a single background worker.
///
/// Requests are processed strictly in the order they were scheduled. The
/// queue carries `Option<DiskRequest>`; `None` is the shutdown sentinel,
/// enqueued by `Drop`, after which the worker is joined.
pub struct DiskScheduler {
    request_queue: Sender<Option<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (tx, rx) = mpsc::channel::<Option<DiskRequest>>();

        let worker = std::thread::spawn(move || Self::run_worker(disk_manager, rx));

        Self {
            request_queue: tx,
            worker: Some(worker),
        }
    }

    /// Creates the completion channel for a request. The caller keeps the
    /// receiver and blocks on it to observe ordering.
    pub fn create_promise() -> (Sender<bool>, Receiver<bool>) {
        mpsc::channel()
    }

    /// Enqueues a request for the background worker.
    pub fn schedule(&self, request: DiskRequest) {
        debug_assert_eq!(request.is_write, matches!(request.data, DiskData::Write(_)));

        self.request_queue
            .send(Some(request))
            .expect("disk scheduler worker is gone");
    }

    fn run_worker(manager: Arc<DiskManager>, rx: Receiver<Option<DiskRequest>>) {
        while let Ok(Some(request)) = rx.recv() {
            let outcome = match &request.data {
                DiskData::Write(page_data) => manager.write_page(request.page_id, page_data),
                DiskData::Read(buffer) => {
                    let mut buffer = buffer.lock().unwrap();
                    manager.read_page(request.page_id, &mut buffer)
                }
            };

            // Disk failures are diagnostics, not results; the requester is
            // unblocked either way.
            if let Err(err) = &outcome {
                error!("disk request for page {} failed: {:#}", request.page_id, err);
            }

            let _ = request.done.send(outcome.is_ok());
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        let _ = self.request_queue.send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
pub mod test {
    use std::sync::{Arc, Mutex};

    use tempfile::TempDir;

    use super::{DiskData, DiskRequest, DiskScheduler};
    use crate::common::config::PAGE_SIZE;
    use crate::storage::disk::manager::DiskManager;

    #[test]
    fn schedules_write_then_read() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(DiskManager::new(dir.path().join("test.db")).unwrap());
        let scheduler = DiskScheduler::new(Arc::clone(&manager));

        let data = [1u8; PAGE_SIZE];

        let (done, promise) = DiskScheduler::create_promise();
        scheduler.schedule(DiskRequest {
            is_write: true,
            data: DiskData::Write(Box::new(data)),
            page_id: 0,
            done,
        });
        assert!(promise.recv().unwrap());

        let buffer = Arc::new(Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()));
        let (done, promise) = DiskScheduler::create_promise();
        scheduler.schedule(DiskRequest {
            is_write: false,
            data: DiskData::Read(Arc::clone(&buffer)),
            page_id: 0,
            done,
        });
        assert!(promise.recv().unwrap());

        assert_eq!(&buffer.lock().unwrap()[..], &data[..], "page read mismatch");
    }

    #[test]
    fn requests_complete_in_fifo_order() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(DiskManager::new(dir.path().join("test.db")).unwrap());
        let scheduler = DiskScheduler::new(Arc::clone(&manager));

        // Several writes to distinct pages, then reads observing them.
        let mut promises = Vec::new();
        for page_id in 0..8u32 {
            let (done, promise) = DiskScheduler::create_promise();
            scheduler.schedule(DiskRequest {
                is_write: true,
                data: DiskData::Write(vec![page_id as u8; PAGE_SIZE].into_boxed_slice()),
                page_id,
                done,
            });
            promises.push(promise);
        }
        for promise in promises {
            assert!(promise.recv().unwrap());
        }

        for page_id in 0..8u32 {
            let buffer = Arc::new(Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()));
            let (done, promise) = DiskScheduler::create_promise();
            scheduler.schedule(DiskRequest {
                is_write: false,
                data: DiskData::Read(Arc::clone(&buffer)),
                page_id,
                done,
            });
            assert!(promise.recv().unwrap());
            assert!(buffer.lock().unwrap().iter().all(|&b| b == page_id as u8));
        }
    }

    #[test]
    fn drop_joins_the_worker() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(DiskManager::new(dir.path().join("test.db")).unwrap());

        let scheduler = DiskScheduler::new(Arc::clone(&manager));
        let (done, promise) = DiskScheduler::create_promise();
        scheduler.schedule(DiskRequest {
            is_write: true,
            data: DiskData::Write(vec![9u8; PAGE_SIZE].into_boxed_slice()),
            page_id: 1,
            done,
        });
        drop(scheduler);

        // The queued request was drained before shutdown.
        assert!(promise.recv().unwrap());
        assert_eq!(manager.num_writes(), 1);
    }
}
