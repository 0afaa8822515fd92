use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{PageId, Result, StrataError, PAGE_SIZE};

use super::DiskManager;

/// A queued disk I/O request. Buffers are owned by the request so the
/// worker never touches caller memory; the completion channel carries the
/// read data (or the write acknowledgement) back.
enum DiskRequest {
    Read {
        page_id: PageId,
        completion: Sender<Result<Box<[u8; PAGE_SIZE]>>>,
    },
    Write {
        page_id: PageId,
        data: Box<[u8; PAGE_SIZE]>,
        completion: Sender<Result<()>>,
    },
}

/// DiskScheduler funnels page I/O through a background worker thread fed by
/// a bounded request queue. The buffer pool uses the synchronous wrappers,
/// which block until the worker signals completion.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_sender: Option<Sender<DiskRequest>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Spawns the worker thread processing requests against `disk_manager`.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);

        let dm = Arc::clone(&disk_manager);
        let worker_handle = thread::spawn(move || Self::run_worker(dm, receiver));

        Self {
            disk_manager,
            request_sender: Some(sender),
            worker_handle: Some(worker_handle),
        }
    }

    /// Schedules a read and blocks until the page data arrives.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);
        let (tx, rx) = bounded(1);
        self.submit(DiskRequest::Read {
            page_id,
            completion: tx,
        })?;
        let page = rx
            .recv()
            .map_err(|e| StrataError::DiskScheduler(format!("read completion lost: {}", e)))??;
        data.copy_from_slice(&page[..]);
        Ok(())
    }

    /// Schedules a write and blocks until the worker has written the page.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);
        let mut owned = Box::new([0u8; PAGE_SIZE]);
        owned.copy_from_slice(data);

        let (tx, rx) = bounded(1);
        self.submit(DiskRequest::Write {
            page_id,
            data: owned,
            completion: tx,
        })?;
        rx.recv()
            .map_err(|e| StrataError::DiskScheduler(format!("write completion lost: {}", e)))?
    }

    /// Returns the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    fn submit(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .as_ref()
            .expect("disk scheduler already shut down")
            .send(request)
            .map_err(|e| StrataError::DiskScheduler(format!("failed to schedule request: {}", e)))
    }

    /// Worker loop: drains the queue until every sender is dropped.
    fn run_worker(disk_manager: Arc<DiskManager>, receiver: Receiver<DiskRequest>) {
        while let Ok(request) = receiver.recv() {
            match request {
                DiskRequest::Read {
                    page_id,
                    completion,
                } => {
                    let mut page = Box::new([0u8; PAGE_SIZE]);
                    let result = disk_manager
                        .read_page(page_id, &mut page[..])
                        .map(|_| page);
                    let _ = completion.send(result);
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    completion,
                } => {
                    let _ = completion.send(disk_manager.write_page(page_id, &data[..]));
                }
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the channel stops the worker after it drains the queue.
        self.request_sender.take();
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_scheduler_read_write() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        scheduler
            .schedule_write_sync(PageId::new(1), &write_data)
            .unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        scheduler
            .schedule_read_sync(PageId::new(1), &mut read_data)
            .unwrap();

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
    }

    #[test]
    fn test_scheduler_many_requests() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        for i in 0..16u32 {
            let data = [i as u8; PAGE_SIZE];
            scheduler.schedule_write_sync(PageId::new(i), &data).unwrap();
        }
        for i in 0..16u32 {
            let mut data = [0u8; PAGE_SIZE];
            scheduler
                .schedule_read_sync(PageId::new(i), &mut data)
                .unwrap();
            assert_eq!(data[0], i as u8);
        }
    }
}
