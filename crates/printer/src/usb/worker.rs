//! Background transfer worker
//!
//! Bulk transfers to a printer can take a long time, so they never run on
//! the caller's thread. The manager hands each payload to a dedicated worker
//! thread and returns immediately. The worker performs the transfer and logs
//! the outcome; nothing is reported back to the submitter.

use async_channel::{Receiver, Sender, unbounded};
use common::DeviceLink;
use protocol::UsbError;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Device handle shared by the manager and the transfers queued on it
///
/// `close` takes the handle out of the slot. Transfers that start afterwards
/// fail with `UsbError::NoDevice` and never reach the device.
pub struct SharedLink {
    slot: RwLock<Option<Box<dyn DeviceLink>>>,
}

impl SharedLink {
    pub fn new(link: Box<dyn DeviceLink>) -> Self {
        Self {
            slot: RwLock::new(Some(link)),
        }
    }

    /// Write to a bulk OUT endpoint of the open handle
    pub fn bulk_out(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, UsbError> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(link) => link.bulk_out(endpoint, data, timeout),
            None => Err(UsbError::NoDevice),
        }
    }

    /// Release `interface` and close the handle
    ///
    /// Waits for a transfer already running on the handle; queued ones are
    /// left to fail. Returns `None` when the link was already closed.
    pub fn close(&self, interface: u8) -> Option<Result<(), UsbError>> {
        let mut link = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        let result = link.release_interface(interface);
        drop(link);
        Some(result)
    }

    pub fn is_closed(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// One queued bulk OUT transfer
///
/// Holds its own reference to the link. A close or detach empties the link,
/// so a job still queued at that point is dropped without touching the
/// device.
pub struct TransferJob {
    pub link: Arc<SharedLink>,
    pub endpoint: u8,
    pub payload: Vec<u8>,
    pub timeout: Duration,
    /// Device name, for logging
    pub device_name: String,
}

/// Handle to the transfer worker thread
pub struct TransferWorker {
    jobs: Sender<TransferJob>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TransferWorker {
    /// Spawn the worker thread
    pub fn spawn() -> std::io::Result<Self> {
        let (jobs, queue) = unbounded();

        let thread = std::thread::Builder::new()
            .name("usb-transfer".to_string())
            .spawn(move || run(queue))?;

        Ok(Self {
            jobs,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Queue a transfer without waiting for it
    pub fn submit(&self, job: TransferJob) -> common::Result<()> {
        self.jobs
            .try_send(job)
            .map_err(|e| common::Error::Channel(e.to_string()))
    }

    /// Number of transfers waiting to start
    pub fn queued(&self) -> usize {
        self.jobs.len()
    }

    /// Stop accepting transfers and wait for the queued ones to finish
    pub fn shutdown(&self) {
        self.jobs.close();

        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(thread) = thread
            && thread.join().is_err()
        {
            error!("USB transfer worker panicked");
        }
    }
}

impl Drop for TransferWorker {
    fn drop(&mut self) {
        // Let the thread exit after draining; do not block the dropping thread.
        self.jobs.close();
    }
}

fn run(queue: Receiver<TransferJob>) {
    info!("USB transfer worker started");

    while let Ok(job) = queue.recv_blocking() {
        // Keep a panicking backend from taking the worker down with it
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| execute(job)));
        if let Err(e) = result {
            error!("Panic in USB transfer: {:?}", e);
        }
    }

    info!("USB transfer worker stopped");
}

/// Perform one transfer and log its status
///
/// Partial transfers are logged, not retried.
fn execute(job: TransferJob) {
    if job.link.is_closed() {
        debug!(
            "Dropping transfer to {}: connection was closed",
            job.device_name
        );
        return;
    }

    let len = job.payload.len();
    debug!(
        "Bulk transfer to {}: endpoint={:#04x}, data_len={}, timeout={}s",
        job.device_name,
        job.endpoint,
        len,
        job.timeout.as_secs()
    );

    match job.link.bulk_out(job.endpoint, &job.payload, job.timeout) {
        Ok(written) if written < len => {
            warn!(
                "Partial bulk transfer to {}: {} of {} bytes",
                job.device_name, written, len
            );
        }
        Ok(written) => {
            info!("Bulk transfer to {} complete: {} bytes", job.device_name, written);
        }
        Err(e) => {
            warn!("Bulk transfer to {} failed: {}", job.device_name, e);
        }
    }
}
