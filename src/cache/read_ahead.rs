//! Read-ahead worker
//!
//! One background thread drains a bounded queue of page addresses and loads
//! each into the pool unpinned. Submission never blocks: when the queue is full
//! the instruction is dropped.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crate::Result;

pub(crate) struct ReadAhead {
    sender: RwLock<Option<Sender<u64>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReadAhead {
    /// Spawn the worker; `load` is called once per received address
    pub fn start<F>(capacity: usize, load: F) -> Result<Self>
    where
        F: Fn(u64) + Send + 'static,
    {
        let (sender, receiver): (Sender<u64>, Receiver<u64>) = channel::bounded(capacity.max(1));
        let handle = thread::Builder::new()
            .name("revdex-read-ahead".to_string())
            .spawn(move || {
                log::debug!("read-ahead thread started");
                for address in receiver.iter() {
                    load(address);
                }
                log::debug!("read-ahead thread stopped");
            })?;

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue an address; false if the queue was full or the worker stopped
    pub fn submit(&self, address: u64) -> bool {
        match self.sender.read().as_ref() {
            Some(sender) => match sender.try_send(address) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
            },
            None => false,
        }
    }

    /// Close the queue and join the worker; idempotent
    pub fn shutdown(&self) {
        // Dropping the last sender ends the worker's receive loop
        self.sender.write().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                log::warn!("read-ahead thread panicked");
            }
        }
    }
}

impl Drop for ReadAhead {
    fn drop(&mut self) {
        self.shutdown();
    }
}
