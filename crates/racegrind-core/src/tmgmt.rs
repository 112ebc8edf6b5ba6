use std::{collections::HashMap, sync::OnceLock};

use anyhow::{Error, anyhow, bail};
use parking_lot::Mutex;
use race_events::ThreadId;

/// Correlates logical thread ids with the native handles of the analyzed
/// program.
#[derive(Default)]
pub struct NativeThreads {
    pthread_self: OnceLock<u64>,
    handles: Mutex<HashMap<u64, ThreadId>>,
}

impl NativeThreads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the address of the real `pthread_self`.
    ///
    /// Only the first resolution counts. Later images that carry their own
    /// copy are ignored.
    ///
    /// # Errors
    ///
    /// Fails if `address` is zero.
    pub fn resolve_pthread_self(&self, address: u64) -> Result<(), Error> {
        if address == 0 {
            bail!("pthread_self resolved to an invalid address")
        }

        self.pthread_self.get_or_init(|| address);
        Ok(())
    }

    /// Returns the address of the real `pthread_self`.
    ///
    /// # Errors
    ///
    /// Fails if no loaded image provided `pthread_self` so far.
    pub fn pthread_self(&self) -> Result<u64, Error> {
        self.pthread_self
            .get()
            .copied()
            .ok_or(anyhow!("pthread_self has not been resolved"))
    }

    pub fn register(&self, handle: u64, tid: ThreadId) {
        self.handles.lock().insert(handle, tid);
    }

    pub fn lookup(&self, handle: u64) -> Option<ThreadId> {
        self.handles.lock().get(&handle).copied()
    }
}
