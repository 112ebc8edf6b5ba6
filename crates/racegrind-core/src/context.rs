use std::{collections::HashMap, sync::Arc};

use log::warn;
use parking_lot::{Mutex, RwLock};
use race_events::{SourceSite, ThreadId};

/// The address, size and flags of a store whose commit is still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWrite {
    pub addr: u64,
    pub size: u32,
    pub stack: bool,
    pub opcode: u32,
    pub atomic: bool,
}

/// Mutable state of one analyzed thread.
#[derive(Debug)]
pub struct ThreadContext {
    tid: ThreadId,
    ignore_depth: u32,
    active_acquires: u32,
    last_site: SourceSite,
    native_handle: Option<u64>,
    pending_write: Option<PendingWrite>,
    next_seq: u32,
}

impl ThreadContext {
    pub fn new(tid: ThreadId) -> Self {
        Self {
            tid,
            ignore_depth: 0,
            active_acquires: 0,
            last_site: SourceSite::UNKNOWN,
            native_handle: None,
            pending_write: None,
            next_seq: 0,
        }
    }

    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    pub fn ignore_depth(&self) -> u32 {
        self.ignore_depth
    }

    pub fn is_ignoring(&self) -> bool {
        self.ignore_depth > 0
    }

    pub fn enter_ignore(&mut self) {
        self.ignore_depth = self.ignore_depth.saturating_add(1);
    }

    /// Closes `count` ignore regions. Closing more regions than are open is
    /// logged and clamped at zero.
    pub fn exit_ignore(&mut self, count: u32) {
        if count > self.ignore_depth {
            warn!(
                "{}: closing {count} ignore region(s) with only {} open",
                self.tid, self.ignore_depth
            );
        }
        self.ignore_depth = self.ignore_depth.saturating_sub(count);
    }

    pub fn active_acquires(&self) -> u32 {
        self.active_acquires
    }

    pub fn acquired(&mut self) {
        self.active_acquires = self.active_acquires.saturating_add(1);
    }

    pub fn released(&mut self) {
        if self.active_acquires == 0 {
            warn!("{}: release without an active acquire", self.tid);
        }
        self.active_acquires = self.active_acquires.saturating_sub(1);
    }

    pub fn last_site(&self) -> SourceSite {
        self.last_site
    }

    /// Remembers `site` as the most recent location, ignoring unknown ones.
    pub fn update_site(&mut self, site: SourceSite) {
        if site.is_known() {
            self.last_site = site;
        }
    }

    pub fn native_handle(&self) -> Option<u64> {
        self.native_handle
    }

    pub fn set_native_handle(&mut self, handle: u64) {
        self.native_handle = Some(handle);
    }

    /// Stores the in-flight write. Returns the descriptor it replaced.
    pub fn begin_write(&mut self, write: PendingWrite) -> Option<PendingWrite> {
        self.pending_write.replace(write)
    }

    pub fn commit_write(&mut self) -> Option<PendingWrite> {
        self.pending_write.take()
    }

    pub fn pending_write(&self) -> Option<&PendingWrite> {
        self.pending_write.as_ref()
    }

    /// Returns the sequence number of the next event and advances it.
    pub fn next_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }
}

pub type SharedContext = Arc<Mutex<ThreadContext>>;

/// The contexts of every live thread, keyed by thread id.
///
/// The table itself is shared. Each context is only ever locked by the thread
/// that owns it, so its lock never contends.
#[derive(Default)]
pub struct ThreadContexts {
    contexts: RwLock<HashMap<ThreadId, SharedContext>>,
}

impl ThreadContexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tid: ThreadId) -> Option<SharedContext> {
        self.contexts.read().get(&tid).cloned()
    }

    pub fn get_or_create(&self, tid: ThreadId) -> SharedContext {
        if let Some(ctx) = self.get(tid) {
            return ctx;
        }

        self.contexts
            .write()
            .entry(tid)
            .or_insert_with(|| Arc::new(Mutex::new(ThreadContext::new(tid))))
            .clone()
    }

    /// Removes the context of an exited thread.
    pub fn retire(&self, tid: ThreadId) -> Option<SharedContext> {
        self.contexts.write().remove(&tid)
    }

    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
