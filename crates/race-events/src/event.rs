use std::{fmt, num::NonZeroU32};

use anyhow::{Error, anyhow};
use serde::{Deserialize, Serialize};

/// The logical identifier of an analyzed thread.
///
/// Thread identifiers are never zero. The instrumentation host numbers its
/// threads starting at zero, so [`ThreadId::from_host_index`] shifts the
/// host index by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ThreadId(NonZeroU32);

impl ThreadId {
    /// Creates a thread identifier, returning `None` for zero.
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    /// Maps a zero-based host thread index onto a logical thread identifier.
    pub fn from_host_index(index: u32) -> Self {
        Self(NonZeroU32::MIN.saturating_add(index))
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl TryFrom<u32> for ThreadId {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(anyhow!("Thread-ID must not be zero"))
    }
}

impl From<ThreadId> for u32 {
    fn from(value: ThreadId) -> Self {
        value.get()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// The kind of an event handed to the downstream simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A memory read that actually executed.
    MemoryRead,

    /// Emitted before a store executes. Carries address, size and flags.
    MemoryWriteBegin,

    /// Emitted after a store retired. Carries the post-write value and the
    /// source location of the store.
    MemoryWriteCommit,

    LockAcquire,
    LockRelease,

    /// Semantics tag of the release/acquire pair around condition and
    /// barrier waits.
    LockAcquireAndRelease,

    /// The host started executing a new thread.
    ThreadStart,

    /// The host observed a thread exit.
    ThreadFinish,

    /// A thread is about to create another thread.
    ThreadSpawn,

    /// A thread finished waiting for another thread.
    ThreadJoin,

    /// Benchmark-suite region of interest begins.
    RegionOfInterestStart,

    /// Benchmark-suite region of interest ends.
    RegionOfInterestEnd,

    /// Server-harness steady state begins.
    ServerRegionStart,

    /// Server-harness steady state ends.
    ServerRegionEnd,

    /// Entry into a basic block. Carries the block's instruction count.
    BasicBlockEnter,
}

impl EventKind {
    /// Returns an integer that uniquely identifies the kind of the event.
    ///
    /// The numbering is part of the binary trace format.
    pub fn id(&self) -> u8 {
        match self {
            EventKind::MemoryRead => 0,
            EventKind::MemoryWriteBegin => 1,
            EventKind::MemoryWriteCommit => 2,
            EventKind::LockAcquire => 3,
            EventKind::LockRelease => 4,
            EventKind::LockAcquireAndRelease => 5,
            EventKind::ThreadStart => 6,
            EventKind::ThreadFinish => 7,
            EventKind::ThreadSpawn => 8,
            EventKind::ThreadJoin => 9,
            EventKind::RegionOfInterestStart => 10,
            EventKind::RegionOfInterestEnd => 11,
            EventKind::ServerRegionStart => 12,
            EventKind::ServerRegionEnd => 13,
            EventKind::BasicBlockEnter => 14,
        }
    }

    pub fn try_from_id(id: u8) -> Result<Self, Error> {
        match id {
            0 => Ok(EventKind::MemoryRead),
            1 => Ok(EventKind::MemoryWriteBegin),
            2 => Ok(EventKind::MemoryWriteCommit),
            3 => Ok(EventKind::LockAcquire),
            4 => Ok(EventKind::LockRelease),
            5 => Ok(EventKind::LockAcquireAndRelease),
            6 => Ok(EventKind::ThreadStart),
            7 => Ok(EventKind::ThreadFinish),
            8 => Ok(EventKind::ThreadSpawn),
            9 => Ok(EventKind::ThreadJoin),
            10 => Ok(EventKind::RegionOfInterestStart),
            11 => Ok(EventKind::RegionOfInterestEnd),
            12 => Ok(EventKind::ServerRegionStart),
            13 => Ok(EventKind::ServerRegionEnd),
            14 => Ok(EventKind::BasicBlockEnter),
            _ => Err(anyhow!("Event-Kind-ID was not recognized")),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(
            self,
            EventKind::MemoryRead | EventKind::MemoryWriteBegin | EventKind::MemoryWriteCommit
        )
    }

    pub fn is_sync(&self) -> bool {
        matches!(
            self,
            EventKind::LockAcquire
                | EventKind::LockRelease
                | EventKind::LockAcquireAndRelease
                | EventKind::ThreadSpawn
                | EventKind::ThreadJoin
        )
    }
}

/// A resolved source location. Zero in either field means "unknown".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceSite {
    pub file: u32,
    pub line: u32,
}

impl SourceSite {
    pub const UNKNOWN: SourceSite = SourceSite { file: 0, line: 0 };

    pub const fn new(file: u32, line: u32) -> Self {
        Self { file, line }
    }

    pub fn is_known(&self) -> bool {
        self.line != 0
    }
}

/// A single event of the per-thread event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,

    /// The semantics of the routine that produced the event. Equal to
    /// `kind` unless the event is half of a composite operation.
    pub semantics: EventKind,

    pub tid: ThreadId,

    /// Effective address, lock address or native thread handle.
    pub addr: u64,
    pub size: u32,
    pub stack: bool,
    pub atomic: bool,

    /// Set when the event was produced inside an ignore-conflicts region.
    pub ignored: bool,
    pub opcode: u32,

    /// Post-write value for commits, joined thread id for joins.
    pub value: u64,
    pub instructions: u32,
    pub site: SourceSite,
    pub routine: u32,

    /// The most recent known source location of the thread.
    pub last_site: SourceSite,

    /// Position of this event in its thread's stream.
    pub seq: u32,
}

impl Event {
    /// Creates an event of the given kind with every payload field zeroed.
    pub fn new(kind: EventKind, tid: ThreadId) -> Self {
        Self {
            kind,
            semantics: kind,
            tid,
            addr: 0,
            size: 0,
            stack: false,
            atomic: false,
            ignored: false,
            opcode: 0,
            value: 0,
            instructions: 0,
            site: SourceSite::UNKNOWN,
            routine: 0,
            last_site: SourceSite::UNKNOWN,
            seq: 0,
        }
    }

    pub fn with_semantics(mut self, semantics: EventKind) -> Self {
        self.semantics = semantics;
        self
    }

    pub fn with_memory(mut self, addr: u64, size: u32, stack: bool) -> Self {
        self.addr = addr;
        self.size = size;
        self.stack = stack;
        self
    }

    pub fn with_addr(mut self, addr: u64) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_opcode(mut self, opcode: u32, atomic: bool) -> Self {
        self.opcode = opcode;
        self.atomic = atomic;
        self
    }

    pub fn with_site(mut self, site: SourceSite, routine: u32) -> Self {
        self.site = site;
        self.routine = routine;
        self
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }

    pub fn with_instructions(mut self, instructions: u32) -> Self {
        self.instructions = instructions;
        self
    }
}
