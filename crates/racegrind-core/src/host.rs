//! The interface to the binary-instrumentation host.
//!
//! The host discovers images, routines and code blocks, hands them to the
//! instrumentors, and later executes the inserted [`Hook`]s at the requested
//! points by calling [`Frontend::dispatch`](crate::Frontend::dispatch) with
//! the run-time values in [`CallArgs`].

use anyhow::Error;
use race_events::{EventKind, SourceSite, ThreadId};
use serde::{Deserialize, Serialize};

use crate::{classify::ImageKind, replace::Replacement};

/// Where an instruction-level hook runs relative to its instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InsertionPoint {
    Before,

    /// After the instruction, on its normal fall-through path.
    After,

    /// After the instruction, on its taken-branch path.
    TakenBranch,
}

/// Where a routine-level hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutinePoint {
    Entry,
    Exit,
}

/// Selects the effective address a read hook reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadOperand {
    First,
    Second,
}

/// An analysis callback together with the values known at instrumentation
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hook {
    BasicBlock {
        instructions: u32,
    },
    SiteInfo {
        site: SourceSite,
    },
    Read {
        operand: ReadOperand,
        stack: bool,
        opcode: u32,
        atomic: bool,
        site: SourceSite,
        routine: u32,
    },
    WriteBegin {
        stack: bool,
        opcode: u32,
        atomic: bool,
    },
    WriteCommit {
        site: SourceSite,
        routine: u32,
    },
    IgnoreBegin,
    IgnoreEnd,

    /// Closes two ignore regions at once.
    IgnoreDoubleEnd,
    LockAcquire {
        arg: usize,
        semantics: EventKind,
    },
    LockRelease {
        arg: usize,
        semantics: EventKind,
    },
    ThreadSpawn,
    ThreadJoin {
        arg: usize,
    },
    Region {
        kind: EventKind,
    },
    RoutineEnter {
        routine: u32,
    },
    RoutineExit {
        routine: u32,
    },
}

/// Values the host supplies when it executes a hook.
///
/// Routine exit hooks receive the arguments the routine was entered with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallArgs {
    pub read_ea: u64,
    pub read2_ea: u64,
    pub read_size: u32,
    pub write_ea: u64,
    pub write_size: u32,

    /// The memory contents at `write_ea` after the store retired.
    pub written_value: u64,
    pub args: [u64; 4],
}

impl CallArgs {
    pub fn with_args(args: [u64; 4]) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }

    /// Returns routine argument `idx`, or zero if the host does not pass that
    /// many arguments.
    pub fn arg(&self, idx: usize) -> u64 {
        self.args.get(idx).copied().unwrap_or(0)
    }
}

/// Operand introspection and hook insertion for a single instruction.
pub trait Instruction {
    fn address(&self) -> u64;
    fn opcode(&self) -> u32;
    fn is_prefetch(&self) -> bool;

    /// Returns `false` for instructions whose memory operands do not map onto
    /// plain reads and writes, e.g. scatter/gather or string instructions.
    fn is_standard_memop(&self) -> bool;
    fn is_memory_read(&self) -> bool;
    fn has_memory_read2(&self) -> bool;
    fn is_memory_write(&self) -> bool;
    fn is_atomic_update(&self) -> bool;
    fn is_stack_read(&self) -> bool;
    fn is_stack_write(&self) -> bool;
    fn has_fall_through(&self) -> bool;
    fn is_branch_or_call(&self) -> bool;

    /// Inserts a hook that runs whenever control reaches `point`.
    fn insert_call(&mut self, point: InsertionPoint, hook: Hook);

    /// Inserts a hook that only runs if the instruction actually executes.
    fn insert_predicated_call(&mut self, point: InsertionPoint, hook: Hook);
}

/// A straight-line sequence of instructions.
pub trait BasicBlock {
    type Instr: Instruction;

    fn instructions_mut(&mut self) -> &mut [Self::Instr];
}

/// A unit of dynamically translated code.
pub trait Trace {
    type Block: BasicBlock;

    fn blocks_mut(&mut self) -> &mut [Self::Block];
}

/// Symbol and debug information lookups by address.
pub trait Symbols {
    /// Returns the source file and line of the instruction at `address`.
    fn source_location(&self, address: u64) -> Option<(&str, u32)>;

    /// Returns the name of the routine enclosing `address`.
    fn routine_name(&self, address: u64) -> Option<&str>;
}

pub trait Routine {
    fn name(&self) -> &str;
    fn address(&self) -> u64;
    fn insert_call(&mut self, point: RoutinePoint, hook: Hook);

    /// Replaces the routine's body with a built-in implementation.
    fn replace(&mut self, replacement: Replacement);
}

/// A loaded executable or shared library.
pub trait Image {
    type Routine: Routine;

    fn name(&self) -> &str;
    fn kind(&self) -> ImageKind;
    fn routines_mut(&mut self) -> &mut [Self::Routine];
}

/// Executes application code on behalf of the analysis.
pub trait ApplicationCall {
    /// Calls the parameterless application function at `address` on thread
    /// `tid` and returns its result.
    fn call_application_function(&self, tid: ThreadId, address: u64) -> Result<u64, Error>;
}
