use std::{collections::HashSet, path::Path};

use anyhow::{Context, Error, ensure};
use racegrind_core::classify::ImageKind;
use serde::{Deserialize, Serialize};

/// A scripted multithreaded program: the code it loads and what every
/// thread executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub images: Vec<ImageSpec>,

    /// Code blocks, referenced by index from [`Step::Block`].
    #[serde(default)]
    pub blocks: Vec<BlockSpec>,

    /// The first thread is the main thread.
    pub threads: Vec<ThreadSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSpec {
    pub name: String,
    pub kind: ImageKind,
    pub routines: Vec<RoutineSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineSpec {
    pub name: String,
    pub address: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSpec {
    pub instructions: Vec<InstructionSpec>,
}

/// Static properties of one instruction. Flags default to a plain,
/// non-memory instruction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstructionSpec {
    pub address: u64,
    pub opcode: u32,
    pub file: Option<String>,
    pub line: u32,
    pub routine: Option<String>,
    pub prefetch: bool,
    pub non_standard: bool,
    pub read: bool,
    pub read2: bool,
    pub write: bool,
    pub atomic: bool,
    pub stack: bool,
    pub no_fall_through: bool,
    pub branch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSpec {
    /// The value `pthread_self` returns on this thread.
    pub native_handle: u64,
    pub steps: Vec<Step>,
}

/// One step of a thread's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Enters a routine.
    Call {
        routine: String,
        #[serde(default)]
        args: [u64; 4],

        /// Memory behind the first argument, handed to built-in replacements.
        #[serde(default)]
        data: Option<String>,

        /// The thread this call creates. It does not run before the call.
        #[serde(default)]
        spawn: Option<usize>,
    },

    /// Returns from the innermost routine.
    Return,

    /// Leaves the innermost routine without running its exit hooks and enters
    /// another one in its place.
    TailCall {
        routine: String,
        #[serde(default)]
        args: [u64; 4],
    },

    /// Executes a code block.
    Block {
        block: usize,
        #[serde(default)]
        execs: Vec<Exec>,
    },

    /// Waits until another thread has exited.
    WaitFor { thread: usize },
}

/// Run-time behavior of one instruction within a [`Step::Block`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Exec {
    /// `false` if the instruction's predicate is false.
    pub executes: bool,
    pub taken: bool,
    pub read_ea: u64,
    pub read2_ea: u64,
    pub read_size: u32,
    pub write_ea: u64,
    pub write_size: u32,
    pub value: u64,
}

impl Default for Exec {
    fn default() -> Self {
        Self {
            executes: true,
            taken: false,
            read_ea: 0,
            read2_ea: 0,
            read_size: 0,
            write_ea: 0,
            write_size: 0,
            value: 0,
        }
    }
}

impl Program {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let program: Program = serde_json::from_str(json)?;
        program.validate()?;
        Ok(program)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read program {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Checks that every cross reference of the program resolves.
    pub fn validate(&self) -> Result<(), Error> {
        ensure!(!self.threads.is_empty(), "Program has no threads");

        let mut spawned = HashSet::new();
        for (idx, thread) in self.threads.iter().enumerate() {
            for step in &thread.steps {
                if let Step::Call { spawn: Some(child), .. } = step {
                    ensure!(
                        *child != 0 && *child != idx && *child < self.threads.len(),
                        "Thread {idx} spawns invalid thread {child}"
                    );
                    ensure!(spawned.insert(*child), "Thread {child} is spawned twice");
                }

                match step {
                    Step::Call { routine, .. } | Step::TailCall { routine, .. } => ensure!(
                        self.find_routine(routine).is_some(),
                        "Thread {idx} calls unknown routine {routine}"
                    ),
                    Step::Block { block, .. } => ensure!(
                        *block < self.blocks.len(),
                        "Thread {idx} executes unknown block {block}"
                    ),
                    Step::WaitFor { thread } => ensure!(
                        *thread < self.threads.len() && *thread != idx,
                        "Thread {idx} waits for invalid thread {thread}"
                    ),
                    Step::Return => {}
                }
            }
        }

        Ok(())
    }

    /// Returns the threads some step spawns explicitly.
    pub fn spawned_threads(&self) -> HashSet<usize> {
        self.threads
            .iter()
            .flat_map(|thread| thread.steps.iter())
            .filter_map(|step| match step {
                Step::Call { spawn, .. } => *spawn,
                _ => None,
            })
            .collect()
    }

    /// Returns the image and routine index of the routine called `name`.
    pub fn find_routine(&self, name: &str) -> Option<(usize, usize)> {
        self.images.iter().enumerate().find_map(|(image_idx, image)| {
            image
                .routines
                .iter()
                .position(|routine| routine.name == name)
                .map(|routine_idx| (image_idx, routine_idx))
        })
    }
}
