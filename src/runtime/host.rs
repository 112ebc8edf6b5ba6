use std::collections::HashMap;

use racegrind_core::{
    classify::ImageKind,
    host::{
        BasicBlock, Hook, Image, InsertionPoint, Instruction, Routine, RoutinePoint, Symbols,
        Trace,
    },
    replace::Replacement,
};

use crate::program::{BlockSpec, ImageSpec, InstructionSpec, Program};

/// A hook inserted into an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertedCall {
    pub point: InsertionPoint,
    pub hook: Hook,
    pub predicated: bool,
}

pub struct ScriptedInstruction {
    spec: InstructionSpec,
    calls: Vec<InsertedCall>,
}

impl ScriptedInstruction {
    pub fn calls(&self) -> &[InsertedCall] {
        &self.calls
    }
}

impl Instruction for ScriptedInstruction {
    fn address(&self) -> u64 {
        self.spec.address
    }

    fn opcode(&self) -> u32 {
        self.spec.opcode
    }

    fn is_prefetch(&self) -> bool {
        self.spec.prefetch
    }

    fn is_standard_memop(&self) -> bool {
        !self.spec.non_standard
    }

    fn is_memory_read(&self) -> bool {
        self.spec.read
    }

    fn has_memory_read2(&self) -> bool {
        self.spec.read2
    }

    fn is_memory_write(&self) -> bool {
        self.spec.write
    }

    fn is_atomic_update(&self) -> bool {
        self.spec.atomic
    }

    fn is_stack_read(&self) -> bool {
        self.spec.stack
    }

    fn is_stack_write(&self) -> bool {
        self.spec.stack
    }

    fn has_fall_through(&self) -> bool {
        !self.spec.no_fall_through
    }

    fn is_branch_or_call(&self) -> bool {
        self.spec.branch
    }

    fn insert_call(&mut self, point: InsertionPoint, hook: Hook) {
        self.calls.push(InsertedCall {
            point,
            hook,
            predicated: false,
        });
    }

    fn insert_predicated_call(&mut self, point: InsertionPoint, hook: Hook) {
        self.calls.push(InsertedCall {
            point,
            hook,
            predicated: true,
        });
    }
}

/// A code block, instrumented the first time it executes.
pub struct ScriptedBlock {
    instructions: Vec<ScriptedInstruction>,
    instrumented: bool,
}

impl ScriptedBlock {
    pub fn new(spec: &BlockSpec) -> Self {
        Self {
            instructions: spec
                .instructions
                .iter()
                .map(|ins| ScriptedInstruction {
                    spec: ins.clone(),
                    calls: Vec::new(),
                })
                .collect(),
            instrumented: false,
        }
    }

    pub fn instructions(&self) -> &[ScriptedInstruction] {
        &self.instructions
    }

    pub fn is_instrumented(&self) -> bool {
        self.instrumented
    }

    pub fn mark_instrumented(&mut self) {
        self.instrumented = true;
    }
}

impl BasicBlock for ScriptedBlock {
    type Instr = ScriptedInstruction;

    fn instructions_mut(&mut self) -> &mut [ScriptedInstruction] {
        &mut self.instructions
    }
}

/// A trace made of a single block.
pub struct ScriptedTrace<'a>(pub &'a mut ScriptedBlock);

impl Trace for ScriptedTrace<'_> {
    type Block = ScriptedBlock;

    fn blocks_mut(&mut self) -> &mut [ScriptedBlock] {
        std::slice::from_mut(self.0)
    }
}

pub struct ScriptedRoutine {
    name: String,
    address: u64,
    entry: Vec<Hook>,
    exit: Vec<Hook>,
    replacement: Option<Replacement>,
}

impl ScriptedRoutine {
    pub fn entry_hooks(&self) -> &[Hook] {
        &self.entry
    }

    pub fn exit_hooks(&self) -> &[Hook] {
        &self.exit
    }

    pub fn replacement(&self) -> Option<Replacement> {
        self.replacement
    }
}

impl Routine for ScriptedRoutine {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> u64 {
        self.address
    }

    fn insert_call(&mut self, point: RoutinePoint, hook: Hook) {
        match point {
            RoutinePoint::Entry => self.entry.push(hook),
            RoutinePoint::Exit => self.exit.push(hook),
        }
    }

    fn replace(&mut self, replacement: Replacement) {
        self.replacement = Some(replacement);
    }
}

pub struct ScriptedImage {
    name: String,
    kind: ImageKind,
    routines: Vec<ScriptedRoutine>,
}

impl ScriptedImage {
    pub fn new(spec: &ImageSpec) -> Self {
        Self {
            name: spec.name.clone(),
            kind: spec.kind,
            routines: spec
                .routines
                .iter()
                .map(|routine| ScriptedRoutine {
                    name: routine.name.clone(),
                    address: routine.address,
                    entry: Vec::new(),
                    exit: Vec::new(),
                    replacement: None,
                })
                .collect(),
        }
    }

    pub fn routines(&self) -> &[ScriptedRoutine] {
        &self.routines
    }
}

impl Image for ScriptedImage {
    type Routine = ScriptedRoutine;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ImageKind {
        self.kind
    }

    fn routines_mut(&mut self) -> &mut [ScriptedRoutine] {
        &mut self.routines
    }
}

struct Location {
    file: Option<String>,
    line: u32,
    routine: Option<String>,
}

/// Debug information of a scripted program, keyed by instruction address.
pub struct ProgramSymbols {
    locations: HashMap<u64, Location>,
}

impl ProgramSymbols {
    pub fn new(program: &Program) -> Self {
        let locations = program
            .blocks
            .iter()
            .flat_map(|block| block.instructions.iter())
            .map(|ins| {
                (
                    ins.address,
                    Location {
                        file: ins.file.clone(),
                        line: ins.line,
                        routine: ins.routine.clone(),
                    },
                )
            })
            .collect();

        Self { locations }
    }
}

impl Symbols for ProgramSymbols {
    fn source_location(&self, address: u64) -> Option<(&str, u32)> {
        let location = self.locations.get(&address)?;
        location.file.as_deref().map(|file| (file, location.line))
    }

    fn routine_name(&self, address: u64) -> Option<&str> {
        self.locations.get(&address)?.routine.as_deref()
    }
}
