use log::{debug, trace};
use race_events::SourceSite;

use super::Instrumentor;
use crate::{
    classify::is_excluded_library_routine,
    host::{BasicBlock, Hook, InsertionPoint, Instruction, ReadOperand, Symbols, Trace},
};

impl Instrumentor {
    /// Instruments every block of a freshly translated trace.
    pub fn instrument_trace<T: Trace, S: Symbols + ?Sized>(&self, trace: &mut T, symbols: &S) {
        for block in trace.blocks_mut() {
            self.instrument_block(block, symbols);
        }
    }

    fn instrument_block<B: BasicBlock, S: Symbols + ?Sized>(&self, block: &mut B, symbols: &S) {
        let instructions = block.instructions_mut();
        let count = u32::try_from(instructions.len()).unwrap_or(u32::MAX);
        let Some(head) = instructions.first_mut() else {
            return;
        };

        trace!("Instrumenting block at {:#x} ({count} instructions)", head.address());
        // Billed regardless of predication
        head.insert_call(InsertionPoint::Before, Hook::BasicBlock { instructions: count });

        let mut current_site = SourceSite::UNKNOWN;
        for ins in instructions.iter_mut() {
            let site = self.resolve_site(symbols, ins.address());
            if site.is_known() && site != current_site {
                ins.insert_call(InsertionPoint::Before, Hook::SiteInfo { site });
                current_site = site;
            }

            self.instrument_instruction(ins, site, symbols);
        }
    }

    fn resolve_site<S: Symbols + ?Sized>(&self, symbols: &S, address: u64) -> SourceSite {
        match symbols.source_location(address) {
            Some((file, line)) => SourceSite::new(self.registry.files.intern(file), line),
            None => SourceSite::UNKNOWN,
        }
    }

    fn instrument_instruction<I: Instruction, S: Symbols + ?Sized>(
        &self,
        ins: &mut I,
        site: SourceSite,
        symbols: &S,
    ) {
        let routine = match symbols.routine_name(ins.address()) {
            Some(name) if is_excluded_library_routine(name) => return,
            Some(name) => self.registry.routines.intern(name),
            None => 0,
        };

        // Prefetches may touch addresses that are never accessed
        if self.knobs.ignore_prefetch && ins.is_prefetch() {
            return;
        }

        if !ins.is_standard_memop() {
            return;
        }

        let opcode = ins.opcode();
        let atomic = ins.is_atomic_update();

        if ins.is_memory_read() {
            ins.insert_predicated_call(
                InsertionPoint::Before,
                Hook::Read {
                    operand: ReadOperand::First,
                    stack: ins.is_stack_read(),
                    opcode,
                    atomic,
                    site,
                    routine,
                },
            );
        }

        if ins.has_memory_read2() {
            ins.insert_predicated_call(
                InsertionPoint::Before,
                Hook::Read {
                    operand: ReadOperand::Second,
                    stack: ins.is_stack_read(),
                    opcode,
                    atomic,
                    site,
                    routine,
                },
            );
        }

        if ins.is_memory_write() {
            let commit_point = if ins.has_fall_through() {
                InsertionPoint::After
            } else if ins.is_branch_or_call() {
                InsertionPoint::TakenBranch
            } else {
                debug!(
                    "Store at {:#x} has no point after retirement, not instrumented",
                    ins.address()
                );
                return;
            };

            ins.insert_predicated_call(
                InsertionPoint::Before,
                Hook::WriteBegin {
                    stack: ins.is_stack_write(),
                    opcode,
                    atomic,
                },
            );
            ins.insert_predicated_call(commit_point, Hook::WriteCommit { site, routine });
        }
    }
}
