use std::sync::Arc;

use anyhow::{Error, anyhow, bail, ensure};
use log::{debug, warn};
use race_events::{EventSink, ThreadId};
use racegrind_core::{
    Frontend,
    host::{CallArgs, Hook, InsertionPoint},
    knobs::Knobs,
};

use crate::{
    program::{Exec, Program, Step},
    runtime::host::{ProgramSymbols, ScriptedBlock, ScriptedImage, ScriptedTrace},
    tmgmt::{Frame, ThreadManagement, ThreadState},
};

/// Scripted implementations of the instrumentation host objects.
pub mod host;

enum Progress {
    Advanced,
    Blocked,
    Finished,
}

/// Executes a scripted [`Program`] under the instrumentation front-end.
///
/// Threads are scheduled round-robin, one step at a time, which makes every
/// run fully deterministic. A thread named by a `spawn` call starts only after
/// that call. Code blocks are instrumented the first time any
/// thread executes them.
pub struct ScriptedRuntime {
    program: Program,
    frontend: Frontend,
    images: Vec<ScriptedImage>,
    blocks: Vec<ScriptedBlock>,
    symbols: ProgramSymbols,
    tmgmt: ThreadManagement,
}

impl ScriptedRuntime {
    /// Loads every image of the program and installs its routine hooks.
    ///
    /// # Errors
    ///
    /// Fails if the program is inconsistent or an image cannot be
    /// instrumented.
    pub fn new(
        program: Program,
        knobs: Knobs,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, Error> {
        program.validate()?;

        let frontend = Frontend::new(knobs, sink);
        let mut images: Vec<ScriptedImage> =
            program.images.iter().map(ScriptedImage::new).collect();
        for image in images.iter_mut() {
            frontend.instrument_image(image)?;
        }

        Ok(Self {
            blocks: program.blocks.iter().map(ScriptedBlock::new).collect(),
            symbols: ProgramSymbols::new(&program),
            tmgmt: ThreadManagement::new(&program)?,
            images,
            frontend,
            program,
        })
    }

    pub fn frontend(&self) -> &Frontend {
        &self.frontend
    }

    pub fn images(&self) -> &[ScriptedImage] {
        &self.images
    }

    pub fn blocks(&self) -> &[ScriptedBlock] {
        &self.blocks
    }

    /// Runs all threads to completion.
    ///
    /// # Errors
    ///
    /// Fails if a hook fails, a thread returns from a routine it never
    /// entered, or every remaining thread waits for another one.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            let mut advanced = false;
            let mut finished = true;

            for idx in 0..self.tmgmt.len() {
                match self.step(idx)? {
                    Progress::Advanced => {
                        advanced = true;
                        finished = false;
                    }
                    Progress::Blocked => finished = false,
                    Progress::Finished => {}
                }
            }

            if finished {
                return Ok(());
            }
            ensure!(advanced, "Deadlock: every remaining thread is waiting");
        }
    }

    fn step(&mut self, idx: usize) -> Result<Progress, Error> {
        let thread = self.tmgmt.thread(idx)?;
        let tid = thread.tid;
        let pc = thread.pc;

        match thread.state {
            ThreadState::Finished => return Ok(Progress::Finished),
            ThreadState::Unspawned => return Ok(Progress::Blocked),
            ThreadState::NotStarted => {
                self.frontend.thread_start(tid, &self.tmgmt)?;
                self.tmgmt.thread_mut(idx)?.state = ThreadState::Running;
                return Ok(Progress::Advanced);
            }
            ThreadState::Running => {}
        }

        let Some(step) = self.program.threads[idx].steps.get(pc).cloned() else {
            let thread = self.tmgmt.thread_mut(idx)?;
            if !thread.frames.is_empty() {
                warn!("{tid} exits with {} open routine frame(s)", thread.frames.len());
            }
            thread.state = ThreadState::Finished;
            self.frontend.thread_finish(tid)?;
            return Ok(Progress::Advanced);
        };

        match step {
            Step::Call {
                routine,
                args,
                data,
                spawn,
            } => {
                self.call(idx, tid, &routine, args, data.as_deref())?;
                if let Some(child) = spawn {
                    let child = self.tmgmt.thread_mut(child)?;
                    ensure!(
                        child.state == ThreadState::Unspawned,
                        "{} is spawned twice",
                        child.tid
                    );
                    child.state = ThreadState::NotStarted;
                }
            }
            Step::Return => {
                let frame = self.pop_frame(idx, tid)?;
                if !frame.replaced {
                    let hooks = self.images[frame.image].routines()[frame.routine]
                        .exit_hooks()
                        .to_vec();
                    self.run_routine_hooks(tid, &hooks, frame.args)?;
                }
            }
            Step::TailCall { routine, args } => {
                // The replaced frame never returns, so its exit hooks never run
                self.pop_frame(idx, tid)?;
                self.call(idx, tid, &routine, args, None)?;
            }
            Step::Block { block, execs } => self.execute_block(tid, block, &execs)?,
            Step::WaitFor { thread } => {
                if self.tmgmt.thread(thread)?.state != ThreadState::Finished {
                    return Ok(Progress::Blocked);
                }
            }
        }

        self.tmgmt.thread_mut(idx)?.pc += 1;
        Ok(Progress::Advanced)
    }

    fn call(
        &mut self,
        idx: usize,
        tid: ThreadId,
        name: &str,
        args: [u64; 4],
        data: Option<&str>,
    ) -> Result<(), Error> {
        let (image, routine) = self
            .program
            .find_routine(name)
            .ok_or(anyhow!("Unknown routine {name}"))?;
        let target = &self.images[image].routines()[routine];

        let replaced = match target.replacement() {
            Some(replacement) => {
                let result = replacement.invoke(data.unwrap_or_default().as_bytes());
                debug!("{tid}: built-in {} returned {result}", replacement.name());
                true
            }
            None => {
                let hooks = target.entry_hooks().to_vec();
                self.run_routine_hooks(tid, &hooks, args)?;
                false
            }
        };

        self.tmgmt.thread_mut(idx)?.frames.push(Frame {
            image,
            routine,
            args,
            replaced,
        });

        Ok(())
    }

    fn pop_frame(&mut self, idx: usize, tid: ThreadId) -> Result<Frame, Error> {
        match self.tmgmt.thread_mut(idx)?.frames.pop() {
            Some(frame) => Ok(frame),
            None => bail!("{tid} returned without an active routine"),
        }
    }

    fn run_routine_hooks(
        &self,
        tid: ThreadId,
        hooks: &[Hook],
        args: [u64; 4],
    ) -> Result<(), Error> {
        let args = CallArgs::with_args(args);
        for hook in hooks {
            self.frontend.dispatch(tid, hook, &args)?;
        }

        Ok(())
    }

    fn execute_block(&mut self, tid: ThreadId, block: usize, execs: &[Exec]) -> Result<(), Error> {
        let scripted = self
            .blocks
            .get_mut(block)
            .ok_or(anyhow!("Unknown block {block}"))?;
        if !scripted.is_instrumented() {
            self.frontend
                .instrument_trace(&mut ScriptedTrace(&mut *scripted), &self.symbols);
            scripted.mark_instrumented();
        }

        for (idx, ins) in self.blocks[block].instructions().iter().enumerate() {
            let exec = execs.get(idx).copied().unwrap_or_default();
            let args = CallArgs {
                read_ea: exec.read_ea,
                read2_ea: exec.read2_ea,
                read_size: exec.read_size,
                write_ea: exec.write_ea,
                write_size: exec.write_size,
                written_value: exec.value,
                args: [0; 4],
            };

            let after = if exec.executes && exec.taken {
                InsertionPoint::TakenBranch
            } else {
                InsertionPoint::After
            };

            for point in [InsertionPoint::Before, after] {
                for call in ins.calls().iter().filter(|call| call.point == point) {
                    if !call.predicated || exec.executes {
                        self.frontend.dispatch(tid, &call.hook, &args)?;
                    }
                }
            }
        }

        Ok(())
    }
}
