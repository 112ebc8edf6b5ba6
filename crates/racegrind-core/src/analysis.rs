use std::sync::Arc;

use anyhow::{Error, ensure};
use log::{debug, info, warn};
use parking_lot::Mutex;
use race_events::{Event, EventKind, EventSink, ThreadId};

use crate::{
    context::{PendingWrite, ThreadContext, ThreadContexts},
    host::{ApplicationCall, CallArgs, Hook, ReadOperand},
    registry::Registry,
    tmgmt::NativeThreads,
};

/// The run-time half of the front-end: executes inserted hooks on behalf of
/// the analyzed threads and forwards the resulting events.
pub struct Analysis {
    contexts: ThreadContexts,
    threads: Arc<NativeThreads>,
    registry: Arc<Registry>,
    sink: Arc<dyn EventSink>,
}

impl Analysis {
    pub fn new(
        threads: Arc<NativeThreads>,
        registry: Arc<Registry>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            contexts: ThreadContexts::new(),
            threads,
            registry,
            sink,
        }
    }

    pub fn contexts(&self) -> &ThreadContexts {
        &self.contexts
    }

    /// Sets up the context of a new thread and correlates it with its native
    /// handle.
    ///
    /// # Errors
    ///
    /// Fails if `pthread_self` was never resolved, if calling it fails or if
    /// the event cannot be delivered.
    pub fn thread_start<A: ApplicationCall + ?Sized>(
        &self,
        tid: ThreadId,
        app: &A,
    ) -> Result<(), Error> {
        let pthread_self = self.threads.pthread_self()?;
        let handle = app.call_application_function(tid, pthread_self)?;
        self.threads.register(handle, tid);
        debug!("{tid} started with native handle {handle:#x}");

        let ctx = self.contexts.get_or_create(tid);
        let mut ctx = ctx.lock();
        ctx.set_native_handle(handle);
        self.emit(&mut ctx, Event::new(EventKind::ThreadStart, tid).with_addr(handle))
    }

    /// Emits the final event of a thread and retires its context.
    pub fn thread_finish(&self, tid: ThreadId) -> Result<(), Error> {
        let ctx = self.contexts.retire(tid).unwrap_or_else(|| {
            warn!("{tid} finished without ever being observed");
            Arc::new(Mutex::new(ThreadContext::new(tid)))
        });
        let mut ctx = ctx.lock();

        if ctx.is_ignoring() {
            warn!("{tid} finished inside {} ignore region(s)", ctx.ignore_depth());
        }
        if let Some(write) = ctx.pending_write() {
            warn!("{tid} finished with an uncommitted write to {:#x}", write.addr);
        }

        let handle = ctx.native_handle().unwrap_or(0);
        self.emit(&mut ctx, Event::new(EventKind::ThreadFinish, tid).with_addr(handle))
    }

    /// Executes `hook` on thread `tid`.
    pub fn dispatch(&self, tid: ThreadId, hook: &Hook, args: &CallArgs) -> Result<(), Error> {
        let ctx = self.contexts.get_or_create(tid);
        let mut ctx = ctx.lock();

        match *hook {
            Hook::BasicBlock { instructions } => self.emit(
                &mut ctx,
                Event::new(EventKind::BasicBlockEnter, tid).with_instructions(instructions),
            ),
            Hook::SiteInfo { site } => {
                ctx.update_site(site);
                Ok(())
            }
            Hook::Read {
                operand,
                stack,
                opcode,
                atomic,
                site,
                routine,
            } => {
                let addr = match operand {
                    ReadOperand::First => args.read_ea,
                    ReadOperand::Second => args.read2_ea,
                };
                ensure!(args.read_size > 0, "{tid}: read of {addr:#x} has no size");
                self.emit(
                    &mut ctx,
                    Event::new(EventKind::MemoryRead, tid)
                        .with_memory(addr, args.read_size, stack)
                        .with_opcode(opcode, atomic)
                        .with_site(site, routine),
                )
            }
            Hook::WriteBegin {
                stack,
                opcode,
                atomic,
            } => {
                ensure!(
                    args.write_size > 0,
                    "{tid}: write to {:#x} has no size",
                    args.write_ea
                );
                let write = PendingWrite {
                    addr: args.write_ea,
                    size: args.write_size,
                    stack,
                    opcode,
                    atomic,
                };
                if let Some(lost) = ctx.begin_write(write) {
                    warn!("{tid}: write to {:#x} was never committed", lost.addr);
                }
                self.emit(
                    &mut ctx,
                    Event::new(EventKind::MemoryWriteBegin, tid)
                        .with_memory(write.addr, write.size, write.stack)
                        .with_opcode(write.opcode, write.atomic),
                )
            }
            Hook::WriteCommit { site, routine } => match ctx.commit_write() {
                Some(write) => self.emit(
                    &mut ctx,
                    Event::new(EventKind::MemoryWriteCommit, tid)
                        .with_memory(write.addr, write.size, write.stack)
                        .with_opcode(write.opcode, write.atomic)
                        .with_site(site, routine)
                        .with_value(args.written_value),
                ),
                None => {
                    warn!("{tid}: dropping write commit without a pending write");
                    Ok(())
                }
            },
            Hook::IgnoreBegin => {
                ctx.enter_ignore();
                Ok(())
            }
            Hook::IgnoreEnd => {
                ctx.exit_ignore(1);
                Ok(())
            }
            Hook::IgnoreDoubleEnd => {
                ctx.exit_ignore(2);
                Ok(())
            }
            Hook::LockAcquire { arg, semantics } => {
                ctx.acquired();
                self.emit(
                    &mut ctx,
                    Event::new(EventKind::LockAcquire, tid)
                        .with_semantics(semantics)
                        .with_addr(args.arg(arg)),
                )
            }
            Hook::LockRelease { arg, semantics } => {
                ctx.released();
                self.emit(
                    &mut ctx,
                    Event::new(EventKind::LockRelease, tid)
                        .with_semantics(semantics)
                        .with_addr(args.arg(arg)),
                )
            }
            Hook::ThreadSpawn => self.emit(&mut ctx, Event::new(EventKind::ThreadSpawn, tid)),
            Hook::ThreadJoin { arg } => {
                let handle = args.arg(arg);
                let joined = match self.threads.lookup(handle) {
                    Some(joined) => u64::from(joined.get()),
                    None => {
                        debug!("{tid} joined unknown native handle {handle:#x}");
                        0
                    }
                };
                self.emit(
                    &mut ctx,
                    Event::new(EventKind::ThreadJoin, tid)
                        .with_addr(handle)
                        .with_value(joined),
                )
            }
            Hook::Region { kind } => {
                info!("{tid}: {kind:?}");
                self.emit(&mut ctx, Event::new(kind, tid))
            }
            Hook::RoutineEnter { routine } => {
                info!("{tid} > {}", self.routine_name(routine));
                Ok(())
            }
            Hook::RoutineExit { routine } => {
                info!("{tid} < {}", self.routine_name(routine));
                Ok(())
            }
        }
    }

    fn routine_name(&self, routine: u32) -> String {
        self.registry
            .routines
            .name(routine)
            .map_or_else(|| String::from("<unknown>"), |name| name.to_string())
    }

    fn emit(&self, ctx: &mut ThreadContext, mut event: Event) -> Result<(), Error> {
        event.seq = ctx.next_seq();
        event.ignored = ctx.is_ignoring() && event.kind != EventKind::BasicBlockEnter;
        event.last_site = ctx.last_site();
        self.sink.deliver(event)
    }
}
