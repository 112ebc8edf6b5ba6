use std::sync::Arc;

use anyhow::Error;
use race_events::{EventSink, ThreadId, metadata::TraceMetadata};

use crate::{
    analysis::Analysis,
    host::{ApplicationCall, CallArgs, Hook, Image, Symbols, Trace},
    instrument::Instrumentor,
    knobs::Knobs,
    registry::Registry,
    tmgmt::NativeThreads,
};

/// Run-time callbacks executed by inserted hooks
pub mod analysis;

/// Synchronization roles of routines, derived from their names
pub mod classify;

/// Per-thread analysis state
pub mod context;

/// Traits describing the binary-instrumentation host
pub mod host;

/// Hook insertion for images and translated code
pub mod instrument;
pub mod knobs;

/// Interning of file and routine names
pub mod registry;

/// Built-in replacements for application routines
pub mod replace;

/// Native thread handle bookkeeping
pub mod tmgmt;

/// The instrumentation front-end of one analysis run.
///
/// A host calls [`instrument_image`](Frontend::instrument_image) for every
/// loaded image and [`instrument_trace`](Frontend::instrument_trace) for every
/// translated piece of code. At run time it reports thread start and exit and
/// executes the inserted hooks through [`dispatch`](Frontend::dispatch).
pub struct Frontend {
    registry: Arc<Registry>,
    instrumentor: Instrumentor,
    analysis: Analysis,
}

impl Frontend {
    pub fn new(knobs: Knobs, sink: Arc<dyn EventSink>) -> Self {
        let registry = Arc::new(Registry::new());
        let threads = Arc::new(NativeThreads::new());
        Self {
            instrumentor: Instrumentor::new(knobs, registry.clone(), threads.clone()),
            analysis: Analysis::new(threads, registry.clone(), sink),
            registry,
        }
    }

    pub fn knobs(&self) -> &Knobs {
        self.instrumentor.knobs()
    }

    /// Installs routine hooks into a newly loaded image.
    ///
    /// # Errors
    ///
    /// Fails if the image provides `pthread_self` at an invalid address.
    pub fn instrument_image<I: Image>(&self, image: &mut I) -> Result<(), Error> {
        self.instrumentor.instrument_image(image)
    }

    /// Installs instruction hooks into a freshly translated trace.
    pub fn instrument_trace<T: Trace, S: Symbols + ?Sized>(&self, trace: &mut T, symbols: &S) {
        self.instrumentor.instrument_trace(trace, symbols)
    }

    /// Executes an inserted hook on thread `tid`.
    pub fn dispatch(&self, tid: ThreadId, hook: &Hook, args: &CallArgs) -> Result<(), Error> {
        self.analysis.dispatch(tid, hook, args)
    }

    /// Reports that the host started executing thread `tid`.
    ///
    /// # Errors
    ///
    /// Fails if no image provided `pthread_self` before the thread started.
    pub fn thread_start<A: ApplicationCall + ?Sized>(
        &self,
        tid: ThreadId,
        app: &A,
    ) -> Result<(), Error> {
        self.analysis.thread_start(tid, app)
    }

    /// Reports that thread `tid` exited.
    pub fn thread_finish(&self, tid: ThreadId) -> Result<(), Error> {
        self.analysis.thread_finish(tid)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the name tables for the IDs carried by the emitted events.
    pub fn metadata(&self) -> TraceMetadata {
        self.registry.to_metadata()
    }
}
