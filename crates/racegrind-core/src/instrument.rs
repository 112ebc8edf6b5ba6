use std::sync::Arc;

use crate::{knobs::Knobs, registry::Registry, tmgmt::NativeThreads};

/// Instruction-level instrumentation of translated code
mod instruction;

/// Routine-level instrumentation of loaded images
mod routine;

/// Inserts analysis hooks into the code the host hands over.
///
/// The instrumentor only decides which hooks go where. It never runs analysis
/// logic itself.
pub struct Instrumentor {
    knobs: Knobs,
    registry: Arc<Registry>,
    threads: Arc<NativeThreads>,
}

impl Instrumentor {
    pub fn new(knobs: Knobs, registry: Arc<Registry>, threads: Arc<NativeThreads>) -> Self {
        Self {
            knobs,
            registry,
            threads,
        }
    }

    pub fn knobs(&self) -> &Knobs {
        &self.knobs
    }
}
