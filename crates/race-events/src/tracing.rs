use std::{io::Cursor, sync::Mutex};

use anyhow::{Error, bail};

use crate::{
    event::{Event, ThreadId},
    generic::{Encoder, Parser},
    metadata::TraceMetadata,
    simbin::{encoder::SimBinEncoder, parser::SimBinParser},
};

/// The downstream end of the event stream.
///
/// Events are handed over by direct synchronous calls, in program order for
/// every single thread. No order across threads is implied.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: Event) -> Result<(), Error>;
}

/// A mutex-protected in-memory event trace.
///
/// Internally, this is a [`Vec`] of events wrapped by a [`Mutex`]
/// that has to be locked each time any thread wants to read from or
/// write to the trace.
pub struct Tracing {
    events: Mutex<Vec<Event>>,
}

impl Tracing {
    /// Creates an empty event trace.
    pub const fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Append a new event to the trace.
    ///
    /// # Errors
    ///
    /// This function may fail if the [`Mutex`] guarding the trace
    /// was poisoned.
    #[inline]
    pub fn add_event(&self, event: Event) -> Result<(), Error> {
        match self.events.lock() {
            Ok(mut events_guard) => {
                events_guard.push(event);
                Ok(())
            }
            Err(_) => bail!("Trace Lock Poisoned: Could not insert new event!"),
        }
    }

    /// Returns a copy of all events collected so far.
    pub fn events(&self) -> Result<Vec<Event>, Error> {
        match self.events.lock() {
            Ok(events_guard) => Ok(events_guard.clone()),
            Err(_) => bail!("Trace Lock Poisoned: Could not read events!"),
        }
    }

    /// Returns the events of a single thread in the order they were delivered.
    pub fn thread_events(&self, tid: ThreadId) -> Result<Vec<Event>, Error> {
        Ok(self
            .events()?
            .into_iter()
            .filter(|event| event.tid == tid)
            .collect())
    }

    /// Emits the current state of the trace in SimBin format.
    ///
    /// # Errors
    ///
    /// This function may fail if the [`Mutex`] guarding the trace
    /// was poisoned or if an event does not fit the record layout.
    pub fn generate_binary_trace(
        &self,
        metadata: TraceMetadata,
    ) -> Result<BinaryTraceOutput, Error> {
        let binary_trace = match self.events.lock() {
            Ok(events_guard) => {
                let mut encoder = SimBinEncoder::new();
                let mut output = Cursor::new(Vec::with_capacity(
                    events_guard.len() * SimBinEncoder::EVENT_SIZE_HINT,
                ));

                encoder.encode(events_guard.iter().cloned().map(Ok), &mut output)?;

                output.into_inner()
            }
            Err(_) => bail!("Trace Lock Poisoned: Could not generate binary trace!"),
        };

        Ok(BinaryTraceOutput {
            trace: binary_trace,
            metadata,
        })
    }
}

impl Default for Tracing {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for Tracing {
    fn deliver(&self, event: Event) -> Result<(), Error> {
        self.add_event(event)
    }
}

/// An event trace in SimBin format including its name tables.
pub struct BinaryTraceOutput {
    /// The binary event trace
    pub trace: Vec<u8>,

    /// The file and routine name tables
    pub metadata: TraceMetadata,
}

impl TryFrom<BinaryTraceOutput> for Tracing {
    type Error = Error;

    fn try_from(value: BinaryTraceOutput) -> Result<Self, Self::Error> {
        let mut parser = SimBinParser::new();
        let trace = parser
            .parse(&value.trace[..])?
            .collect::<Result<Vec<Event>, Error>>()?;

        Ok(Tracing {
            events: Mutex::new(trace),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Error;

    use crate::{
        event::{Event, EventKind, ThreadId},
        metadata::TraceMetadata,
    };

    use super::{EventSink, Tracing};

    #[test]
    fn binary_trace_roundtrip() -> Result<(), Error> {
        let tracing = Tracing::new();
        for host_index in 0..4 {
            let tid = ThreadId::from_host_index(host_index);
            tracing.deliver(Event::new(EventKind::ThreadStart, tid))?;
            tracing.deliver(Event::new(EventKind::MemoryRead, tid).with_memory(0x10, 4, false))?;
        }

        let output = tracing.generate_binary_trace(TraceMetadata::default())?;
        let restored = Tracing::try_from(output)?;
        assert_eq!(tracing.events()?, restored.events()?);

        Ok(())
    }

    #[test]
    fn concurrent_delivery_keeps_thread_order() -> Result<(), Error> {
        let tracing = Arc::new(Tracing::new());
        let handles: Vec<_> = (0..4)
            .map(|host_index| {
                let tracing = tracing.clone();
                std::thread::spawn(move || -> Result<(), Error> {
                    let tid = ThreadId::from_host_index(host_index);
                    for seq in 0..100 {
                        let mut event = Event::new(EventKind::BasicBlockEnter, tid);
                        event.seq = seq;
                        tracing.deliver(event)?;
                    }
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("Delivering thread panicked")?;
        }

        for host_index in 0..4 {
            let seqs: Vec<u32> = tracing
                .thread_events(ThreadId::from_host_index(host_index))?
                .iter()
                .map(|event| event.seq)
                .collect();
            assert_eq!(seqs, (0..100).collect::<Vec<u32>>());
        }

        Ok(())
    }
}
